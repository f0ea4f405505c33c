use crate::Session;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 256 * 1024;
/// Matches the websocket layer's default message limit; a full snapshot of a large
/// board routinely exceeds `DEFAULT_MAX_FRAME_BYTES`.
pub const MAX_INBOUND_FRAME_BYTES: usize = 64 << 20;

/// Server → client envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    Sessions {
        sessions: Vec<Session>,
    },
    SessionUpdate {
        session: Session,
    },
    SessionCreated {
        session: Session,
    },
    #[serde(rename_all = "camelCase")]
    SessionRemoved {
        session_id: String,
    },
    #[serde(rename_all = "camelCase")]
    TerminalOutput {
        session_id: String,
        data: String,
    },
    #[serde(rename_all = "camelCase")]
    TerminalReady {
        session_id: String,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Sessions { .. } => "sessions",
            ServerMessage::SessionUpdate { .. } => "session-update",
            ServerMessage::SessionCreated { .. } => "session-created",
            ServerMessage::SessionRemoved { .. } => "session-removed",
            ServerMessage::TerminalOutput { .. } => "terminal-output",
            ServerMessage::TerminalReady { .. } => "terminal-ready",
            ServerMessage::Error { .. } => "error",
        }
    }
}

/// Client → server envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    SessionRefresh,
    #[serde(rename_all = "camelCase")]
    SessionCreate {
        project_path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        command: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    SessionKill {
        session_id: String,
    },
    #[serde(rename_all = "camelCase")]
    SessionRename {
        session_id: String,
        new_name: String,
    },
    #[serde(rename_all = "camelCase")]
    TerminalAttach {
        session_id: String,
    },
    #[serde(rename_all = "camelCase")]
    TerminalDetach {
        session_id: String,
    },
    #[serde(rename_all = "camelCase")]
    TerminalInput {
        session_id: String,
        data: String,
    },
    #[serde(rename_all = "camelCase")]
    TerminalResize {
        session_id: String,
        cols: u16,
        rows: u16,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("frame encode failed: {0}")]
    Encode(String),
    #[error("frame decode failed: {0}")]
    Decode(String),
}

pub fn encode_frame<T: Serialize>(value: &T, max_frame_bytes: usize) -> Result<String, FrameError> {
    let encoded = serde_json::to_string(value).map_err(|err| FrameError::Encode(err.to_string()))?;
    if encoded.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: encoded.len(),
            max: max_frame_bytes,
        });
    }
    Ok(encoded)
}

pub fn decode_frame<T: DeserializeOwned>(text: &str, max_frame_bytes: usize) -> Result<T, FrameError> {
    let raw = text.trim_end_matches(['\r', '\n']);
    if raw.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: raw.len(),
            max: max_frame_bytes,
        });
    }
    serde_json::from_str(raw).map_err(|err| FrameError::Decode(err.to_string()))
}

pub fn encode_client_message(message: &ClientMessage) -> Result<String, FrameError> {
    encode_frame(message, DEFAULT_MAX_FRAME_BYTES)
}

pub fn decode_server_message(text: &str) -> Result<ServerMessage, FrameError> {
    decode_frame(text, MAX_INBOUND_FRAME_BYTES)
}
