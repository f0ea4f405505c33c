use thiserror::Error;
use url::Url;

pub const CHANNEL_PATH: &str = "/ws";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointError {
    #[error("invalid origin '{origin}': {reason}")]
    InvalidOrigin { origin: String, reason: String },
    #[error("unsupported origin scheme: {0}")]
    UnsupportedScheme(String),
    #[error("origin has no host: {0}")]
    MissingHost(String),
}

/// Maps a page origin onto the channel endpoint: same host and port, `wss` when the
/// origin is secure, fixed path.
pub fn channel_url(origin: &Url) -> Result<Url, EndpointError> {
    let scheme = match origin.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => return Err(EndpointError::UnsupportedScheme(other.to_string())),
    };
    let Some(host) = origin.host_str() else {
        return Err(EndpointError::MissingHost(origin.to_string()));
    };
    let authority = match origin.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    let raw = format!("{scheme}://{authority}{CHANNEL_PATH}");
    Url::parse(&raw).map_err(|err| EndpointError::InvalidOrigin {
        origin: origin.to_string(),
        reason: err.to_string(),
    })
}

pub fn parse_origin(raw: &str) -> Result<Url, EndpointError> {
    Url::parse(raw.trim()).map_err(|err| EndpointError::InvalidOrigin {
        origin: raw.to_string(),
        reason: err.to_string(),
    })
}
