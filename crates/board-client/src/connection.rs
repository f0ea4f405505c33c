use crate::listeners::{ListenerRegistry, Subscription};
use board_core::protocol::{
    decode_server_message, encode_client_message, ClientMessage, FrameError, ServerMessage,
};
use board_core::ConnectionStatus;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

pub const RECONNECT_DELAY: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// One underlying duplex socket.
pub trait Transport {
    fn ready_state(&self) -> ReadyState;
    fn send_text(&mut self, text: String);
    fn close(&mut self);
}

/// Opens sockets. Events for the returned socket are delivered back to the manager
/// through [`ConnectionManager::dispatch`] tagged with the same `SocketId`.
pub trait Connector {
    type Socket: Transport;

    fn open(&mut self, url: &Url, socket: SocketId) -> Self::Socket;
}

/// Cancellable one-shot timers. A fired timer is delivered as [`RuntimeEvent::Timer`].
pub trait Scheduler {
    fn schedule(&mut self, delay: Duration) -> TimerId;
    fn clear(&mut self, timer: TimerId);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    Frame(String),
    Error(String),
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEvent {
    Transport {
        socket: SocketId,
        event: TransportEvent,
    },
    Timer(TimerId),
}

struct ActiveSocket<T> {
    id: SocketId,
    transport: T,
}

/// Keeps one logical channel to the server alive and fans out what arrives on it.
///
/// The manager never blocks and never performs IO itself: the `Connector` and
/// `Scheduler` it owns do, and their completions come back through [`dispatch`].
/// Events from sockets or timers the manager has already retired are ignored.
///
/// [`dispatch`]: ConnectionManager::dispatch
pub struct ConnectionManager<C: Connector, S: Scheduler> {
    url: Url,
    connector: C,
    scheduler: S,
    reconnect_delay: Duration,
    socket: Option<ActiveSocket<C::Socket>>,
    next_socket_id: u64,
    reconnect_timer: Option<TimerId>,
    status: Option<ConnectionStatus>,
    manually_closed: bool,
    last_error: Option<String>,
    status_listeners: ListenerRegistry<ConnectionStatus>,
    message_listeners: ListenerRegistry<ServerMessage>,
}

impl<C: Connector, S: Scheduler> ConnectionManager<C, S> {
    pub fn new(url: Url, connector: C, scheduler: S) -> Self {
        Self {
            url,
            connector,
            scheduler,
            reconnect_delay: RECONNECT_DELAY,
            socket: None,
            next_socket_id: 0,
            reconnect_timer: None,
            status: None,
            manually_closed: false,
            last_error: None,
            status_listeners: ListenerRegistry::new("connection_status"),
            message_listeners: ListenerRegistry::new("server_message"),
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// `None` until the first `connect()`.
    pub fn status(&self) -> Option<ConnectionStatus> {
        self.status
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn has_pending_reconnect(&self) -> bool {
        self.reconnect_timer.is_some()
    }

    pub fn subscribe_status(&self, listener: impl FnMut(&ConnectionStatus) + 'static) -> Subscription {
        self.status_listeners.subscribe(listener)
    }

    pub fn subscribe(&self, listener: impl FnMut(&ServerMessage) + 'static) -> Subscription {
        self.message_listeners.subscribe(listener)
    }

    pub fn connect(&mut self) {
        let live = matches!(
            self.status,
            Some(ConnectionStatus::Connecting) | Some(ConnectionStatus::Connected)
        );
        if live && self.socket.is_some() {
            debug!(event = "channel_connect_skipped", status = ?self.status);
            return;
        }

        self.manually_closed = false;
        self.clear_reconnect_timer();
        if let Some(mut stale) = self.socket.take() {
            stale.transport.close();
        }

        self.next_socket_id += 1;
        let id = SocketId(self.next_socket_id);
        self.set_status(ConnectionStatus::Connecting);
        info!(event = "channel_connect", url = %self.url, socket = id.0);
        let transport = self.connector.open(&self.url, id);
        self.socket = Some(ActiveSocket { id, transport });
    }

    pub fn disconnect(&mut self) {
        self.manually_closed = true;
        self.clear_reconnect_timer();
        if let Some(mut socket) = self.socket.take() {
            socket.transport.close();
        }
        info!(event = "channel_disconnect", url = %self.url);
        self.set_status(ConnectionStatus::Disconnected);
    }

    /// Best-effort, at-most-once write. Returns `false` when nothing was written.
    pub fn send(&mut self, message: &ClientMessage) -> bool {
        let Some(socket) = self.socket.as_mut() else {
            debug!(event = "channel_send_skipped", reason = "no_socket");
            return false;
        };
        if socket.transport.ready_state() != ReadyState::Open {
            debug!(event = "channel_send_skipped", reason = "not_open");
            return false;
        }
        match encode_client_message(message) {
            Ok(frame) => {
                socket.transport.send_text(frame);
                true
            }
            Err(err) => {
                warn!(event = "channel_encode_error", error = %err);
                false
            }
        }
    }

    pub fn dispatch(&mut self, event: RuntimeEvent) {
        match event {
            RuntimeEvent::Transport { socket, event } => self.handle_transport(socket, event),
            RuntimeEvent::Timer(timer) => self.handle_timer(timer),
        }
    }

    pub fn handle_transport(&mut self, socket: SocketId, event: TransportEvent) {
        if self.socket.as_ref().map(|active| active.id) != Some(socket) {
            debug!(event = "channel_stale_event", socket = socket.0);
            return;
        }

        match event {
            TransportEvent::Open => {
                self.last_error = None;
                info!(event = "channel_open", socket = socket.0);
                self.set_status(ConnectionStatus::Connected);
            }
            TransportEvent::Frame(text) => match decode_server_message(&text) {
                Ok(message) => self.message_listeners.emit(&message),
                Err(FrameError::OversizedFrame { size, max }) => {
                    warn!(event = "channel_frame_oversized", socket = socket.0, size, max);
                }
                Err(err) => {
                    debug!(event = "channel_decode_dropped", socket = socket.0, error = %err);
                }
            },
            TransportEvent::Error(reason) => {
                warn!(event = "channel_error", socket = socket.0, error = %reason);
                self.last_error = Some(reason);
                self.retire_socket();
                self.schedule_reconnect();
            }
            TransportEvent::Close => {
                info!(event = "channel_closed", socket = socket.0);
                self.retire_socket();
                self.schedule_reconnect();
            }
        }
    }

    pub fn handle_timer(&mut self, timer: TimerId) {
        if self.reconnect_timer != Some(timer) {
            debug!(event = "channel_stale_timer", timer = timer.0);
            return;
        }
        self.reconnect_timer = None;
        self.scheduler.clear(timer);
        if !self.manually_closed {
            self.connect();
        }
    }

    fn retire_socket(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            if socket.transport.ready_state() != ReadyState::Closed {
                socket.transport.close();
            }
        }
    }

    fn schedule_reconnect(&mut self) {
        if self.manually_closed || self.reconnect_timer.is_some() {
            return;
        }
        self.set_status(ConnectionStatus::Reconnecting);
        let timer = self.scheduler.schedule(self.reconnect_delay);
        debug!(
            event = "channel_reconnect_scheduled",
            timer = timer.0,
            delay_ms = self.reconnect_delay.as_millis() as u64
        );
        self.reconnect_timer = Some(timer);
    }

    fn clear_reconnect_timer(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            self.scheduler.clear(timer);
        }
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        self.status = Some(status);
        self.status_listeners.emit(&status);
    }
}
