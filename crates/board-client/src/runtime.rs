use crate::connection::{
    Connector, ReadyState, RuntimeEvent, Scheduler, SocketId, TimerId, Transport, TransportEvent,
};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use url::Url;

pub const EVENT_QUEUE_CAPACITY: usize = 256;

pub fn event_channel() -> (mpsc::Sender<RuntimeEvent>, mpsc::Receiver<RuntimeEvent>) {
    mpsc::channel(EVENT_QUEUE_CAPACITY)
}

#[derive(Debug)]
enum Outbound {
    Text(String),
    Close,
}

#[derive(Debug, Clone)]
struct SharedReadyState(Arc<AtomicU8>);

impl SharedReadyState {
    fn new(state: ReadyState) -> Self {
        Self(Arc::new(AtomicU8::new(encode_ready(state))))
    }

    fn get(&self) -> ReadyState {
        decode_ready(self.0.load(Ordering::SeqCst))
    }

    fn set(&self, state: ReadyState) {
        self.0.store(encode_ready(state), Ordering::SeqCst);
    }
}

fn encode_ready(state: ReadyState) -> u8 {
    match state {
        ReadyState::Connecting => 0,
        ReadyState::Open => 1,
        ReadyState::Closing => 2,
        ReadyState::Closed => 3,
    }
}

fn decode_ready(raw: u8) -> ReadyState {
    match raw {
        0 => ReadyState::Connecting,
        1 => ReadyState::Open,
        2 => ReadyState::Closing,
        _ => ReadyState::Closed,
    }
}

/// A websocket driven by its own tokio task.
pub struct WsSocket {
    state: SharedReadyState,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl Transport for WsSocket {
    fn ready_state(&self) -> ReadyState {
        self.state.get()
    }

    fn send_text(&mut self, text: String) {
        if self.outbound.send(Outbound::Text(text)).is_err() {
            self.state.set(ReadyState::Closed);
        }
    }

    fn close(&mut self) {
        if self.state.get() == ReadyState::Closed {
            return;
        }
        self.state.set(ReadyState::Closing);
        let _ = self.outbound.send(Outbound::Close);
    }
}

pub struct WsConnector {
    events: mpsc::Sender<RuntimeEvent>,
}

impl WsConnector {
    pub fn new(events: mpsc::Sender<RuntimeEvent>) -> Self {
        Self { events }
    }
}

impl Connector for WsConnector {
    type Socket = WsSocket;

    fn open(&mut self, url: &Url, socket: SocketId) -> WsSocket {
        let state = SharedReadyState::new(ReadyState::Connecting);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(socket_loop(
            url.clone(),
            socket,
            state.clone(),
            outbound_rx,
            self.events.clone(),
        ));
        WsSocket {
            state,
            outbound: outbound_tx,
        }
    }
}

async fn socket_loop(
    url: Url,
    socket: SocketId,
    state: SharedReadyState,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::Sender<RuntimeEvent>,
) {
    let emit = |event: TransportEvent| {
        let events = events.clone();
        async move {
            let _ = events.send(RuntimeEvent::Transport { socket, event }).await;
        }
    };

    let mut ws = match connect_async(url.as_str()).await {
        Ok((ws, _)) => ws,
        Err(err) => {
            state.set(ReadyState::Closed);
            emit(TransportEvent::Error(err.to_string())).await;
            emit(TransportEvent::Close).await;
            return;
        }
    };
    if state.get() != ReadyState::Connecting {
        // closed by the manager before the handshake finished
        let _ = ws.close(None).await;
        state.set(ReadyState::Closed);
        return;
    }
    state.set(ReadyState::Open);
    emit(TransportEvent::Open).await;

    let mut failure = None;
    loop {
        tokio::select! {
            incoming = ws.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => emit(TransportEvent::Frame(text)).await,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        failure = Some(err.to_string());
                        break;
                    }
                }
            }
            command = outbound.recv() => {
                match command {
                    Some(Outbound::Text(text)) => {
                        if let Err(err) = ws.send(Message::Text(text)).await {
                            failure = Some(err.to_string());
                            break;
                        }
                    }
                    Some(Outbound::Close) | None => {
                        let _ = ws.close(None).await;
                        break;
                    }
                }
            }
        }
    }

    state.set(ReadyState::Closed);
    if let Some(reason) = failure {
        debug!(event = "ws_socket_failed", socket = socket.0, error = %reason);
        emit(TransportEvent::Error(reason)).await;
    }
    emit(TransportEvent::Close).await;
}

/// Timers backed by spawned sleeps; a fired timer is posted to the event queue.
pub struct TokioScheduler {
    events: mpsc::Sender<RuntimeEvent>,
    next_id: u64,
    pending: HashMap<TimerId, JoinHandle<()>>,
}

impl TokioScheduler {
    pub fn new(events: mpsc::Sender<RuntimeEvent>) -> Self {
        Self {
            events,
            next_id: 0,
            pending: HashMap::new(),
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&mut self, delay: Duration) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if events.send(RuntimeEvent::Timer(id)).await.is_err() {
                warn!(event = "timer_queue_closed", timer = id.0);
            }
        });
        self.pending.insert(id, handle);
        id
    }

    fn clear(&mut self, timer: TimerId) {
        if let Some(handle) = self.pending.remove(&timer) {
            handle.abort();
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for (_, handle) in self.pending.drain() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_state_round_trips_through_atomic() {
        let shared = SharedReadyState::new(ReadyState::Connecting);
        for state in [
            ReadyState::Open,
            ReadyState::Closing,
            ReadyState::Closed,
            ReadyState::Connecting,
        ] {
            shared.set(state);
            assert_eq!(shared.get(), state);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_timer_fires_into_event_queue() {
        let (tx, mut rx) = event_channel();
        let mut scheduler = TokioScheduler::new(tx);
        let timer = scheduler.schedule(Duration::from_millis(1000));

        tokio::time::advance(Duration::from_millis(1001)).await;
        assert_eq!(rx.recv().await, Some(RuntimeEvent::Timer(timer)));
    }

    #[tokio::test(start_paused = true)]
    async fn cleared_timer_never_fires() {
        let (tx, mut rx) = event_channel();
        let mut scheduler = TokioScheduler::new(tx);
        let cancelled = scheduler.schedule(Duration::from_millis(1000));
        let kept = scheduler.schedule(Duration::from_millis(2000));
        scheduler.clear(cancelled);
        assert_eq!(scheduler.pending(), 1);

        tokio::time::advance(Duration::from_millis(2001)).await;
        assert_eq!(rx.recv().await, Some(RuntimeEvent::Timer(kept)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn refused_connection_reports_error_then_close() {
        let (tx, mut rx) = event_channel();
        let mut connector = WsConnector::new(tx);
        let url = Url::parse("ws://127.0.0.1:1/ws").expect("url");
        let socket = connector.open(&url, SocketId(7));

        let first = rx.recv().await.expect("first event");
        assert!(matches!(
            first,
            RuntimeEvent::Transport {
                socket: SocketId(7),
                event: TransportEvent::Error(_)
            }
        ));
        assert_eq!(
            rx.recv().await,
            Some(RuntimeEvent::Transport {
                socket: SocketId(7),
                event: TransportEvent::Close
            })
        );
        assert_eq!(socket.ready_state(), ReadyState::Closed);
    }
}
