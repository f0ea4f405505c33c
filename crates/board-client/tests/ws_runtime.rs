use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use board_client::connection::{ConnectionManager, RuntimeEvent};
use board_client::runtime::{event_channel, TokioScheduler, WsConnector};
use board_client::store::SessionStore;
use board_core::protocol::ClientMessage;
use board_core::sort::SortConfig;
use board_core::ConnectionStatus;
use serde_json::json;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use url::Url;

type Manager = ConnectionManager<WsConnector, TokioScheduler>;

#[derive(Clone)]
struct ServerState {
    inbound: mpsc::UnboundedSender<String>,
    connections: Arc<AtomicUsize>,
    drop_first_after_refresh: bool,
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<ServerState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: ServerState) {
    let connection = state.connections.fetch_add(1, Ordering::SeqCst) + 1;
    let name = if connection == 1 { "first" } else { "second" };
    let snapshot = json!({
        "type": "sessions",
        "sessions": [{
            "id": format!("s-{connection}"),
            "name": name,
            "tmuxWindow": format!("agentboard:{connection}"),
            "projectPath": "/work/app",
            "status": "waiting",
            "lastActivity": "2024-05-01T10:00:00Z"
        }]
    });
    if socket.send(Message::Text(snapshot.to_string())).await.is_err() {
        return;
    }
    while let Some(Ok(message)) = socket.recv().await {
        if let Message::Text(text) = message {
            let is_refresh = text.contains("session-refresh");
            let _ = state.inbound.send(text);
            if is_refresh && connection == 1 && state.drop_first_after_refresh {
                return;
            }
        }
    }
}

async fn spawn_server(drop_first_after_refresh: bool) -> (Url, mpsc::UnboundedReceiver<String>) {
    let (inbound, inbound_rx) = mpsc::unbounded_channel();
    let state = ServerState {
        inbound,
        connections: Arc::new(AtomicUsize::new(0)),
        drop_first_after_refresh,
    };
    let app = Router::new().route("/ws", get(ws_handler)).with_state(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    let url = Url::parse(&format!("ws://{addr}/ws")).expect("url");
    (url, inbound_rx)
}

struct Client {
    manager: Manager,
    events: mpsc::Receiver<RuntimeEvent>,
    store: Rc<RefCell<SessionStore>>,
    statuses: Rc<RefCell<Vec<ConnectionStatus>>>,
    refresh_due: Rc<Cell<bool>>,
}

impl Client {
    fn new(url: Url) -> Self {
        let (tx, events) = event_channel();
        let manager = ConnectionManager::new(url, WsConnector::new(tx.clone()), TokioScheduler::new(tx))
            .with_reconnect_delay(Duration::from_millis(50));
        let store = Rc::new(RefCell::new(SessionStore::new(SortConfig::default())));
        let statuses = Rc::new(RefCell::new(Vec::new()));
        let refresh_due = Rc::new(Cell::new(false));

        {
            let store = store.clone();
            let statuses = statuses.clone();
            let refresh_due = refresh_due.clone();
            manager.subscribe_status(move |status| {
                statuses.borrow_mut().push(*status);
                store.borrow_mut().set_connection_status(*status);
                if *status == ConnectionStatus::Connected {
                    refresh_due.set(true);
                }
            });
        }
        {
            let store = store.clone();
            manager.subscribe(move |message| {
                store.borrow_mut().apply_server_message(message);
            });
        }

        Self {
            manager,
            events,
            store,
            statuses,
            refresh_due,
        }
    }

    async fn step(&mut self) {
        if let Some(event) = self.events.recv().await {
            self.manager.dispatch(event);
        }
        if self.refresh_due.replace(false) {
            self.manager.send(&ClientMessage::SessionRefresh);
        }
    }

    async fn pump_until(&mut self, mut done: impl FnMut(&Client) -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !done(self) {
                self.step().await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    fn first_session_name(&self) -> Option<String> {
        self.store
            .borrow()
            .sessions()
            .first()
            .map(|session| session.name.clone())
    }
}

#[tokio::test]
async fn snapshot_arrives_and_refresh_is_sent_on_connect() {
    let (url, mut inbound) = spawn_server(false).await;
    let mut client = Client::new(url);
    client.manager.connect();

    client
        .pump_until(|client| client.store.borrow().has_loaded())
        .await;

    assert_eq!(client.manager.status(), Some(ConnectionStatus::Connected));
    assert_eq!(client.first_session_name().as_deref(), Some("first"));
    assert_eq!(client.store.borrow().selected_session_id(), Some("s-1"));

    let received = tokio::time::timeout(Duration::from_secs(5), inbound.recv())
        .await
        .expect("server saw no frame");
    assert_eq!(received.as_deref(), Some(r#"{"type":"session-refresh"}"#));

    client.manager.disconnect();
}

#[tokio::test]
async fn dropped_connection_reconnects_and_reloads() {
    let (url, _inbound) = spawn_server(true).await;
    let mut client = Client::new(url);
    client.manager.connect();

    client
        .pump_until(|client| client.first_session_name().as_deref() == Some("second"))
        .await;

    assert_eq!(
        *client.statuses.borrow(),
        vec![
            ConnectionStatus::Connecting,
            ConnectionStatus::Connected,
            ConnectionStatus::Reconnecting,
            ConnectionStatus::Connecting,
            ConnectionStatus::Connected,
        ]
    );
    assert_eq!(
        client.store.borrow().state().connection_status,
        ConnectionStatus::Connected
    );

    client.manager.disconnect();
}

#[tokio::test]
async fn disconnect_suppresses_reconnect() {
    let (url, _inbound) = spawn_server(false).await;
    let mut client = Client::new(url);
    client.manager.connect();
    client
        .pump_until(|client| client.manager.status() == Some(ConnectionStatus::Connected))
        .await;

    client.manager.disconnect();
    let quiet = tokio::time::sleep(Duration::from_millis(300));
    tokio::pin!(quiet);
    loop {
        tokio::select! {
            event = client.events.recv() => {
                let Some(event) = event else { break };
                client.manager.dispatch(event);
            }
            _ = &mut quiet => break,
        }
    }

    assert_eq!(client.manager.status(), Some(ConnectionStatus::Disconnected));
    assert!(!client.manager.has_pending_reconnect());
    let connecting = client
        .statuses
        .borrow()
        .iter()
        .filter(|status| **status == ConnectionStatus::Connecting)
        .count();
    assert_eq!(connecting, 1);
}

#[tokio::test]
async fn unreachable_server_keeps_retrying() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    let url = Url::parse(&format!("ws://{addr}/ws")).expect("url");

    let mut client = Client::new(url);
    client.manager.connect();
    client
        .pump_until(|client| {
            client
                .statuses
                .borrow()
                .iter()
                .filter(|status| **status == ConnectionStatus::Reconnecting)
                .count()
                >= 2
        })
        .await;

    assert!(client.manager.last_error().is_some());
    assert!(!client.store.borrow().has_loaded());
    client.manager.disconnect();
    assert_eq!(client.manager.status(), Some(ConnectionStatus::Disconnected));
}
