//! scenecast hub
//!
//! Relays replica mutations between the windows of one scenecast session,
//! routes snapshot requests to the main window and hands out fresh ids.
//!
//! ## Protocol
//!
//! Messages are JSON text frames. The first message on a connection must
//! register the window:
//! ```json
//! { "type": "hello", "window_id": 2, "role": "child" }
//! { "type": "snapshot_request", "requesting_window_id": 2 }
//! { "type": "mutation_broadcast", "mutation": { "type": "RENAME_SCENE", "payload": { "id": "s1", "name": "Intro" } } }
//! { "type": "allocate_id", "request_id": 1 }
//! ```

use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use clap::Parser;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use scenecast_core::hub::{Envelope, Hub};
use scenecast_core::store::WindowRole;
use scenecast_core::sync::{ClientMessage, ServerMessage, WindowId};
use std::{
    net::SocketAddr,
    sync::{Arc, Mutex, PoisonError},
};
use tokio::sync::mpsc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};

/// scenecast IPC hub
#[derive(Debug, Parser)]
#[command(name = "scenecast-hub", version, about)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:3030")]
    bind: SocketAddr,
}

/// Shared application state
struct AppState {
    /// Routing state. Every routing decision happens under this lock so all
    /// windows see messages in the same order.
    hub: Mutex<Hub>,
    /// Outgoing queues of registered windows
    peers: DashMap<WindowId, mpsc::UnboundedSender<ServerMessage>>,
}

impl AppState {
    fn new() -> Self {
        Self {
            hub: Mutex::new(Hub::new()),
            peers: DashMap::new(),
        }
    }

    fn with_hub<T>(&self, f: impl FnOnce(&mut Hub) -> T) -> T {
        let mut hub = self.hub.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut hub)
    }

    /// Deliver envelopes to their windows' queues.
    fn route(&self, envelopes: Vec<Envelope>) {
        for Envelope { to, msg } in envelopes {
            match self.peers.get(&to) {
                Some(tx) => {
                    if tx.send(msg).is_err() {
                        debug!("Window {} queue closed", to);
                    }
                }
                None => debug!("No connection for window {}", to),
            }
        }
    }

    /// Register a connection's window. On success the welcome is already
    /// queued on `tx`.
    fn register(
        &self,
        window_id: WindowId,
        role: WindowRole,
        tx: &mpsc::UnboundedSender<ServerMessage>,
    ) -> Result<(), String> {
        self.with_hub(|hub| {
            let envelopes = hub.join(window_id, role).map_err(|err| err.to_string())?;
            self.peers.insert(window_id, tx.clone());
            self.route(envelopes);
            Ok(())
        })
    }

    fn handle(&self, from: WindowId, msg: ClientMessage) {
        self.with_hub(|hub| self.route(hub.handle(from, msg)));
    }

    fn unregister(&self, window_id: WindowId) {
        self.with_hub(|hub| {
            self.peers.remove(&window_id);
            self.route(hub.leave(window_id));
        });
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scenecast_hub=info,scenecast_core=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();
    let app = app(Arc::new(AppState::new()));

    info!("scenecast hub listening on {}", args.bind);
    info!("WebSocket endpoint: ws://{}/ws", args.bind);

    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Index page
async fn index() -> &'static str {
    "scenecast hub - connect windows via WebSocket at /ws"
}

/// Health check
async fn health() -> &'static str {
    "ok"
}

/// WebSocket upgrade handler
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

fn encode(msg: &ServerMessage) -> Option<Message> {
    match serde_json::to_string(msg) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            warn!("Failed to encode {:?}: {}", msg, e);
            None
        }
    }
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let mut window_id: Option<WindowId> = None;

    loop {
        tokio::select! {
            // Handle incoming messages from the window
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = match (serde_json::from_str::<ClientMessage>(&text), window_id) {
                            (Ok(msg), Some(from)) => {
                                state.handle(from, msg);
                                None
                            }
                            (Ok(ClientMessage::Hello { window_id: id, role }), None) => {
                                match state.register(id, role, &tx) {
                                    Ok(()) => {
                                        info!("Window {} connected as {:?}", id, role);
                                        window_id = Some(id);
                                        None
                                    }
                                    Err(message) => {
                                        warn!("Rejected window {}: {}", id, message);
                                        Some(ServerMessage::Error { message })
                                    }
                                }
                            }
                            (Ok(_), None) => Some(ServerMessage::error("Say hello first")),
                            (Err(e), _) => {
                                warn!("Invalid message from {:?}: {}", window_id, e);
                                Some(ServerMessage::error(format!("Invalid message: {}", e)))
                            }
                        };
                        if let Some(frame) = reply.as_ref().and_then(encode) {
                            if sender.send(frame).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break;
                    }
                    Some(Ok(_)) => {} // Ignore binary, ping/pong
                    Some(Err(e)) => {
                        warn!("WebSocket error for {:?}: {}", window_id, e);
                        break;
                    }
                }
            }

            // Handle messages routed to this window
            Some(msg) = rx.recv() => {
                if let Some(frame) = encode(&msg) {
                    if sender.send(frame).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    // Cleanup on disconnect
    if let Some(id) = window_id {
        state.unregister(id);
        info!("Window {} disconnected", id);
    }
}
