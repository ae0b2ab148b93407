//! Hub wire protocol and WebSocket client.
//!
//! Every window talks to the hub over one WebSocket carrying JSON text
//! frames. The hub relays mutation broadcasts, routes snapshot requests to
//! the main window and hands out fresh ids.

use crate::store::{Mutation, StoreError, WindowRole};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifies a window process on the hub.
pub type WindowId = u32;

/// Messages sent from a window to the hub
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Register with the hub. Must be the first message on a connection.
    Hello { window_id: WindowId, role: WindowRole },
    /// A mutation applied locally, for every other window
    MutationBroadcast { mutation: Mutation },
    /// Ask the main window for its shared state
    SnapshotRequest { requesting_window_id: WindowId },
    /// Main window's answer to a snapshot request
    SnapshotResponse {
        requesting_window_id: WindowId,
        /// Highest broadcast sequence number the main window had handled
        /// when it took the snapshot.
        #[serde(default)]
        seq: u64,
        state: serde_json::Value,
    },
    /// Ask for a fresh globally unique id
    AllocateId { request_id: u64 },
}

/// Messages sent from the hub to a window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Registration accepted
    Welcome {
        window_id: WindowId,
        #[serde(skip_serializing_if = "Option::is_none")]
        main_window_id: Option<WindowId>,
    },
    /// Mutation from another window. `seq` grows with every relayed
    /// broadcast.
    MutationBroadcast { from: WindowId, seq: u64, mutation: Mutation },
    /// A child window wants a snapshot (delivered to the main window only)
    SnapshotRequest { requesting_window_id: WindowId },
    /// Snapshot for this window, taken by window `from` after it had
    /// handled every broadcast up to `seq`
    SnapshotResponse {
        from: WindowId,
        seq: u64,
        state: serde_json::Value,
    },
    /// Answer to an `allocate_id` request
    IdAllocated { request_id: u64, id: String },
    /// Another window registered
    WindowJoined { window_id: WindowId, role: WindowRole },
    /// Another window went away
    WindowLeft { window_id: WindowId },
    /// Error message
    Error { message: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error { message: message.into() }
    }
}

/// Errors of the replication protocol.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Snapshot request timed out, reconnect needed")]
    SnapshotTimeout,
    #[error("Id allocation {0} timed out")]
    IdAllocationTimeout(u64),
    #[error("Not connected to the hub")]
    Disconnected,
    #[error("Hub error: {0}")]
    Hub(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    /// The window must resync from a fresh snapshot.
    pub fn needs_resync(&self) -> bool {
        match self {
            SyncError::SnapshotTimeout => true,
            SyncError::Store(err) => err.is_stale_reference(),
            _ => false,
        }
    }
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Connected, but the replica can no longer be trusted. Recover with a
    /// resync.
    Desynced,
    Error,
}

/// Events from the hub client
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Connected to the hub
    Connected,
    /// Disconnected from the hub
    Disconnected,
    /// Message from the hub
    Message(ServerMessage),
    /// Error occurred
    Error { message: String },
}

// ============================================================================
// Native WebSocket Client
// ============================================================================

#[cfg(not(target_arch = "wasm32"))]
mod native_client {
    use super::*;
    use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};
    use std::thread::{self, JoinHandle};
    use std::time::Duration;
    use tungstenite::{Message, connect};
    use url::Url;

    /// Commands sent to the WebSocket thread.
    enum WsCommand {
        Send(String),
        Close,
    }

    /// Hub client for native windows.
    ///
    /// Uses a background thread for non-blocking operation. Events must be
    /// polled via `poll_events()`.
    pub struct NativeHubClient {
        state: ConnectionState,
        events: Vec<SyncEvent>,
        /// Channel to send commands to the WebSocket thread.
        cmd_tx: Option<Sender<WsCommand>>,
        /// Channel to receive events from the WebSocket thread.
        event_rx: Option<Receiver<SyncEvent>>,
        _thread: Option<JoinHandle<()>>,
    }

    impl NativeHubClient {
        /// Create a new disconnected client.
        pub fn new() -> Self {
            Self {
                state: ConnectionState::Disconnected,
                events: Vec::new(),
                cmd_tx: None,
                event_rx: None,
                _thread: None,
            }
        }

        /// Connect to the hub.
        pub fn connect(&mut self, url: &str) -> Result<(), SyncError> {
            if self.cmd_tx.is_some() {
                return Err(SyncError::Transport("Already connected".to_string()));
            }

            let parsed_url =
                Url::parse(url).map_err(|e| SyncError::Transport(format!("Invalid URL: {}", e)))?;
            if parsed_url.scheme() != "ws" && parsed_url.scheme() != "wss" {
                return Err(SyncError::Transport(format!(
                    "Invalid WebSocket URL scheme: {}",
                    parsed_url.scheme()
                )));
            }

            self.state = ConnectionState::Connecting;

            let (cmd_tx, cmd_rx) = channel::<WsCommand>();
            let (event_tx, event_rx) = channel::<SyncEvent>();

            let url = url.to_string();

            let handle = thread::spawn(move || {
                log::info!("Hub client thread: connecting to {}", url);

                match connect(&url) {
                    Ok((mut socket, response)) => {
                        log::info!("Hub connected, status: {}", response.status());
                        let _ = event_tx.send(SyncEvent::Connected);

                        // Short read timeout so outgoing commands are not starved
                        match socket.get_mut() {
                            tungstenite::stream::MaybeTlsStream::Plain(tcp) => {
                                let _ = tcp.set_read_timeout(Some(Duration::from_millis(50)));
                                let _ = tcp.set_write_timeout(Some(Duration::from_secs(5)));
                            }
                            #[allow(unreachable_patterns)]
                            _ => {
                                log::debug!("TLS or other stream - using default timeout handling");
                            }
                        }

                        loop {
                            match cmd_rx.try_recv() {
                                Ok(WsCommand::Send(msg)) => {
                                    log::debug!("Hub client sending: {}", msg.chars().take(100).collect::<String>());
                                    if let Err(e) = socket.send(Message::Text(msg)) {
                                        log::error!("Hub client send error: {}", e);
                                        break;
                                    }
                                }
                                Ok(WsCommand::Close) => {
                                    log::info!("Hub connection close requested");
                                    let _ = socket.close(None);
                                    break;
                                }
                                Err(TryRecvError::Disconnected) => {
                                    log::info!("Hub client command channel disconnected");
                                    break;
                                }
                                Err(TryRecvError::Empty) => {}
                            }

                            match socket.read() {
                                Ok(Message::Text(txt)) => {
                                    match serde_json::from_str::<ServerMessage>(&txt) {
                                        Ok(msg) => {
                                            let _ = event_tx.send(SyncEvent::Message(msg));
                                        }
                                        Err(e) => {
                                            log::warn!("Failed to parse hub message: {} ({})", txt, e);
                                        }
                                    }
                                }
                                Ok(Message::Ping(data)) => {
                                    let _ = socket.send(Message::Pong(data));
                                }
                                Ok(Message::Close(_)) => {
                                    log::info!("Hub sent close frame");
                                    break;
                                }
                                Ok(_) => {}
                                Err(tungstenite::Error::Io(ref e))
                                    if e.kind() == std::io::ErrorKind::WouldBlock
                                        || e.kind() == std::io::ErrorKind::TimedOut =>
                                {
                                    continue;
                                }
                                Err(e) => {
                                    log::error!("Hub client read error: {}", e);
                                    break;
                                }
                            }
                        }

                        log::info!("Hub client thread exiting");
                        let _ = event_tx.send(SyncEvent::Disconnected);
                    }
                    Err(e) => {
                        log::error!("Hub connection failed: {}", e);
                        let _ = event_tx.send(SyncEvent::Error {
                            message: format!("Connection failed: {}", e),
                        });
                    }
                }
            });

            self.cmd_tx = Some(cmd_tx);
            self.event_rx = Some(event_rx);
            self._thread = Some(handle);

            Ok(())
        }

        /// Disconnect from the hub.
        pub fn disconnect(&mut self) {
            if let Some(tx) = self.cmd_tx.take() {
                let _ = tx.send(WsCommand::Close);
            }
            self.event_rx = None;
            self._thread = None;
            self.state = ConnectionState::Disconnected;
        }

        /// Queue a message for the hub.
        pub fn send(&self, msg: &ClientMessage) -> Result<(), SyncError> {
            let Some(tx) = &self.cmd_tx else {
                return Err(SyncError::Disconnected);
            };
            let text = serde_json::to_string(msg)?;
            tx.send(WsCommand::Send(text))
                .map_err(|e| SyncError::Transport(format!("Send failed: {}", e)))
        }

        /// Queue several messages, stopping at the first failure.
        pub fn send_all(&self, msgs: impl IntoIterator<Item = ClientMessage>) -> Result<(), SyncError> {
            for msg in msgs {
                self.send(&msg)?;
            }
            Ok(())
        }

        /// Poll for pending events (non-blocking).
        pub fn poll_events(&mut self) -> Vec<SyncEvent> {
            if let Some(rx) = &self.event_rx {
                while let Ok(event) = rx.try_recv() {
                    match &event {
                        SyncEvent::Connected => self.state = ConnectionState::Connected,
                        SyncEvent::Disconnected => self.state = ConnectionState::Disconnected,
                        SyncEvent::Error { .. } => self.state = ConnectionState::Error,
                        SyncEvent::Message(_) => {}
                    }
                    self.events.push(event);
                }
            }

            std::mem::take(&mut self.events)
        }

        pub fn state(&self) -> ConnectionState {
            self.state
        }

        pub fn is_connected(&self) -> bool {
            self.state == ConnectionState::Connected
        }
    }

    impl Default for NativeHubClient {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Drop for NativeHubClient {
        fn drop(&mut self) {
            self.disconnect();
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub use native_client::NativeHubClient;
