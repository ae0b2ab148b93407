//! Hub routing state.
//!
//! The hub knows which windows are connected and which one is the main
//! window. It does no I/O: every call returns the [`Envelope`]s to deliver,
//! so the server binary and in-process tests share the same routing.

use crate::store::WindowRole;
use crate::sync::{ClientMessage, ServerMessage, WindowId};
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

/// Hub errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HubError {
    #[error("Window {0} is already connected")]
    DuplicateWindow(WindowId),
    #[error("Main window {0} is already connected")]
    MainAlreadyConnected(WindowId),
    #[error("Window {0} has not said hello")]
    UnknownWindow(WindowId),
}

/// A message addressed to one window.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub to: WindowId,
    pub msg: ServerMessage,
}

impl Envelope {
    pub fn new(to: WindowId, msg: ServerMessage) -> Self {
        Self { to, msg }
    }
}

/// Routing state of the hub
#[derive(Debug, Default)]
pub struct Hub {
    windows: BTreeMap<WindowId, WindowRole>,
    main_window: Option<WindowId>,
    next_seq: u64,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    pub fn main_window(&self) -> Option<WindowId> {
        self.main_window
    }

    pub fn contains(&self, window_id: WindowId) -> bool {
        self.windows.contains_key(&window_id)
    }

    /// Register a window. The new window gets a welcome, everybody else a
    /// join notice.
    pub fn join(&mut self, window_id: WindowId, role: WindowRole) -> Result<Vec<Envelope>, HubError> {
        if self.windows.contains_key(&window_id) {
            return Err(HubError::DuplicateWindow(window_id));
        }
        if role == WindowRole::Main {
            if let Some(main) = self.main_window {
                return Err(HubError::MainAlreadyConnected(main));
            }
            self.main_window = Some(window_id);
        }

        let mut out: Vec<Envelope> = self
            .windows
            .keys()
            .map(|&peer| Envelope::new(peer, ServerMessage::WindowJoined { window_id, role }))
            .collect();
        self.windows.insert(window_id, role);
        out.push(Envelope::new(
            window_id,
            ServerMessage::Welcome {
                window_id,
                main_window_id: self.main_window,
            },
        ));
        log::info!("Window {} joined as {:?} ({} connected)", window_id, role, self.windows.len());
        Ok(out)
    }

    /// Unregister a window and tell the others.
    pub fn leave(&mut self, window_id: WindowId) -> Vec<Envelope> {
        if self.windows.remove(&window_id).is_none() {
            return Vec::new();
        }
        if self.main_window == Some(window_id) {
            log::warn!("Main window {} left", window_id);
            self.main_window = None;
        }
        log::info!("Window {} left ({} connected)", window_id, self.windows.len());
        self.broadcast(window_id, ServerMessage::WindowLeft { window_id })
    }

    /// Route a message from a registered window.
    pub fn handle(&mut self, from: WindowId, msg: ClientMessage) -> Vec<Envelope> {
        if let ClientMessage::Hello { window_id, role } = msg {
            if self.windows.contains_key(&from) {
                return vec![Envelope::new(from, ServerMessage::error("Already registered"))];
            }
            return self.join(window_id, role).unwrap_or_else(|err| {
                vec![Envelope::new(from, ServerMessage::error(err.to_string()))]
            });
        }
        if !self.windows.contains_key(&from) {
            log::warn!("Message from unregistered window {}", from);
            return vec![Envelope::new(
                from,
                ServerMessage::error(HubError::UnknownWindow(from).to_string()),
            )];
        }

        match msg {
            ClientMessage::Hello { .. } => Vec::new(),
            ClientMessage::MutationBroadcast { mutation } => {
                self.next_seq += 1;
                let seq = self.next_seq;
                log::debug!("Relaying {} #{} from window {}", mutation.name(), seq, from);
                self.broadcast(from, ServerMessage::MutationBroadcast { from, seq, mutation })
            }
            ClientMessage::SnapshotRequest { requesting_window_id } => {
                if requesting_window_id != from {
                    log::warn!("Window {} asked for a snapshot on behalf of {}", from, requesting_window_id);
                }
                match self.main_window {
                    Some(main) => vec![Envelope::new(
                        main,
                        ServerMessage::SnapshotRequest { requesting_window_id: from },
                    )],
                    None => vec![Envelope::new(from, ServerMessage::error("No main window connected"))],
                }
            }
            ClientMessage::SnapshotResponse { requesting_window_id, seq, state } => {
                if self.main_window != Some(from) {
                    return vec![Envelope::new(
                        from,
                        ServerMessage::error("Only the main window answers snapshot requests"),
                    )];
                }
                if !self.windows.contains_key(&requesting_window_id) {
                    log::warn!("Snapshot for unknown window {}", requesting_window_id);
                    return vec![Envelope::new(
                        from,
                        ServerMessage::error(format!("Unknown window {}", requesting_window_id)),
                    )];
                }
                vec![Envelope::new(
                    requesting_window_id,
                    ServerMessage::SnapshotResponse { from, seq, state },
                )]
            }
            ClientMessage::AllocateId { request_id } => vec![Envelope::new(
                from,
                ServerMessage::IdAllocated {
                    request_id,
                    id: Uuid::new_v4().to_string(),
                },
            )],
        }
    }

    fn broadcast(&self, except: WindowId, msg: ServerMessage) -> Vec<Envelope> {
        self.windows
            .keys()
            .filter(|&&peer| peer != except)
            .map(|&peer| Envelope::new(peer, msg.clone()))
            .collect()
    }
}
