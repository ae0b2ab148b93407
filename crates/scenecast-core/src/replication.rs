//! Per-window replication engine.
//!
//! [`ReplicaSync`] sits between a [`Store`] and the hub connection. It does
//! no I/O itself: incoming [`ServerMessage`]s are fed to
//! [`ReplicaSync::handle_message`] and outgoing [`ClientMessage`]s are
//! drained with [`ReplicaSync::take_outgoing`], so the same engine runs over
//! the native client or an in-process hub.
//!
//! Ordinary mutations are fire-and-forget broadcasts. Id allocation is the
//! one request that must be answered before the caller proceeds, since a
//! new scene, source or node cannot be created without its id.

use crate::config::SyncConfig;
use crate::store::{Mutation, Store, StorePhase, WindowRole};
#[cfg(not(target_arch = "wasm32"))]
use crate::sync::NativeHubClient;
use crate::sync::{ClientMessage, ConnectionState, ServerMessage, SyncError, SyncEvent, WindowId};
use futures::channel::oneshot;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

type IdReply = Result<String, SyncError>;

/// A pending id allocation. Resolves once the hub answers, the request
/// times out or the connection drops.
pub struct PendingId {
    request_id: u64,
    rx: oneshot::Receiver<IdReply>,
}

impl PendingId {
    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    /// Non-blocking check for the reply.
    pub fn try_take(&mut self) -> Option<IdReply> {
        match self.rx.try_recv() {
            Ok(reply) => reply,
            Err(oneshot::Canceled) => Some(Err(SyncError::Disconnected)),
        }
    }
}

impl Future for PendingId {
    type Output = IdReply;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(reply)) => Poll::Ready(reply),
            Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(SyncError::Disconnected)),
            Poll::Pending => Poll::Pending,
        }
    }
}

struct IdRequest {
    deadline: Instant,
    tx: oneshot::Sender<IdReply>,
}

/// A broadcast that arrived before the replica was live.
struct HeldBroadcast {
    from: WindowId,
    seq: u64,
    mutation: Mutation,
}

/// Binds one window's [`Store`] to the hub.
pub struct ReplicaSync {
    window_id: WindowId,
    config: SyncConfig,
    state: ConnectionState,
    main_window_id: Option<WindowId>,
    outgoing: Vec<ClientMessage>,
    snapshot_deadline: Option<Instant>,
    /// Highest broadcast sequence number handled so far
    last_seq: u64,
    held: Vec<HeldBroadcast>,
    id_requests: HashMap<u64, IdRequest>,
    next_request_id: u64,
}

impl ReplicaSync {
    pub fn new(window_id: WindowId, config: SyncConfig) -> Self {
        Self {
            window_id,
            config,
            state: ConnectionState::Disconnected,
            main_window_id: None,
            outgoing: Vec::new(),
            snapshot_deadline: None,
            last_seq: 0,
            held: Vec::new(),
            id_requests: HashMap::new(),
            next_request_id: 0,
        }
    }

    pub fn window_id(&self) -> WindowId {
        self.window_id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Main window id announced by the hub, if any.
    pub fn main_window_id(&self) -> Option<WindowId> {
        self.main_window_id
    }

    /// Whether a snapshot request is outstanding.
    pub fn is_awaiting_snapshot(&self) -> bool {
        self.snapshot_deadline.is_some()
    }

    /// Register with the hub. Child windows also ask for a snapshot.
    pub fn connect(&mut self, store: &mut Store, now: Instant) {
        log::info!("Window {} connecting as {:?}", self.window_id, store.role());
        self.state = ConnectionState::Connected;
        self.outgoing.push(ClientMessage::Hello {
            window_id: self.window_id,
            role: store.role(),
        });
        if store.role() == WindowRole::Child {
            self.request_snapshot(store, now);
        }
    }

    /// Ask the main window for its state. Broadcasts are held until the
    /// snapshot arrives, then the ones it does not cover are replayed.
    pub fn request_snapshot(&mut self, store: &mut Store, now: Instant) {
        if store.role() == WindowRole::Main {
            log::warn!("Main window {} never requests snapshots", self.window_id);
            return;
        }
        store.begin_sync();
        self.snapshot_deadline = Some(now + self.config.snapshot_timeout());
        self.outgoing.push(ClientMessage::SnapshotRequest {
            requesting_window_id: self.window_id,
        });
    }

    /// Recover a desynced replica.
    pub fn resync(&mut self, store: &mut Store, now: Instant) {
        log::info!("Window {} resyncing (was {:?})", self.window_id, self.state);
        if self.state == ConnectionState::Desynced {
            self.state = ConnectionState::Connected;
        }
        self.request_snapshot(store, now);
    }

    /// Feed an event from the hub client.
    pub fn handle_event(&mut self, store: &mut Store, event: SyncEvent, now: Instant) -> Result<(), SyncError> {
        match event {
            SyncEvent::Connected => {
                self.connect(store, now);
                Ok(())
            }
            SyncEvent::Disconnected => {
                self.disconnected();
                Ok(())
            }
            SyncEvent::Message(msg) => self.handle_message(store, msg, now),
            SyncEvent::Error { message } => {
                self.state = ConnectionState::Error;
                Err(SyncError::Transport(message))
            }
        }
    }

    /// Apply one message from the hub.
    pub fn handle_message(&mut self, store: &mut Store, msg: ServerMessage, now: Instant) -> Result<(), SyncError> {
        match msg {
            ServerMessage::Welcome { window_id, main_window_id } => {
                if window_id != self.window_id {
                    log::warn!("Hub welcomed window {} but this is window {}", window_id, self.window_id);
                }
                log::info!("Window {} registered, main window {:?}", self.window_id, main_window_id);
                self.main_window_id = main_window_id;
            }
            ServerMessage::MutationBroadcast { from, seq, mutation } => {
                if from == self.window_id {
                    log::debug!("Ignoring own broadcast of {}", mutation.name());
                    return Ok(());
                }
                if store.phase() != StorePhase::Live {
                    log::debug!("Holding {} #{} from window {} while {:?}", mutation.name(), seq, from, store.phase());
                    self.held.push(HeldBroadcast { from, seq, mutation });
                    return Ok(());
                }
                return self.apply_broadcast(store, seq, mutation, now);
            }
            ServerMessage::SnapshotRequest { requesting_window_id } => {
                if store.role() != WindowRole::Main {
                    log::warn!("Child window {} got a snapshot request, ignoring", self.window_id);
                    return Ok(());
                }
                // Pending broadcasts reach the hub before the response, so
                // the requester sees them ahead of the snapshot that covers them.
                self.flush_outbox(store);
                let state = store.snapshot()?;
                log::info!("Sending snapshot at #{} to window {}", self.last_seq, requesting_window_id);
                self.outgoing.push(ClientMessage::SnapshotResponse {
                    requesting_window_id,
                    seq: self.last_seq,
                    state,
                });
            }
            ServerMessage::SnapshotResponse { from, seq, state } => {
                if store.phase() != StorePhase::Syncing {
                    log::debug!("Ignoring unsolicited snapshot in {:?}", store.phase());
                    return Ok(());
                }
                store.load_snapshot(state)?;
                self.snapshot_deadline = None;
                self.last_seq = self.last_seq.max(seq);
                if self.state == ConnectionState::Desynced {
                    self.state = ConnectionState::Connected;
                }
                return self.replay_held(store, from, seq, now);
            }
            ServerMessage::IdAllocated { request_id, id } => match self.id_requests.remove(&request_id) {
                Some(request) => {
                    let _ = request.tx.send(Ok(id));
                }
                None => log::debug!("Id allocation {} is no longer pending", request_id),
            },
            ServerMessage::WindowJoined { window_id, role } => {
                log::info!("Window {} joined as {:?}", window_id, role);
                if role == WindowRole::Main {
                    self.main_window_id = Some(window_id);
                }
            }
            ServerMessage::WindowLeft { window_id } => {
                log::info!("Window {} left", window_id);
                if self.main_window_id == Some(window_id) {
                    log::warn!("Main window {} is gone", window_id);
                    self.main_window_id = None;
                }
            }
            ServerMessage::Error { message } => {
                log::error!("Hub error: {}", message);
                return Err(SyncError::Hub(message));
            }
        }
        Ok(())
    }

    fn apply_broadcast(&mut self, store: &mut Store, seq: u64, mutation: Mutation, now: Instant) -> Result<(), SyncError> {
        self.last_seq = self.last_seq.max(seq);
        if let Err(err) = store.apply_remote(mutation) {
            if err.is_stale_reference() && store.role() == WindowRole::Child {
                log::warn!("Replica of window {} is stale ({}), requesting a snapshot", self.window_id, err);
                self.request_snapshot(store, now);
            }
            return Err(err.into());
        }
        Ok(())
    }

    /// Replay the broadcasts held while syncing that the snapshot from
    /// `source` does not already contain. A snapshot covers everything the
    /// source window sent itself and everything relayed up to `snapshot_seq`.
    fn replay_held(&mut self, store: &mut Store, source: WindowId, snapshot_seq: u64, now: Instant) -> Result<(), SyncError> {
        let mut first_err = None;
        for held in std::mem::take(&mut self.held) {
            if held.from == source || held.seq <= snapshot_seq {
                log::debug!("Snapshot already covers {} #{}", held.mutation.name(), held.seq);
                continue;
            }
            // A failed replay may have started another resync
            if store.phase() != StorePhase::Live {
                self.held.push(held);
                continue;
            }
            log::debug!("Replaying {} #{} from window {}", held.mutation.name(), held.seq, held.from);
            if let Err(err) = self.apply_broadcast(store, held.seq, held.mutation, now) {
                log::warn!("Replaying #{} failed: {}", held.seq, err);
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Request a fresh id from the hub.
    pub fn allocate_id(&mut self, now: Instant) -> PendingId {
        self.next_request_id += 1;
        let request_id = self.next_request_id;
        let (tx, rx) = oneshot::channel();

        if matches!(self.state, ConnectionState::Disconnected | ConnectionState::Error) {
            let _ = tx.send(Err(SyncError::Disconnected));
        } else {
            self.outgoing.push(ClientMessage::AllocateId { request_id });
            self.id_requests.insert(
                request_id,
                IdRequest {
                    deadline: now + self.config.id_timeout(),
                    tx,
                },
            );
        }
        PendingId { request_id, rx }
    }

    /// Expire overdue requests.
    ///
    /// Overdue id allocations resolve with [`SyncError::IdAllocationTimeout`].
    /// An overdue snapshot moves the connection to
    /// [`ConnectionState::Desynced`] and is returned as
    /// [`SyncError::SnapshotTimeout`].
    pub fn tick(&mut self, now: Instant) -> Result<(), SyncError> {
        let expired: Vec<u64> = self
            .id_requests
            .iter()
            .filter(|(_, request)| now >= request.deadline)
            .map(|(request_id, _)| *request_id)
            .collect();
        for request_id in expired {
            if let Some(request) = self.id_requests.remove(&request_id) {
                log::warn!("Id allocation {} timed out", request_id);
                let _ = request.tx.send(Err(SyncError::IdAllocationTimeout(request_id)));
            }
        }

        if self.snapshot_deadline.is_some_and(|deadline| now >= deadline) {
            self.snapshot_deadline = None;
            self.state = ConnectionState::Desynced;
            log::error!("Window {} got no snapshot in time, reconnect needed", self.window_id);
            return Err(SyncError::SnapshotTimeout);
        }
        Ok(())
    }

    /// Drain everything that should go to the hub, in order.
    pub fn take_outgoing(&mut self, store: &mut Store) -> Vec<ClientMessage> {
        self.flush_outbox(store);
        std::mem::take(&mut self.outgoing)
    }

    /// One turn of the window loop over a native hub connection: feed every
    /// received event to the engine, then send what it queued. Nothing is
    /// drained before the connection is up and the hello is queued.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn pump(&mut self, store: &mut Store, client: &mut NativeHubClient, now: Instant) -> Vec<SyncError> {
        let mut errors = Vec::new();
        for event in client.poll_events() {
            if let Err(err) = self.handle_event(store, event, now) {
                errors.push(err);
            }
        }
        if let Err(err) = self.tick(now) {
            errors.push(err);
        }
        let registered = matches!(self.state, ConnectionState::Connected | ConnectionState::Desynced);
        if registered && client.is_connected() {
            if let Err(err) = client.send_all(self.take_outgoing(store)) {
                log::error!("Window {} could not reach the hub: {}", self.window_id, err);
                errors.push(err);
            }
        }
        errors
    }

    fn flush_outbox(&mut self, store: &mut Store) {
        self.outgoing.extend(
            store
                .take_outbox()
                .into_iter()
                .map(|mutation| ClientMessage::MutationBroadcast { mutation }),
        );
    }

    fn disconnected(&mut self) {
        log::info!("Window {} disconnected from hub", self.window_id);
        self.state = ConnectionState::Disconnected;
        self.snapshot_deadline = None;
        self.main_window_id = None;
        self.held.clear();
        for (_, request) in self.id_requests.drain() {
            let _ = request.tx.send(Err(SyncError::Disconnected));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::port::MemoryPort;
    use crate::store::Mutation;
    use std::time::Duration;

    fn main_store() -> Store {
        Store::main(Box::new(MemoryPort::new()), StoreConfig::default())
    }

    fn add_scene(id: &str) -> Mutation {
        Mutation::AddScene { id: id.to_string(), name: id.to_uppercase() }
    }

    #[test]
    fn test_connect_main_sends_hello_only() {
        let mut store = main_store();
        let mut sync = ReplicaSync::new(1, SyncConfig::default());
        sync.connect(&mut store, Instant::now());

        assert_eq!(
            sync.take_outgoing(&mut store),
            vec![ClientMessage::Hello { window_id: 1, role: WindowRole::Main }]
        );
        assert!(!sync.is_awaiting_snapshot());
        assert_eq!(store.phase(), StorePhase::Live);
    }

    #[test]
    fn test_connect_child_requests_snapshot() {
        let mut store = Store::child(StoreConfig::default());
        let mut sync = ReplicaSync::new(2, SyncConfig::default());
        sync.connect(&mut store, Instant::now());

        assert_eq!(store.phase(), StorePhase::Syncing);
        assert!(sync.is_awaiting_snapshot());
        assert_eq!(
            sync.take_outgoing(&mut store),
            vec![
                ClientMessage::Hello { window_id: 2, role: WindowRole::Child },
                ClientMessage::SnapshotRequest { requesting_window_id: 2 },
            ]
        );
    }

    #[test]
    fn test_broadcasts_held_while_syncing_then_replayed() {
        let mut store = Store::child(StoreConfig::default());
        let mut sync = ReplicaSync::new(2, SyncConfig::default());
        let now = Instant::now();
        sync.connect(&mut store, now);

        let held = [
            // Covered by the snapshot: relayed before it was taken
            ServerMessage::MutationBroadcast { from: 3, seq: 1, mutation: add_scene("s1") },
            // Covered by the snapshot: sent by the snapshot's own window
            ServerMessage::MutationBroadcast {
                from: 1,
                seq: 2,
                mutation: Mutation::RenameScene { id: "s1".to_string(), name: "From main".to_string() },
            },
            // Newer than the snapshot
            ServerMessage::MutationBroadcast { from: 3, seq: 3, mutation: add_scene("s2") },
        ];
        for msg in held {
            sync.handle_message(&mut store, msg, now).unwrap();
        }
        assert!(store.scenes().is_empty());

        let mut main = main_store();
        main.commit(add_scene("s1")).unwrap();
        let state = main.snapshot().unwrap();
        sync.handle_message(&mut store, ServerMessage::SnapshotResponse { from: 1, seq: 1, state }, now)
            .unwrap();

        assert!(store.is_live());
        assert_eq!(store.scene("s1").unwrap().name(), "S1");
        assert!(store.scene("s2").is_some());
        assert_eq!(store.scenes().len(), 2);
    }

    #[test]
    fn test_held_broadcasts_cleared_on_disconnect() {
        let mut store = Store::child(StoreConfig::default());
        let mut sync = ReplicaSync::new(2, SyncConfig::default());
        let now = Instant::now();
        sync.connect(&mut store, now);
        let msg = ServerMessage::MutationBroadcast { from: 3, seq: 5, mutation: add_scene("s1") };
        sync.handle_message(&mut store, msg, now).unwrap();

        sync.handle_event(&mut store, SyncEvent::Disconnected, now).unwrap();
        sync.connect(&mut store, now);
        let state = main_store().snapshot().unwrap();
        sync.handle_message(&mut store, ServerMessage::SnapshotResponse { from: 1, seq: 0, state }, now)
            .unwrap();
        assert!(store.scenes().is_empty());
    }

    #[test]
    fn test_remote_mutation_is_not_rebroadcast() {
        let mut store = main_store();
        let mut sync = ReplicaSync::new(1, SyncConfig::default());
        let now = Instant::now();
        sync.connect(&mut store, now);
        sync.take_outgoing(&mut store);

        let msg = ServerMessage::MutationBroadcast { from: 2, seq: 1, mutation: add_scene("s1") };
        sync.handle_message(&mut store, msg, now).unwrap();
        assert!(store.scene("s1").is_some());
        assert!(sync.take_outgoing(&mut store).is_empty());
    }

    #[test]
    fn test_snapshot_response_flushes_pending_broadcasts_first() {
        let mut store = main_store();
        let mut sync = ReplicaSync::new(1, SyncConfig::default());
        let now = Instant::now();
        sync.connect(&mut store, now);
        sync.take_outgoing(&mut store);

        let relayed = ServerMessage::MutationBroadcast { from: 3, seq: 7, mutation: add_scene("s0") };
        sync.handle_message(&mut store, relayed, now).unwrap();
        store.commit(add_scene("s1")).unwrap();
        sync.handle_message(&mut store, ServerMessage::SnapshotRequest { requesting_window_id: 5 }, now)
            .unwrap();

        let out = sync.take_outgoing(&mut store);
        assert_eq!(out.len(), 2);
        assert!(matches!(out[0], ClientMessage::MutationBroadcast { .. }));
        match &out[1] {
            ClientMessage::SnapshotResponse { requesting_window_id, seq, state } => {
                assert_eq!(*requesting_window_id, 5);
                assert_eq!(*seq, 7);
                assert_eq!(state["scenes"][1]["id"], "s1");
            }
            other => panic!("Expected snapshot response, got {:?}", other),
        }
    }

    #[test]
    fn test_snapshot_timeout_desyncs_and_resync_recovers() {
        let config = SyncConfig { snapshot_timeout_ms: 100, ..SyncConfig::default() };
        let mut store = Store::child(StoreConfig::default());
        let mut sync = ReplicaSync::new(2, config);
        let start = Instant::now();
        sync.connect(&mut store, start);
        sync.take_outgoing(&mut store);

        sync.tick(start + Duration::from_millis(50)).unwrap();
        assert!(matches!(
            sync.tick(start + Duration::from_millis(100)),
            Err(SyncError::SnapshotTimeout)
        ));
        assert_eq!(sync.state(), ConnectionState::Desynced);
        assert_eq!(store.phase(), StorePhase::Syncing);
        // Reported once
        sync.tick(start + Duration::from_millis(500)).unwrap();

        let later = start + Duration::from_secs(1);
        sync.resync(&mut store, later);
        assert_eq!(sync.state(), ConnectionState::Connected);
        assert_eq!(
            sync.take_outgoing(&mut store),
            vec![ClientMessage::SnapshotRequest { requesting_window_id: 2 }]
        );

        let state = main_store().snapshot().unwrap();
        sync.handle_message(&mut store, ServerMessage::SnapshotResponse { from: 1, seq: 0, state }, later)
            .unwrap();
        assert!(store.is_live());
        assert!(!sync.is_awaiting_snapshot());
    }

    #[test]
    fn test_allocate_id_resolves() {
        let mut store = main_store();
        let mut sync = ReplicaSync::new(1, SyncConfig::default());
        let now = Instant::now();
        sync.connect(&mut store, now);
        sync.take_outgoing(&mut store);

        let mut pending = sync.allocate_id(now);
        assert!(pending.try_take().is_none());
        assert_eq!(
            sync.take_outgoing(&mut store),
            vec![ClientMessage::AllocateId { request_id: pending.request_id() }]
        );

        let reply = ServerMessage::IdAllocated {
            request_id: pending.request_id(),
            id: "fresh".to_string(),
        };
        sync.handle_message(&mut store, reply, now).unwrap();
        assert_eq!(futures::executor::block_on(pending).unwrap(), "fresh");
    }

    #[test]
    fn test_allocate_id_timeout_and_disconnect() {
        let config = SyncConfig { id_timeout_ms: 10, ..SyncConfig::default() };
        let mut store = main_store();
        let mut sync = ReplicaSync::new(1, config);
        let now = Instant::now();

        let mut offline = sync.allocate_id(now);
        assert!(matches!(offline.try_take(), Some(Err(SyncError::Disconnected))));

        sync.connect(&mut store, now);
        let mut slow = sync.allocate_id(now);
        let dropped = sync.allocate_id(now + Duration::from_millis(5));
        sync.tick(now + Duration::from_millis(10)).unwrap();
        assert!(matches!(slow.try_take(), Some(Err(SyncError::IdAllocationTimeout(_)))));

        sync.handle_event(&mut store, SyncEvent::Disconnected, now).unwrap();
        assert_eq!(sync.state(), ConnectionState::Disconnected);
        assert!(matches!(
            futures::executor::block_on(dropped),
            Err(SyncError::Disconnected)
        ));
    }

    #[test]
    fn test_stale_reference_triggers_resync_on_child() {
        let mut store = Store::child(StoreConfig::default());
        let mut sync = ReplicaSync::new(2, SyncConfig::default());
        let now = Instant::now();
        sync.connect(&mut store, now);
        let state = main_store().snapshot().unwrap();
        sync.handle_message(&mut store, ServerMessage::SnapshotResponse { from: 1, seq: 0, state }, now)
            .unwrap();
        sync.take_outgoing(&mut store);

        let msg = ServerMessage::MutationBroadcast {
            from: 1,
            seq: 1,
            mutation: Mutation::RenameScene { id: "ghost".to_string(), name: "X".to_string() },
        };
        let err = sync.handle_message(&mut store, msg, now).unwrap_err();
        assert!(err.needs_resync());
        assert_eq!(store.phase(), StorePhase::Syncing);
        assert_eq!(
            sync.take_outgoing(&mut store),
            vec![ClientMessage::SnapshotRequest { requesting_window_id: 2 }]
        );
    }

    #[test]
    fn test_hub_error_surfaces() {
        let mut store = main_store();
        let mut sync = ReplicaSync::new(1, SyncConfig::default());
        let err = sync
            .handle_message(&mut store, ServerMessage::error("No main window connected"), Instant::now())
            .unwrap_err();
        assert!(matches!(err, SyncError::Hub(message) if message == "No main window connected"));
    }
}
