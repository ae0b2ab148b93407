//! scenecast core library
//!
//! Scene graph, transform geometry and replicated window state for a live
//! video compositor controlled from several windows at once.

pub mod config;
pub mod geometry;
pub mod hub;
pub mod port;
pub mod replication;
pub mod scene;
pub mod selection;
pub mod sources;
pub mod store;
pub mod sync;

pub use config::{StoreConfig, SyncConfig};
pub use geometry::{Axis, Crop, GeometryError, ScalableRectangle};
pub use hub::{Envelope, Hub, HubError};
pub use port::{DetachedPort, LayerHandle, MemoryPort, PortError, SourceControlPort};
pub use replication::{PendingId, ReplicaSync};
pub use scene::{Node, NodeKind, Scene, SceneError, SceneItem, SceneItemFolder, Transform, TransformPatch};
pub use selection::Selection;
pub use sources::{MergedView, Source, SourceKind, SourceProperty};
pub use store::{Mutation, Store, StoreError, StoreEvent, StorePhase, WindowRole};
pub use sync::{ClientMessage, ConnectionState, ServerMessage, SyncError, SyncEvent, WindowId};
#[cfg(not(target_arch = "wasm32"))]
pub use sync::NativeHubClient;
