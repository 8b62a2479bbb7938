//! CRDT-backed collaboration primitives.
//!
//! Everything replicated lives here: the namespace tree, the shared-document
//! variants and their factory registry, presence state, the sync wire
//! framing, the transport abstraction with its in-process and WebSocket
//! implementations, the per-document sync channel, and the optional offline
//! mirror.

mod cache;
mod channel;
mod document;
mod memory_transport;
mod notebook_doc;
mod presence;
mod protocol;
mod registry;
mod text_doc;
mod transport;
mod tree;
mod ws_transport;

pub(crate) use document::apply_raw_update;

pub use cache::{DocCache, MemoryCache, UpdateOrigin};
pub use channel::{ChannelOptions, SyncChannel};
pub use document::{DisposeHook, DocumentFactory, DocumentOptions, SharedDocument};
pub use memory_transport::{MemoryHub, MemoryTransport};
pub use notebook_doc::NotebookDocument;
pub use presence::{LocalUser, PresenceCallback, PresenceState, PresenceUpdate, UserIdentity};
pub use protocol::{is_sync_step2, SyncMessage};
pub use registry::DocumentFactoryRegistry;
pub use text_doc::TextDocument;
pub use transport::{
    resolve_endpoints, ChannelConfig, ConnectionStatus, MessageCallback, PeerTransport,
    StatusCallback, TransportFactory,
};
pub use tree::{DirEntry, FileId, ReplicatedTree, TreeNode};
pub use ws_transport::{WsTransport, WsTransportFactory};
