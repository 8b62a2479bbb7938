//! # `meshdrive_core`
//!
//! Core library for meshdrive: a shared, hierarchical collection of named
//! documents that several peers view and edit concurrently with no central
//! arbiter. Concurrent edits merge deterministically through CRDTs; content
//! synchronizes over a pluggable peer transport.
//!
//! The moving parts:
//!
//! - [`path`]: namespace path decomposition
//! - [`crdt`]: the replicated namespace tree, shared documents, presence,
//!   sync channels and transports
//! - [`drive`]: the façade multiplexing open documents over one namespace
//! - [`contents`]: contents models and the classic-storage boundary used by
//!   import/export

#![warn(missing_docs)]

/// Collaboration primitives.
pub mod crdt;

/// Contents models and classic storage.
pub mod contents;

/// The namespace drive façade.
pub mod drive;

/// Error types.
pub mod error;

/// Path decomposition.
pub mod path;

pub use contents::{
    CheckpointModel, ClassicStorage, ContentsModel, CreateOptions, EntryKind, FetchOptions,
    MemoryContents, ModelContent, SaveOptions, SourceFormat,
};
pub use crdt::{
    ChannelConfig, ChannelOptions, ConnectionStatus, DirEntry, DocCache, DocumentFactory,
    DocumentFactoryRegistry, DocumentOptions, FileId, LocalUser, MemoryCache, MemoryHub,
    NotebookDocument, PeerTransport, PresenceState, PresenceUpdate, ReplicatedTree, SharedDocument,
    SyncChannel, TextDocument, TransportFactory, TreeNode, UpdateOrigin, UserIdentity, WsTransport,
    WsTransportFactory,
};
pub use drive::{DriveConfig, DriveEvent, DriveEventCallback, NamespaceDrive, ProviderKey};
pub use error::{DriveError, Result};
pub use path::DrivePath;
