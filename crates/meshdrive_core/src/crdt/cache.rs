//! Optional offline mirror for document state.
//!
//! A [`DocCache`] persists document updates keyed by the same identifier the
//! provider cache uses (the namespace document's well-known id, or a file's
//! marker). It is populated opportunistically from update observers and read
//! back at startup, before the transport sync completes. It is never
//! authoritative; whatever the peers converge on wins.

use std::collections::HashMap;
use std::sync::Mutex;

/// Origin of a document update, used for attribution in logs and mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOrigin {
    /// The update originated from a local mutation.
    Local,
    /// The update arrived from a remote peer after the initial sync.
    Remote,
    /// The update was part of an initial sync exchange or a mirror replay.
    Sync,
}

impl std::fmt::Display for UpdateOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateOrigin::Local => write!(f, "local"),
            UpdateOrigin::Remote => write!(f, "remote"),
            UpdateOrigin::Sync => write!(f, "sync"),
        }
    }
}

/// Persisted local cache of document updates.
///
/// Implementations append raw update payloads per document id and replay
/// them, in insertion order, at startup. Applying each stored update in order
/// reconstructs the last locally observed state.
pub trait DocCache: Send + Sync {
    /// Append an update for `doc_id`.
    fn append_update(&self, doc_id: &str, update: &[u8], origin: UpdateOrigin);

    /// All stored updates for `doc_id`, oldest first.
    fn updates(&self, doc_id: &str) -> Vec<Vec<u8>>;

    /// Drop all stored updates for `doc_id`.
    fn clear(&self, doc_id: &str);
}

/// In-memory [`DocCache`], mainly for tests and short-lived embedders.
#[derive(Default)]
pub struct MemoryCache {
    updates: Mutex<HashMap<String, Vec<Vec<u8>>>>,
}

impl MemoryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of updates stored for `doc_id`.
    pub fn update_count(&self, doc_id: &str) -> usize {
        let updates = self.updates.lock().unwrap();
        updates.get(doc_id).map(Vec::len).unwrap_or(0)
    }
}

impl DocCache for MemoryCache {
    fn append_update(&self, doc_id: &str, update: &[u8], origin: UpdateOrigin) {
        log::trace!(
            "mirroring {origin} update for \"{doc_id}\" ({} bytes)",
            update.len()
        );
        let mut updates = self.updates.lock().unwrap();
        updates
            .entry(doc_id.to_string())
            .or_default()
            .push(update.to_vec());
    }

    fn updates(&self, doc_id: &str) -> Vec<Vec<u8>> {
        let updates = self.updates.lock().unwrap();
        updates.get(doc_id).cloned().unwrap_or_default()
    }

    fn clear(&self, doc_id: &str) {
        let mut updates = self.updates.lock().unwrap();
        updates.remove(doc_id);
    }
}
