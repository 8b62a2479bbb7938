//! The replicated namespace tree.
//!
//! One CRDT document models the whole filesystem namespace: a root map
//! (named `"content"`) whose entries are keyed by a single path segment.
//! A directory is a nested map of the same shape; a file is an opaque,
//! globally unique identifier string that stays stable across renames.
//!
//! All mutations are synchronous and local-first; merging with remote peers
//! happens through the document's update stream, outside any call made here.
//! Conflict resolution is entirely the map CRDT's: last writer wins per slot,
//! causal merge across slots. No custom conflict handling is layered on top,
//! which leaves three observable races:
//!
//! - [`ReplicatedTree::new_untitled`] picks a name from a locally observed
//!   snapshot; two peers can pick the same name at the same logical time.
//! - [`ReplicatedTree::move_entry`] is a delete + insert pair, not an atomic
//!   rename; concurrent edits to the moved subtree can interleave.
//! - [`ReplicatedTree::create_file`] / [`ReplicatedTree::create_directory`]
//!   silently overwrite an occupied slot.

use std::sync::Arc;

use uuid::Uuid;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Any, Doc, Map, MapPrelim, MapRef, Out, ReadTxn, StateVector, Transact, Update};

use super::cache::UpdateOrigin;
use crate::error::{DriveError, Result};
use crate::path::DrivePath;

/// Name of the root map inside the namespace document.
const CONTENT_MAP_NAME: &str = "content";

/// The opaque stable identifier stored in place of a file's name.
pub type FileId = String;

/// A resolved namespace entry.
#[derive(Debug, Clone)]
pub enum TreeNode {
    /// A directory node (a nested conflict-free map).
    Directory(MapRef),
    /// A file marker.
    File(FileId),
}

/// A single entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// The entry's path segment.
    pub name: String,
    /// Whether the entry is a directory.
    pub is_dir: bool,
}

/// Plain-value copy of a subtree, used by [`ReplicatedTree::move_entry`] to
/// re-insert an entry under its new parent. File ids are copied by value, so
/// identity survives the move.
enum TreeSnapshot {
    File(FileId),
    Directory(Vec<(String, TreeSnapshot)>),
}

/// A CRDT-backed hierarchical namespace.
pub struct ReplicatedTree {
    doc: Doc,
    root: MapRef,
}

impl ReplicatedTree {
    /// Create an empty namespace tree backed by a fresh document.
    pub fn new() -> Self {
        let doc = Doc::new();
        let root = doc.get_or_insert_map(CONTENT_MAP_NAME);
        Self { doc, root }
    }

    /// The backing CRDT document. Cloning shares the underlying store.
    pub fn doc(&self) -> &Doc {
        &self.doc
    }

    /// Walk `parts` from the root, following directory nodes.
    ///
    /// Fails with `NotFound` if a segment is absent and `NotADirectory` if a
    /// walked segment resolves to a file marker.
    fn walk<T: ReadTxn>(&self, txn: &T, parts: &[String]) -> Result<MapRef> {
        let mut current = self.root.clone();
        let mut cwd = String::new();
        for part in parts {
            let value = current.get(txn, part).ok_or_else(|| DriveError::NotFound {
                entry: part.clone(),
                dir: cwd.clone(),
            })?;
            match value {
                Out::YMap(map) => {
                    if cwd.is_empty() {
                        cwd = part.clone();
                    } else {
                        cwd = format!("{cwd}/{part}");
                    }
                    current = map;
                }
                _ => {
                    return Err(DriveError::NotADirectory {
                        entry: part.clone(),
                        dir: cwd,
                    });
                }
            }
        }
        Ok(current)
    }

    /// Resolve a path to a directory node or file marker.
    pub fn resolve(&self, path: &str) -> Result<TreeNode> {
        let parsed = DrivePath::new(path);
        let txn = self.doc.transact();
        let Some(name) = parsed.name() else {
            return Ok(TreeNode::Directory(self.root.clone()));
        };
        let parts = parsed.parts();
        let parent = self.walk(&txn, &parts[..parts.len() - 1])?;
        let value = parent.get(&txn, name).ok_or_else(|| DriveError::NotFound {
            entry: name.to_string(),
            dir: parsed.parent(),
        })?;
        match value {
            Out::YMap(map) => Ok(TreeNode::Directory(map)),
            Out::Any(Any::String(id)) => Ok(TreeNode::File(id.to_string())),
            other => Err(DriveError::Crdt(format!(
                "unexpected namespace entry at \"{path}\": {other:?}"
            ))),
        }
    }

    /// Whether `path` resolves to a directory. The root always is one.
    pub fn is_directory(&self, path: &str) -> Result<bool> {
        Ok(matches!(self.resolve(path)?, TreeNode::Directory(_)))
    }

    /// Whether `path` exists. True for the root; false whenever the parent
    /// walk fails.
    pub fn exists(&self, path: &str) -> bool {
        let parsed = DrivePath::new(path);
        let Some(name) = parsed.name() else {
            return true;
        };
        let txn = self.doc.transact();
        let parts = parsed.parts();
        match self.walk(&txn, &parts[..parts.len() - 1]) {
            Ok(parent) => parent.contains_key(&txn, name),
            Err(_) => false,
        }
    }

    /// Resolve a path that must denote a file, yielding its marker.
    pub fn file_id(&self, path: &str) -> Result<FileId> {
        match self.resolve(path)? {
            TreeNode::File(id) => Ok(id),
            TreeNode::Directory(_) => Err(DriveError::InvalidArgument(format!(
                "\"{path}\" is a directory, not a file"
            ))),
        }
    }

    /// List a directory's children, sorted by name.
    pub fn list_directory(&self, path: &str) -> Result<Vec<DirEntry>> {
        let parsed = DrivePath::new(path);
        let txn = self.doc.transact();
        let dir = self.walk(&txn, parsed.parts())?;
        let mut names: Vec<String> = dir.keys(&txn).map(String::from).collect();
        names.sort();
        let entries = names
            .into_iter()
            .map(|name| {
                let is_dir = matches!(dir.get(&txn, &name), Some(Out::YMap(_)));
                DirEntry { name, is_dir }
            })
            .collect();
        Ok(entries)
    }

    /// Insert a fresh file marker at `path`, returning it.
    ///
    /// An existing entry at the same slot is silently overwritten.
    pub fn create_file(&self, path: &str) -> Result<FileId> {
        let parsed = DrivePath::new(path);
        let name = parsed.name().ok_or_else(|| {
            DriveError::InvalidArgument("cannot create an entry at the namespace root".to_string())
        })?;
        let file_id = Uuid::new_v4().to_string();
        let mut txn = self.doc.transact_mut();
        let parts = parsed.parts();
        let parent = self.walk(&txn, &parts[..parts.len() - 1])?;
        parent.insert(&mut txn, name, file_id.as_str());
        log::debug!("created file \"{path}\" ({file_id})");
        Ok(file_id)
    }

    /// Insert a fresh empty directory at `path`.
    ///
    /// An existing entry at the same slot is silently overwritten.
    pub fn create_directory(&self, path: &str) -> Result<()> {
        let parsed = DrivePath::new(path);
        let name = parsed.name().ok_or_else(|| {
            DriveError::InvalidArgument("cannot create an entry at the namespace root".to_string())
        })?;
        let mut txn = self.doc.transact_mut();
        let parts = parsed.parts();
        let parent = self.walk(&txn, &parts[..parts.len() - 1])?;
        parent.insert(&mut txn, name, MapPrelim::default());
        log::debug!("created directory \"{path}\"");
        Ok(())
    }

    /// Pick the first free `untitledN{ext}` name in `base_path` and create a
    /// file or directory there, returning the new path.
    ///
    /// The scan is check-then-act against the locally observed children; two
    /// peers requesting an untitled name in the same directory at the same
    /// logical time may pick the same `N`.
    pub fn new_untitled(&self, is_dir: bool, base_path: &str, ext: &str) -> Result<String> {
        let parsed = DrivePath::new(base_path);
        let name = {
            let txn = self.doc.transact();
            let dir = self.walk(&txn, parsed.parts())?;
            let mut idx = 0usize;
            loop {
                let candidate = format!("untitled{idx}{ext}");
                if !dir.contains_key(&txn, &candidate) {
                    break candidate;
                }
                idx += 1;
            }
        };
        let new_path = parsed.join(&name);
        if is_dir {
            self.create_directory(&new_path)?;
        } else {
            self.create_file(&new_path)?;
        }
        Ok(new_path)
    }

    /// Remove the entry at `path` from its parent's map.
    ///
    /// Fails with `InvalidArgument` for the root. Removing an absent entry is
    /// a no-op, matching the map CRDT's delete semantics.
    pub fn delete(&self, path: &str) -> Result<()> {
        let parsed = DrivePath::new(path);
        let name = parsed.name().ok_or_else(|| {
            DriveError::InvalidArgument("cannot delete the namespace root".to_string())
        })?;
        let mut txn = self.doc.transact_mut();
        let parts = parsed.parts();
        let parent = self.walk(&txn, &parts[..parts.len() - 1])?;
        parent.remove(&mut txn, name);
        log::debug!("deleted \"{path}\"");
        Ok(())
    }

    /// Move the entry at `from_path` to `to_path`.
    ///
    /// This is a delete + insert pair, not an atomic rename: the entry is
    /// copied by value (deep copy for directories, marker by value for
    /// files), removed from its old parent and inserted under the new one as
    /// two separate document updates. File identity is preserved.
    pub fn move_entry(&self, from_path: &str, to_path: &str) -> Result<()> {
        let from = DrivePath::new(from_path);
        let to = DrivePath::new(to_path);
        let from_name = from.name().ok_or_else(|| {
            DriveError::InvalidArgument("cannot move the namespace root".to_string())
        })?;
        let to_name = to.name().ok_or_else(|| {
            DriveError::InvalidArgument("cannot move to the namespace root".to_string())
        })?;

        let snapshot = {
            let txn = self.doc.transact();
            let from_parts = from.parts();
            let from_parent = self.walk(&txn, &from_parts[..from_parts.len() - 1])?;
            // Resolve the destination parent up front so a bad target leaves
            // the source untouched.
            let to_parts = to.parts();
            self.walk(&txn, &to_parts[..to_parts.len() - 1])?;
            let value = from_parent
                .get(&txn, from_name)
                .ok_or_else(|| DriveError::NotFound {
                    entry: from_name.to_string(),
                    dir: from.parent(),
                })?;
            Self::snapshot(&txn, &value)?
        };

        {
            let mut txn = self.doc.transact_mut();
            let from_parts = from.parts();
            let from_parent = self.walk(&txn, &from_parts[..from_parts.len() - 1])?;
            from_parent.remove(&mut txn, from_name);
        }

        {
            let mut txn = self.doc.transact_mut();
            let to_parts = to.parts();
            let to_parent = self.walk(&txn, &to_parts[..to_parts.len() - 1])?;
            Self::restore(&mut txn, &to_parent, to_name, &snapshot);
        }

        log::debug!("moved \"{from_path}\" -> \"{to_path}\"");
        Ok(())
    }

    fn snapshot<T: ReadTxn>(txn: &T, value: &Out) -> Result<TreeSnapshot> {
        match value {
            Out::Any(Any::String(id)) => Ok(TreeSnapshot::File(id.to_string())),
            Out::YMap(map) => {
                let names: Vec<String> = map.keys(txn).map(String::from).collect();
                let mut children = Vec::with_capacity(names.len());
                for name in names {
                    if let Some(child) = map.get(txn, &name) {
                        children.push((name, Self::snapshot(txn, &child)?));
                    }
                }
                Ok(TreeSnapshot::Directory(children))
            }
            other => Err(DriveError::Crdt(format!(
                "unexpected namespace entry: {other:?}"
            ))),
        }
    }

    fn restore(
        txn: &mut yrs::TransactionMut<'_>,
        parent: &MapRef,
        name: &str,
        snapshot: &TreeSnapshot,
    ) {
        match snapshot {
            TreeSnapshot::File(id) => {
                parent.insert(txn, name, id.as_str());
            }
            TreeSnapshot::Directory(children) => {
                let dir = parent.insert(txn, name, MapPrelim::default());
                for (child_name, child) in children {
                    Self::restore(txn, &dir, child_name, child);
                }
            }
        }
    }

    // ==================== Sync Surface ====================

    /// Encode the current state vector.
    pub fn encode_state_vector(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.state_vector().encode_v1()
    }

    /// Encode the full state as a single update.
    pub fn encode_state_as_update(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    /// Encode the difference between the local state and a remote state
    /// vector.
    pub fn encode_diff(&self, remote_state_vector: &[u8]) -> Result<Vec<u8>> {
        let sv = StateVector::decode_v1(remote_state_vector)
            .map_err(|e| DriveError::Crdt(format!("failed to decode state vector: {e}")))?;
        let txn = self.doc.transact();
        Ok(txn.encode_state_as_update_v1(&sv))
    }

    /// Apply an update produced by another replica (or the offline mirror).
    pub fn apply_update(&self, update: &[u8], origin: UpdateOrigin) -> Result<()> {
        let decoded = Update::decode_v1(update)
            .map_err(|e| DriveError::Crdt(format!("failed to decode update: {e}")))?;
        let mut txn = self.doc.transact_mut();
        txn.apply_update(decoded)
            .map_err(|e| DriveError::Crdt(format!("failed to apply update: {e}")))?;
        log::trace!("applied {origin} update ({} bytes)", update.len());
        Ok(())
    }

    /// Observe document updates. The subscription must be kept alive for the
    /// callback to keep firing.
    pub fn observe_updates<F>(&self, callback: F) -> yrs::Subscription
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        let callback = Arc::new(callback);
        self.doc
            .observe_update_v1(move |_, event| {
                callback(&event.update);
            })
            .expect("Failed to observe namespace document updates")
    }
}

impl Default for ReplicatedTree {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ReplicatedTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let txn = self.doc.transact();
        f.debug_struct("ReplicatedTree")
            .field("root_entries", &self.root.len(&txn))
            .finish_non_exhaustive()
    }
}
