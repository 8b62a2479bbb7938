//! The shared-document abstraction.
//!
//! A [`SharedDocument`] is one file's collaborative content: a CRDT document
//! plus its presence state. Concrete variants ([`TextDocument`],
//! [`NotebookDocument`]) are produced by registered factories; callers load
//! and materialize content through the uniform serialized-JSON capability and
//! never branch on the concrete type.
//!
//! [`TextDocument`]: super::text_doc::TextDocument
//! [`NotebookDocument`]: super::notebook_doc::NotebookDocument

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use yrs::updates::decoder::Decode;
use yrs::{Any, Doc, Transact, Update};

use super::presence::PresenceState;
use crate::contents::SourceFormat;
use crate::error::{DriveError, Result};

/// Options describing the document to create or open.
#[derive(Debug, Clone)]
pub struct DocumentOptions {
    /// Namespace path of the file.
    pub path: String,
    /// Source format. `None` signals a transient, non-collaborative request.
    pub format: Option<SourceFormat>,
    /// Content-type tag used for factory lookup.
    pub content_type: String,
}

impl DocumentOptions {
    /// Options for a persisted document at `path`.
    pub fn new(path: &str, format: SourceFormat, content_type: &str) -> Self {
        Self {
            path: path.to_string(),
            format: Some(format),
            content_type: content_type.to_string(),
        }
    }
}

/// Teardown hook registered on a document.
pub type DisposeHook = Box<dyn FnOnce() + Send>;

/// One file's collaborative content.
///
/// The trait is dyn-safe; documents are shared as `Arc<dyn SharedDocument>`.
pub trait SharedDocument: std::fmt::Debug + Send + Sync {
    /// The backing CRDT document. Cloning shares the underlying store.
    fn doc(&self) -> &Doc;

    /// The document's presence (awareness) state.
    fn presence(&self) -> &Arc<PresenceState>;

    /// The content-type tag this document was created for.
    fn content_type(&self) -> &str;

    /// Bulk-load serialized content into the document.
    ///
    /// Each variant interprets the JSON its own way (raw source string for
    /// files, structured notebook JSON for notebooks); callers never branch
    /// on the concrete type.
    fn load_serialized(&self, content: &serde_json::Value) -> Result<()>;

    /// Materialize the document's content as serialized JSON, the inverse of
    /// [`SharedDocument::load_serialized`].
    fn serialized(&self) -> serde_json::Value;

    /// Register a teardown hook fired exactly once when the document is
    /// disposed. A hook registered after disposal fires immediately.
    fn on_dispose(&self, hook: DisposeHook);

    /// Dispose the document, firing registered teardown hooks. Idempotent.
    fn dispose(&self);

    /// Whether the document has been disposed.
    fn is_disposed(&self) -> bool;
}

/// A factory producing a concrete [`SharedDocument`] for a content type.
pub type DocumentFactory = Arc<dyn Fn(&DocumentOptions) -> Arc<dyn SharedDocument> + Send + Sync>;

/// Shared disposal bookkeeping for document variants: a disposed flag plus
/// the registered teardown hooks.
pub(crate) struct DisposeState {
    disposed: AtomicBool,
    hooks: Mutex<Vec<DisposeHook>>,
}

impl DisposeState {
    pub(crate) fn new() -> Self {
        Self {
            disposed: AtomicBool::new(false),
            hooks: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub(crate) fn register(&self, hook: DisposeHook) {
        if self.is_disposed() {
            hook();
            return;
        }
        let mut hooks = self.hooks.lock().unwrap();
        hooks.push(hook);
    }

    /// Mark disposed and fire hooks. Hooks run outside the lock.
    pub(crate) fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let hooks = {
            let mut hooks = self.hooks.lock().unwrap();
            std::mem::take(&mut *hooks)
        };
        for hook in hooks {
            hook();
        }
    }
}

/// Apply a raw update payload to a document.
pub(crate) fn apply_raw_update(doc: &Doc, update: &[u8]) -> Result<()> {
    let decoded = Update::decode_v1(update)
        .map_err(|e| DriveError::Crdt(format!("failed to decode update: {e}")))?;
    let mut txn = doc.transact_mut();
    txn.apply_update(decoded)
        .map_err(|e| DriveError::Crdt(format!("failed to apply update: {e}")))
}

/// Convert a JSON value into a CRDT `Any` value.
pub(crate) fn json_to_any(value: &serde_json::Value) -> Any {
    match value {
        serde_json::Value::Null => Any::Null,
        serde_json::Value::Bool(b) => Any::from(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Any::from(i)
            } else {
                Any::from(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(s) => Any::from(s.as_str()),
        serde_json::Value::Array(items) => {
            Any::from(items.iter().map(json_to_any).collect::<Vec<Any>>())
        }
        serde_json::Value::Object(fields) => {
            let map: HashMap<String, Any> = fields
                .iter()
                .map(|(k, v)| (k.clone(), json_to_any(v)))
                .collect();
            Any::from(map)
        }
    }
}

/// Convert a CRDT `Any` value back into JSON.
pub(crate) fn any_to_json(value: &Any) -> serde_json::Value {
    match value {
        Any::Null | Any::Undefined => serde_json::Value::Null,
        Any::Bool(b) => serde_json::Value::Bool(*b),
        Any::Number(n) => serde_json::Number::from_f64(*n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Any::BigInt(i) => serde_json::Value::Number((*i).into()),
        Any::String(s) => serde_json::Value::String(s.to_string()),
        Any::Buffer(bytes) => serde_json::Value::Array(
            bytes
                .iter()
                .map(|b| serde_json::Value::Number((*b).into()))
                .collect(),
        ),
        Any::Array(items) => serde_json::Value::Array(items.iter().map(any_to_json).collect()),
        Any::Map(fields) => {
            let mut object = serde_json::Map::new();
            let mut keys: Vec<&String> = fields.keys().collect();
            keys.sort();
            for key in keys {
                object.insert(key.clone(), any_to_json(&fields[key]));
            }
            serde_json::Value::Object(object)
        }
    }
}
