//! Contents models and the classic-storage collaborator boundary.
//!
//! The shared namespace speaks the same model vocabulary as a classic
//! (non-collaborative) contents backend: a [`ContentsModel`] describes a file
//! or directory, optionally carrying content. [`ClassicStorage`] is the
//! interface of that backend, consumed only by import/export.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{DriveError, Result};
use crate::path::DrivePath;

/// Serialization format of a file's source content.
///
/// A request without a concrete format signals a transient, non-persisted
/// shared model and bypasses the provider cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    /// Plain UTF-8 text.
    Text,
    /// Base64-encoded binary content.
    Base64,
    /// Structured JSON content (notebooks).
    Json,
}

impl std::fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceFormat::Text => write!(f, "text"),
            SourceFormat::Base64 => write!(f, "base64"),
            SourceFormat::Json => write!(f, "json"),
        }
    }
}

/// The kind of a namespace entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// A plain file.
    File,
    /// A structured notebook file.
    Notebook,
    /// A directory.
    Directory,
}

impl EntryKind {
    /// The content-type tag used for document-factory lookup.
    pub fn content_type(&self) -> &'static str {
        match self {
            EntryKind::File => "file",
            EntryKind::Notebook => "notebook",
            EntryKind::Directory => "directory",
        }
    }
}

/// Content payload of a [`ContentsModel`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum ModelContent {
    /// No content requested or available.
    #[default]
    Empty,
    /// Directory listing, one stub model per child.
    Listing(Vec<ContentsModel>),
    /// Raw text or base64 source.
    Text(String),
    /// Structured JSON content.
    Json(serde_json::Value),
}

impl ModelContent {
    /// The content as a JSON value suitable for a document bulk load, or
    /// `None` when there is nothing to load.
    pub fn as_json(&self) -> Option<serde_json::Value> {
        match self {
            ModelContent::Empty | ModelContent::Listing(_) => None,
            ModelContent::Text(text) => Some(serde_json::Value::String(text.clone())),
            ModelContent::Json(value) => Some(value.clone()),
        }
    }
}

/// A file or directory model, as exchanged with contents consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentsModel {
    /// Base name of the entry.
    pub name: String,
    /// Namespace-relative path.
    pub path: String,
    /// Entry kind.
    pub kind: EntryKind,
    /// Whether the entry is writable. Always true in the shared namespace.
    pub writable: bool,
    /// Creation timestamp, when known.
    pub created: Option<DateTime<Utc>>,
    /// Last-modification timestamp, when known.
    pub last_modified: Option<DateTime<Utc>>,
    /// MIME type, when known.
    pub mimetype: Option<String>,
    /// Source format of the content, when known.
    pub format: Option<SourceFormat>,
    /// Content payload.
    #[serde(default)]
    pub content: ModelContent,
}

impl ContentsModel {
    /// A content-less stub model for a file at `path`.
    pub fn file_stub(path: &str) -> Self {
        Self::stub(path, EntryKind::File)
    }

    /// A content-less stub model for an entry at `path`.
    pub fn stub(path: &str, kind: EntryKind) -> Self {
        let parsed = DrivePath::new(path);
        Self {
            name: parsed.name().unwrap_or_default().to_string(),
            path: path.to_string(),
            kind,
            writable: true,
            created: None,
            last_modified: None,
            mimetype: None,
            format: None,
            content: ModelContent::Empty,
        }
    }
}

/// Options for fetching a model.
#[derive(Debug, Clone, Copy)]
pub struct FetchOptions {
    /// Whether to include the content payload.
    pub content: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self { content: true }
    }
}

/// Options for creating a new untitled entry.
#[derive(Debug, Clone)]
pub struct CreateOptions {
    /// Directory to create the entry in (`""` = root).
    pub path: String,
    /// Kind of entry to create.
    pub kind: EntryKind,
    /// Extension override; defaults to `.txt` for files and `.ipynb` for
    /// notebooks.
    pub ext: Option<String>,
}

impl CreateOptions {
    /// New-untitled options for a `kind` entry under `path`.
    pub fn new(path: &str, kind: EntryKind) -> Self {
        Self {
            path: path.to_string(),
            kind,
            ext: None,
        }
    }
}

/// Options for saving a model to classic storage.
#[derive(Debug, Clone)]
pub struct SaveOptions {
    /// Entry kind.
    pub kind: EntryKind,
    /// Source format of the content.
    pub format: Option<SourceFormat>,
    /// Content payload.
    pub content: ModelContent,
}

/// A checkpoint descriptor. The shared namespace has no versioning layer, so
/// checkpoints are trivially empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointModel {
    /// Checkpoint identifier.
    pub id: String,
    /// Timestamp of the checkpoint.
    pub last_modified: Option<DateTime<Utc>>,
}

/// The classic (non-collaborative) contents backend, used only as an
/// import/export source. Implementations wrap whatever storage the host
/// application already has.
#[async_trait]
pub trait ClassicStorage: Send + Sync {
    /// Fetch the model at `path`.
    async fn get(&self, path: &str, options: FetchOptions) -> Result<ContentsModel>;

    /// Save content to `path`, returning the resulting model.
    async fn save(&self, path: &str, options: SaveOptions) -> Result<ContentsModel>;
}

#[async_trait]
impl<S: ClassicStorage> ClassicStorage for std::sync::Arc<S> {
    async fn get(&self, path: &str, options: FetchOptions) -> Result<ContentsModel> {
        (**self).get(path, options).await
    }

    async fn save(&self, path: &str, options: SaveOptions) -> Result<ContentsModel> {
        (**self).save(path, options).await
    }
}

/// In-memory [`ClassicStorage`] used by tests and embedders without a real
/// backend.
#[derive(Default)]
pub struct MemoryContents {
    entries: RwLock<HashMap<String, ContentsModel>>,
}

impl MemoryContents {
    /// Create an empty in-memory contents store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a model directly, keyed by its path.
    pub fn insert(&self, model: ContentsModel) {
        let mut entries = self.entries.write().unwrap();
        entries.insert(model.path.clone(), model);
    }

    /// Snapshot of all stored paths.
    pub fn paths(&self) -> Vec<String> {
        let entries = self.entries.read().unwrap();
        let mut paths: Vec<String> = entries.keys().cloned().collect();
        paths.sort();
        paths
    }
}

#[async_trait]
impl ClassicStorage for MemoryContents {
    async fn get(&self, path: &str, options: FetchOptions) -> Result<ContentsModel> {
        let entries = self.entries.read().unwrap();
        let model = entries.get(path).ok_or_else(|| {
            let parsed = DrivePath::new(path);
            DriveError::NotFound {
                entry: parsed.name().unwrap_or_default().to_string(),
                dir: parsed.parent(),
            }
        })?;
        let mut model = model.clone();
        if !options.content {
            model.content = ModelContent::Empty;
        }
        Ok(model)
    }

    async fn save(&self, path: &str, options: SaveOptions) -> Result<ContentsModel> {
        let parsed = DrivePath::new(path);
        let model = ContentsModel {
            name: parsed.name().unwrap_or_default().to_string(),
            path: path.to_string(),
            kind: options.kind,
            writable: true,
            created: Some(Utc::now()),
            last_modified: Some(Utc::now()),
            mimetype: None,
            format: options.format,
            content: options.content,
        };
        let mut entries = self.entries.write().unwrap();
        entries.insert(path.to_string(), model.clone());
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_contents_round_trip() {
        let storage = MemoryContents::new();
        storage
            .save(
                "notes/hello.txt",
                SaveOptions {
                    kind: EntryKind::File,
                    format: Some(SourceFormat::Text),
                    content: ModelContent::Text("hello".to_string()),
                },
            )
            .await
            .unwrap();

        let model = storage
            .get("notes/hello.txt", FetchOptions::default())
            .await
            .unwrap();
        assert_eq!(model.name, "hello.txt");
        assert_eq!(model.kind, EntryKind::File);
        assert_eq!(model.content, ModelContent::Text("hello".to_string()));
    }

    #[tokio::test]
    async fn test_memory_contents_without_content() {
        let storage = MemoryContents::new();
        storage
            .save(
                "a.txt",
                SaveOptions {
                    kind: EntryKind::File,
                    format: Some(SourceFormat::Text),
                    content: ModelContent::Text("x".to_string()),
                },
            )
            .await
            .unwrap();

        let model = storage
            .get("a.txt", FetchOptions { content: false })
            .await
            .unwrap();
        assert_eq!(model.content, ModelContent::Empty);
    }

    #[tokio::test]
    async fn test_memory_contents_missing_path() {
        let storage = MemoryContents::new();
        let err = storage
            .get("missing/file.txt", FetchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DriveError::NotFound { .. }));
    }

    #[test]
    fn test_model_content_as_json() {
        assert_eq!(ModelContent::Empty.as_json(), None);
        assert_eq!(
            ModelContent::Text("hi".to_string()).as_json(),
            Some(serde_json::Value::String("hi".to_string()))
        );
    }

    #[test]
    fn test_entry_kind_content_type() {
        assert_eq!(EntryKind::File.content_type(), "file");
        assert_eq!(EntryKind::Notebook.content_type(), "notebook");
        assert_eq!(EntryKind::Directory.content_type(), "directory");
    }
}
