//! The namespace drive façade.
//!
//! [`NamespaceDrive`] multiplexes many open documents over one replicated
//! namespace: it owns the [`ReplicatedTree`] for the namespace itself, the
//! document-factory registry, and a cache of open sync channels keyed by
//! `(format, content type, file id)`. Namespace operations translate to tree
//! mutations; document opens translate to channel lifecycle events. The
//! classic storage backend is bridged only for import and export.
//!
//! Identity, not path, keys the provider cache: renaming a file does not
//! invalidate its open document or channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use chrono::Utc;

use crate::contents::{
    CheckpointModel, ClassicStorage, ContentsModel, CreateOptions, EntryKind, FetchOptions,
    ModelContent, SaveOptions, SourceFormat,
};
use crate::crdt::{
    apply_raw_update, ChannelOptions, DocCache, DocumentFactory, DocumentFactoryRegistry,
    DocumentOptions, FileId, LocalUser, PresenceState, ReplicatedTree, SharedDocument,
    SyncChannel, TransportFactory, UpdateOrigin,
};
use crate::error::{DriveError, Result};
use crate::path::DrivePath;

/// Well-known room (and mirror key) of the namespace document itself.
const FILE_SYSTEM_ROOM: &str = "fileSystem";

/// Immutable drive configuration, resolved once at construction.
#[derive(Debug, Clone)]
pub struct DriveConfig {
    /// Drive name, the leading component of presented paths.
    pub name: String,
    /// Raw peer-discovery endpoints: absolute transport URLs are kept
    /// verbatim, anything else is joined against `base_ws_url`.
    pub endpoints: Vec<String>,
    /// The local server's transport base URL.
    pub base_ws_url: String,
}

impl DriveConfig {
    /// Configuration for a drive called `name`.
    pub fn new(name: &str, endpoints: Vec<String>, base_ws_url: &str) -> Self {
        Self {
            name: name.to_string(),
            endpoints,
            base_ws_url: base_ws_url.to_string(),
        }
    }

    /// The endpoint list with relative entries joined against the base URL.
    pub fn resolved_endpoints(&self) -> Vec<String> {
        crate::crdt::resolve_endpoints(&self.endpoints, &self.base_ws_url)
    }
}

/// Provider-cache key: a file's open document is identified by what it is,
/// never by where it currently sits in the namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProviderKey {
    /// Source format of the open request.
    pub format: SourceFormat,
    /// Content-type tag of the open request.
    pub content_type: String,
    /// The file's stable marker.
    pub file_id: FileId,
}

impl ProviderKey {
    /// The room name scoping this document's sync frames.
    fn room(&self) -> String {
        format!("{}:{}:{}", self.format, self.content_type, self.file_id)
    }
}

/// A cached open document and its sync channel.
struct FileProvider {
    channel: Arc<SyncChannel>,
    document: Arc<dyn SharedDocument>,
    /// Keeps the offline-mirror observer alive for the entry's lifetime.
    _mirror_subscription: Option<yrs::Subscription>,
}

/// A file operation notification.
#[derive(Debug, Clone)]
pub enum DriveEvent {
    /// A new entry was created through [`NamespaceDrive::new_untitled`].
    Created(ContentsModel),
}

/// Callback for drive events.
pub type DriveEventCallback = Arc<dyn Fn(&DriveEvent) + Send + Sync>;

type ProviderMap = Arc<RwLock<HashMap<ProviderKey, FileProvider>>>;

/// A collaborative drive, talking to other peers over a peer transport.
pub struct NamespaceDrive<S: ClassicStorage> {
    name: String,
    endpoints: Vec<String>,
    tree: Arc<ReplicatedTree>,
    registry: DocumentFactoryRegistry,
    providers: ProviderMap,
    root_channel: Arc<SyncChannel>,
    global_presence: Arc<PresenceState>,
    transports: Arc<dyn TransportFactory>,
    storage: S,
    doc_cache: Option<Arc<dyn DocCache>>,
    user: Arc<LocalUser>,
    event_callback: RwLock<Option<DriveEventCallback>>,
    disposed: AtomicBool,
    _namespace_mirror: Option<yrs::Subscription>,
}

impl<S: ClassicStorage> NamespaceDrive<S> {
    /// Construct a drive and start connecting its namespace document.
    ///
    /// Mirrored namespace state, when a cache is given, is replayed before
    /// the transport sync starts. A connect failure is logged; the drive
    /// stays usable but [`NamespaceDrive::get`] suspends until a later sync
    /// completes.
    pub async fn new(
        config: DriveConfig,
        storage: S,
        transports: Arc<dyn TransportFactory>,
        user: Arc<LocalUser>,
        doc_cache: Option<Arc<dyn DocCache>>,
    ) -> Self {
        let endpoints = config.resolved_endpoints();
        let tree = Arc::new(ReplicatedTree::new());

        let mut namespace_mirror = None;
        if let Some(cache) = &doc_cache {
            for update in cache.updates(FILE_SYSTEM_ROOM) {
                if let Err(e) = tree.apply_update(&update, UpdateOrigin::Sync) {
                    log::warn!("failed to replay mirrored namespace update: {e}");
                }
            }
            let cache_clone = cache.clone();
            namespace_mirror = Some(tree.observe_updates(move |update| {
                cache_clone.append_update(FILE_SYSTEM_ROOM, update, UpdateOrigin::Local);
            }));
        }

        let global_presence = PresenceState::new(tree.doc().client_id());
        let root_channel = SyncChannel::open(ChannelOptions {
            room: FILE_SYSTEM_ROOM.to_string(),
            doc: tree.doc().clone(),
            presence: global_presence.clone(),
            transport: transports.create(),
            endpoints: endpoints.clone(),
            user: user.clone(),
        })
        .await;

        Self {
            name: config.name,
            endpoints,
            tree,
            registry: DocumentFactoryRegistry::new(),
            providers: Arc::new(RwLock::new(HashMap::new())),
            root_channel,
            global_presence,
            transports,
            storage,
            doc_cache,
            user,
            event_callback: RwLock::new(None),
            disposed: AtomicBool::new(false),
            _namespace_mirror: namespace_mirror,
        }
    }

    /// The drive's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The replicated namespace tree.
    pub fn tree(&self) -> &ReplicatedTree {
        &self.tree
    }

    /// The namespace-wide presence state.
    pub fn global_presence(&self) -> &Arc<PresenceState> {
        &self.global_presence
    }

    /// The document-factory registry.
    pub fn registry(&self) -> &DocumentFactoryRegistry {
        &self.registry
    }

    /// Register a document factory for a content type. One factory per
    /// content type, registered exactly once at setup time.
    pub fn register_document_factory(
        &self,
        content_type: &str,
        factory: DocumentFactory,
    ) -> Result<()> {
        self.registry.register(content_type, factory)
    }

    /// Set the drive-event callback, replacing any previous one.
    pub fn set_event_callback(&self, callback: DriveEventCallback) {
        let mut slot = self.event_callback.write().unwrap();
        *slot = Some(callback);
    }

    fn emit(&self, event: &DriveEvent) {
        let callback = {
            let slot = self.event_callback.read().unwrap();
            slot.clone()
        };
        if let Some(callback) = callback {
            callback(event);
        }
    }

    /// Resolves once the namespace's own initial sync has completed.
    pub async fn ready(&self) {
        self.root_channel.ready().await;
    }

    /// Whether the namespace's initial sync has completed.
    pub fn is_ready(&self) -> bool {
        self.root_channel.is_synced()
    }

    /// Whether the drive has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Number of currently open documents.
    pub fn open_document_count(&self) -> usize {
        self.providers.read().unwrap().len()
    }

    /// Dispose every open provider and the namespace channel.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let providers = {
            let mut map = self.providers.write().unwrap();
            std::mem::take(&mut *map)
        };
        for (_, provider) in providers {
            provider.channel.dispose();
        }
        self.root_channel.dispose();
    }

    // ==================== Namespace Operations ====================

    /// Get a file or directory model.
    ///
    /// Suspends until the namespace's initial sync completes. Directories
    /// get one stub entry per child; files get a content-less stub (content
    /// is obtained by opening the shared document, a separate path).
    pub async fn get(&self, path: &str, options: FetchOptions) -> Result<ContentsModel> {
        self.ready().await;
        if !self.tree.is_directory(path)? {
            return Ok(ContentsModel::file_stub(path));
        }

        let mut model = ContentsModel::stub(path, EntryKind::Directory);
        if options.content {
            let parsed = DrivePath::new(path);
            let listing = self
                .tree
                .list_directory(path)?
                .into_iter()
                .map(|entry| {
                    let kind = if entry.is_dir {
                        EntryKind::Directory
                    } else {
                        EntryKind::File
                    };
                    ContentsModel::stub(&parsed.join(&entry.name), kind)
                })
                .collect();
            model.content = ModelContent::Listing(listing);
        }
        Ok(model)
    }

    /// Save is a no-op in the shared namespace (content lives in the shared
    /// documents); it returns the current model without content.
    pub async fn save(&self, path: &str) -> Result<ContentsModel> {
        self.get(path, FetchOptions { content: false }).await
    }

    /// Download URLs are not a concept of the peer-to-peer namespace.
    pub fn download_url(&self, _path: &str) -> String {
        String::new()
    }

    /// Create a new untitled file, notebook or directory.
    ///
    /// Name selection rides the tree's locally observed snapshot; a
    /// concurrent peer may pick the same name, in which case the map slot's
    /// last writer wins without an error being raised.
    pub fn new_untitled(&self, options: CreateOptions) -> Result<ContentsModel> {
        let (is_dir, ext) = match options.kind {
            EntryKind::Directory => (true, String::new()),
            EntryKind::Notebook => (false, options.ext.clone().unwrap_or_else(|| ".ipynb".to_string())),
            EntryKind::File => (false, options.ext.clone().unwrap_or_else(|| ".txt".to_string())),
        };
        let new_path = self.tree.new_untitled(is_dir, &options.path, &ext)?;

        let mut model = ContentsModel::stub(&new_path, options.kind);
        model.created = Some(Utc::now());
        model.last_modified = model.created;

        self.emit(&DriveEvent::Created(model.clone()));
        Ok(model)
    }

    /// Rename (move) an entry. The file marker travels with the entry, so
    /// open documents keyed by it stay valid.
    pub fn rename(&self, path: &str, new_path: &str) -> Result<ContentsModel> {
        self.tree.move_entry(path, new_path)?;
        let kind = if self.tree.is_directory(new_path)? {
            EntryKind::Directory
        } else {
            EntryKind::File
        };
        Ok(ContentsModel::stub(new_path, kind))
    }

    /// Delete an entry.
    ///
    /// Any sync channel open on the file's identifier is left alone; it is
    /// torn down when its document reports disposal, not when the path
    /// disappears.
    pub fn delete(&self, path: &str) -> Result<()> {
        self.tree.delete(path)
    }

    /// Copy is intentionally unsupported: shallow duplication of a CRDT
    /// subtree is unsafe without deep-cloning every nested map.
    pub fn copy(&self, _path: &str, _to_dir: &str) -> Result<ContentsModel> {
        Err(DriveError::Unsupported(
            "copy/paste across the shared namespace".to_string(),
        ))
    }

    // ==================== Checkpoints ====================
    // The namespace has no versioning layer; these succeed trivially.

    /// Create a checkpoint (trivially empty).
    pub fn create_checkpoint(&self, _path: &str) -> Result<CheckpointModel> {
        Ok(CheckpointModel::default())
    }

    /// List checkpoints (always empty).
    pub fn list_checkpoints(&self, _path: &str) -> Result<Vec<CheckpointModel>> {
        Ok(Vec::new())
    }

    /// Restore a checkpoint (no-op).
    pub fn restore_checkpoint(&self, _path: &str, _checkpoint_id: &str) -> Result<()> {
        Ok(())
    }

    /// Delete a checkpoint (no-op).
    pub fn delete_checkpoint(&self, _path: &str, _checkpoint_id: &str) -> Result<()> {
        Ok(())
    }

    // ==================== Shared Documents ====================

    /// Open the shared document for a file, creating it on first open.
    ///
    /// At most one live document and channel exist per
    /// `(format, content type, file id)` across all callers; the cache entry
    /// lives exactly as long as the document (a registered disposal hook
    /// tears down the channel and evicts the entry).
    ///
    /// Requests without a concrete format bypass identity and caching and
    /// synthesize a fresh transient document. Returns `None` when no factory
    /// is registered for the content type.
    pub async fn open_or_create_document(
        &self,
        options: DocumentOptions,
    ) -> Result<Option<Arc<dyn SharedDocument>>> {
        let Some(format) = options.format else {
            return Ok(self
                .registry
                .factory_for(&options.content_type)
                .map(|factory| factory(&options)));
        };

        let file_id = self.tree.file_id(&options.path)?;
        let key = ProviderKey {
            format,
            content_type: options.content_type.clone(),
            file_id: file_id.clone(),
        };

        {
            let providers = self.providers.read().unwrap();
            if let Some(provider) = providers.get(&key) {
                return Ok(Some(provider.document.clone()));
            }
        }

        let Some(factory) = self.registry.factory_for(&options.content_type) else {
            return Ok(None);
        };
        let document = factory(&options);

        // Replay mirrored state first, then keep mirroring; the replayed
        // updates must not re-enter the cache.
        let mut mirror_subscription = None;
        if let Some(cache) = &self.doc_cache {
            for update in cache.updates(&file_id) {
                if let Err(e) = apply_raw_update(document.doc(), &update) {
                    log::warn!("failed to replay mirrored update for \"{file_id}\": {e}");
                }
            }
            let cache_clone = cache.clone();
            let mirror_id = file_id.clone();
            let subscription = document
                .doc()
                .observe_update_v1(move |_, event| {
                    cache_clone.append_update(&mirror_id, &event.update, UpdateOrigin::Local);
                })
                .expect("Failed to observe document updates");
            mirror_subscription = Some(subscription);
        }

        let channel = SyncChannel::open(ChannelOptions {
            room: key.room(),
            doc: document.doc().clone(),
            presence: document.presence().clone(),
            transport: self.transports.create(),
            endpoints: self.endpoints.clone(),
            user: self.user.clone(),
        })
        .await;

        {
            let mut providers = self.providers.write().unwrap();
            providers.insert(
                key.clone(),
                FileProvider {
                    channel: channel.clone(),
                    document: document.clone(),
                    _mirror_subscription: mirror_subscription,
                },
            );
        }

        // Cache-entry lifetime equals document lifetime.
        let providers = self.providers.clone();
        let hook_key = key;
        let hook_channel = channel;
        document.on_dispose(Box::new(move || {
            hook_channel.dispose();
            let mut providers = providers.write().unwrap();
            providers.remove(&hook_key);
        }));

        Ok(Some(document))
    }

    // ==================== Import / Export ====================

    /// Import a file from classic storage into the shared namespace.
    ///
    /// When `to_path` denotes an existing directory, the source's base name
    /// is appended. The fetched content is bulk-loaded into the file's
    /// freshly opened shared document.
    pub async fn import_file(&self, from_path: &str, to_path: &str) -> Result<()> {
        let model = self
            .storage
            .get(from_path, FetchOptions { content: true })
            .await?;
        if model.kind == EntryKind::Directory {
            return Err(DriveError::InvalidArgument(format!(
                "cannot import directory \"{from_path}\""
            )));
        }

        let mut to_path = to_path.to_string();
        if self.tree.exists(&to_path) && self.tree.is_directory(&to_path)? {
            to_path = DrivePath::new(&to_path).join(&model.name);
        }
        self.tree.create_file(&to_path)?;

        let options = DocumentOptions {
            path: to_path.clone(),
            format: model.format,
            content_type: model.kind.content_type().to_string(),
        };
        if let Some(document) = self.open_or_create_document(options).await? {
            if let Some(content) = model.content.as_json() {
                document.load_serialized(&content)?;
            }
        }
        log::debug!("imported \"{from_path}\" as \"{to_path}\"");
        Ok(())
    }

    /// Export an open shared document's content to classic storage.
    ///
    /// Works only on already-open documents: when no channel is open for the
    /// file's identifier the call is a silent no-op.
    pub async fn export_file(&self, from_path: &str, to_path: &str) -> Result<()> {
        let file_id = self.tree.file_id(from_path)?;
        let found = {
            let providers = self.providers.read().unwrap();
            providers
                .iter()
                .find(|(key, _)| key.file_id == file_id)
                .map(|(key, provider)| (key.clone(), provider.document.clone()))
        };
        let Some((key, document)) = found else {
            log::debug!("no open document for \"{from_path}\"; export skipped");
            return Ok(());
        };

        let serialized = document.serialized();
        let kind = if key.content_type == EntryKind::Notebook.content_type() {
            EntryKind::Notebook
        } else {
            EntryKind::File
        };
        let content = match serialized {
            serde_json::Value::String(text) => ModelContent::Text(text),
            value => ModelContent::Json(value),
        };
        self.storage
            .save(
                to_path,
                SaveOptions {
                    kind,
                    format: Some(key.format),
                    content,
                },
            )
            .await?;
        log::debug!("exported \"{from_path}\" to \"{to_path}\"");
        Ok(())
    }
}

impl<S: ClassicStorage> std::fmt::Debug for NamespaceDrive<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamespaceDrive")
            .field("name", &self.name)
            .field("open_documents", &self.open_document_count())
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contents::MemoryContents;
    use crate::crdt::{MemoryCache, MemoryHub, NotebookDocument, TextDocument};
    use serde_json::json;
    use std::sync::Mutex;

    fn text_factory() -> DocumentFactory {
        Arc::new(|options: &DocumentOptions| {
            Arc::new(TextDocument::new(&options.content_type)) as Arc<dyn SharedDocument>
        })
    }

    fn notebook_factory() -> DocumentFactory {
        Arc::new(|options: &DocumentOptions| {
            Arc::new(NotebookDocument::new(&options.content_type)) as Arc<dyn SharedDocument>
        })
    }

    async fn lone_drive() -> NamespaceDrive<MemoryContents> {
        lone_drive_with(MemoryContents::new(), None).await
    }

    async fn lone_drive_with(
        storage: MemoryContents,
        cache: Option<Arc<dyn DocCache>>,
    ) -> NamespaceDrive<MemoryContents> {
        // A hub expecting zero peers lets a single drive reach readiness.
        let hub = MemoryHub::with_min_peers(0);
        let drive = NamespaceDrive::new(
            DriveConfig::new("shared", vec![], "ws://localhost/api"),
            storage,
            Arc::new(hub),
            LocalUser::new(),
            cache,
        )
        .await;
        drive.register_document_factory("file", text_factory()).unwrap();
        drive
            .register_document_factory("notebook", notebook_factory())
            .unwrap();
        drive
    }

    #[tokio::test]
    async fn test_get_directory_listing() {
        let drive = lone_drive().await;
        drive.tree().create_directory("docs").unwrap();
        drive.tree().create_file("docs/a.txt").unwrap();
        drive.tree().create_directory("docs/sub").unwrap();

        let model = drive.get("docs", FetchOptions::default()).await.unwrap();
        assert_eq!(model.kind, EntryKind::Directory);
        let ModelContent::Listing(children) = &model.content else {
            panic!("expected a listing");
        };
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].path, "docs/a.txt");
        assert_eq!(children[0].kind, EntryKind::File);
        assert_eq!(children[1].path, "docs/sub");
        assert_eq!(children[1].kind, EntryKind::Directory);
    }

    #[tokio::test]
    async fn test_get_file_stub_has_no_content() {
        let drive = lone_drive().await;
        drive.tree().create_file("a.txt").unwrap();

        let model = drive.get("a.txt", FetchOptions::default()).await.unwrap();
        assert_eq!(model.kind, EntryKind::File);
        assert_eq!(model.content, ModelContent::Empty);
    }

    #[tokio::test]
    async fn test_get_missing_path_fails() {
        let drive = lone_drive().await;
        let err = drive
            .get("missing.txt", FetchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DriveError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_new_untitled_emits_created_event() {
        let drive = lone_drive().await;
        let events = Arc::new(Mutex::new(Vec::<DriveEvent>::new()));
        let events_clone = events.clone();
        drive.set_event_callback(Arc::new(move |event| {
            events_clone.lock().unwrap().push(event.clone());
        }));

        let model = drive
            .new_untitled(CreateOptions::new("", EntryKind::File))
            .unwrap();
        assert_eq!(model.path, "untitled0.txt");

        let notebook = drive
            .new_untitled(CreateOptions::new("", EntryKind::Notebook))
            .unwrap();
        assert_eq!(notebook.path, "untitled0.ipynb");

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 2);
        let DriveEvent::Created(created) = &events[0];
        assert_eq!(created.path, "untitled0.txt");
    }

    #[tokio::test]
    async fn test_rename_keeps_open_document() {
        let drive = lone_drive().await;
        drive.tree().create_file("old.txt").unwrap();

        let doc = drive
            .open_or_create_document(DocumentOptions::new("old.txt", SourceFormat::Text, "file"))
            .await
            .unwrap()
            .unwrap();

        let model = drive.rename("old.txt", "new.txt").unwrap();
        assert_eq!(model.path, "new.txt");

        // Identity keys the cache, so the open under the new path hits.
        let same = drive
            .open_or_create_document(DocumentOptions::new("new.txt", SourceFormat::Text, "file"))
            .await
            .unwrap()
            .unwrap();
        assert!(Arc::ptr_eq(&doc, &same));
        assert_eq!(drive.open_document_count(), 1);
    }

    #[tokio::test]
    async fn test_delete_leaves_open_channel_alone() {
        let drive = lone_drive().await;
        drive.tree().create_file("gone.txt").unwrap();
        let doc = drive
            .open_or_create_document(DocumentOptions::new("gone.txt", SourceFormat::Text, "file"))
            .await
            .unwrap()
            .unwrap();

        drive.delete("gone.txt").unwrap();
        assert!(!drive.tree().exists("gone.txt"));
        assert_eq!(drive.open_document_count(), 1);
        assert!(!doc.is_disposed());
    }

    #[tokio::test]
    async fn test_copy_is_unsupported() {
        let drive = lone_drive().await;
        assert!(matches!(
            drive.copy("a.txt", "b").unwrap_err(),
            DriveError::Unsupported(_)
        ));
    }

    #[tokio::test]
    async fn test_checkpoints_succeed_trivially() {
        let drive = lone_drive().await;
        let checkpoint = drive.create_checkpoint("a.txt").unwrap();
        assert_eq!(checkpoint, CheckpointModel::default());
        assert!(drive.list_checkpoints("a.txt").unwrap().is_empty());
        drive.restore_checkpoint("a.txt", "cp").unwrap();
        drive.delete_checkpoint("a.txt", "cp").unwrap();
    }

    #[tokio::test]
    async fn test_open_twice_returns_same_instance_until_disposed() {
        let drive = lone_drive().await;
        drive.tree().create_file("shared.txt").unwrap();
        let options = DocumentOptions::new("shared.txt", SourceFormat::Text, "file");

        let first = drive
            .open_or_create_document(options.clone())
            .await
            .unwrap()
            .unwrap();
        let second = drive
            .open_or_create_document(options.clone())
            .await
            .unwrap()
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(drive.open_document_count(), 1);

        // Disposal evicts the entry; the next open builds a new document.
        first.dispose();
        assert_eq!(drive.open_document_count(), 0);

        let third = drive
            .open_or_create_document(options)
            .await
            .unwrap()
            .unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[tokio::test]
    async fn test_open_without_factory_returns_none() {
        let drive = lone_drive().await;
        drive.tree().create_file("weird.bin").unwrap();
        let opened = drive
            .open_or_create_document(DocumentOptions::new(
                "weird.bin",
                SourceFormat::Base64,
                "unregistered",
            ))
            .await
            .unwrap();
        assert!(opened.is_none());
    }

    #[tokio::test]
    async fn test_open_without_format_bypasses_cache() {
        let drive = lone_drive().await;
        let options = DocumentOptions {
            path: "transient".to_string(),
            format: None,
            content_type: "file".to_string(),
        };
        let first = drive
            .open_or_create_document(options.clone())
            .await
            .unwrap()
            .unwrap();
        let second = drive
            .open_or_create_document(options)
            .await
            .unwrap()
            .unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(drive.open_document_count(), 0);
    }

    #[tokio::test]
    async fn test_open_directory_fails() {
        let drive = lone_drive().await;
        drive.tree().create_directory("dir").unwrap();
        let err = drive
            .open_or_create_document(DocumentOptions::new("dir", SourceFormat::Text, "file"))
            .await
            .unwrap_err();
        assert!(matches!(err, DriveError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_import_text_file() {
        let storage = MemoryContents::new();
        storage.insert(ContentsModel {
            name: "hello.txt".to_string(),
            path: "local/hello.txt".to_string(),
            kind: EntryKind::File,
            writable: true,
            created: None,
            last_modified: None,
            mimetype: None,
            format: Some(SourceFormat::Text),
            content: ModelContent::Text("imported text".to_string()),
        });
        let drive = lone_drive_with(storage, None).await;
        drive.tree().create_directory("inbox").unwrap();

        drive.import_file("local/hello.txt", "inbox").await.unwrap();

        // Appended the source's base name under the existing directory.
        assert!(drive.tree().exists("inbox/hello.txt"));
        let doc = drive
            .open_or_create_document(DocumentOptions::new(
                "inbox/hello.txt",
                SourceFormat::Text,
                "file",
            ))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.serialized(), json!("imported text"));
    }

    #[tokio::test]
    async fn test_import_notebook_into_root() {
        let notebook = json!({
            "cells": [{"cell_type": "code", "source": "1 + 1"}],
            "metadata": {},
            "nbformat": 4,
            "nbformat_minor": 5,
        });
        let storage = MemoryContents::new();
        storage.insert(ContentsModel {
            name: "calc.ipynb".to_string(),
            path: "calc.ipynb".to_string(),
            kind: EntryKind::Notebook,
            writable: true,
            created: None,
            last_modified: None,
            mimetype: None,
            format: Some(SourceFormat::Json),
            content: ModelContent::Json(notebook.clone()),
        });
        let drive = lone_drive_with(storage, None).await;

        drive.import_file("calc.ipynb", "").await.unwrap();

        assert!(drive.tree().exists("calc.ipynb"));
        let doc = drive
            .open_or_create_document(DocumentOptions::new(
                "calc.ipynb",
                SourceFormat::Json,
                "notebook",
            ))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.serialized(), notebook);
    }

    #[tokio::test]
    async fn test_export_open_document() {
        let drive = lone_drive().await;
        drive.tree().create_file("work.txt").unwrap();
        let doc = drive
            .open_or_create_document(DocumentOptions::new("work.txt", SourceFormat::Text, "file"))
            .await
            .unwrap()
            .unwrap();
        doc.load_serialized(&json!("exported content")).unwrap();

        drive.export_file("work.txt", "backup/work.txt").await.unwrap();

        let saved = drive
            .storage
            .get("backup/work.txt", FetchOptions::default())
            .await
            .unwrap();
        assert_eq!(saved.content, ModelContent::Text("exported content".to_string()));
        assert_eq!(saved.format, Some(SourceFormat::Text));
    }

    #[tokio::test]
    async fn test_export_without_open_document_is_silent_noop() {
        let drive = lone_drive().await;
        drive.tree().create_file("closed.txt").unwrap();

        drive.export_file("closed.txt", "out.txt").await.unwrap();
        assert!(drive.storage.paths().is_empty());
    }

    #[tokio::test]
    async fn test_offline_mirror_replays_at_startup() {
        let cache: Arc<dyn DocCache> = Arc::new(MemoryCache::new());

        {
            let drive = lone_drive_with(MemoryContents::new(), Some(cache.clone())).await;
            drive.tree().create_directory("persisted").unwrap();
            drive.tree().create_file("persisted/note.txt").unwrap();
        }

        let revived = lone_drive_with(MemoryContents::new(), Some(cache)).await;
        assert!(revived.tree().exists("persisted/note.txt"));
    }

    #[tokio::test]
    async fn test_dispose_tears_down_providers() {
        let drive = lone_drive().await;
        drive.tree().create_file("a.txt").unwrap();
        drive
            .open_or_create_document(DocumentOptions::new("a.txt", SourceFormat::Text, "file"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(drive.open_document_count(), 1);

        drive.dispose();
        drive.dispose();
        assert!(drive.is_disposed());
        assert_eq!(drive.open_document_count(), 0);
    }

    #[tokio::test]
    async fn test_endpoint_resolution() {
        let config = DriveConfig::new(
            "shared",
            vec![
                "wss://signal.example.org".to_string(),
                "signaling".to_string(),
            ],
            "ws://server.local/api",
        );
        assert_eq!(
            config.resolved_endpoints(),
            vec![
                "wss://signal.example.org".to_string(),
                "ws://server.local/api/signaling".to_string(),
            ]
        );
    }
}
