//! Content-type to document-factory registry.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::document::{DocumentFactory, DocumentOptions, SharedDocument};
use crate::error::{DriveError, Result};

/// Maps a content-type tag to the factory producing its typed shared
/// document.
///
/// One factory per content type, registered exactly once at setup time.
/// The registry never caches documents; caching is the drive's concern.
#[derive(Default)]
pub struct DocumentFactoryRegistry {
    factories: RwLock<HashMap<String, DocumentFactory>>,
}

impl DocumentFactoryRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `factory` to `content_type`.
    ///
    /// Fails with `AlreadyRegistered` when the content type is taken; the
    /// first registration stays active.
    pub fn register(&self, content_type: &str, factory: DocumentFactory) -> Result<()> {
        let mut factories = self.factories.write().unwrap();
        if factories.contains_key(content_type) {
            return Err(DriveError::AlreadyRegistered(content_type.to_string()));
        }
        factories.insert(content_type.to_string(), factory);
        Ok(())
    }

    /// The factory registered for `content_type`, if any.
    pub fn factory_for(&self, content_type: &str) -> Option<DocumentFactory> {
        let factories = self.factories.read().unwrap();
        factories.get(content_type).cloned()
    }

    /// Create a new shared document for `options`.
    ///
    /// Returns `None` (not an error) when no factory is registered for the
    /// content type, or when `options.format` is not concrete (the content
    /// type is not collaborative for this request).
    pub fn create(&self, options: &DocumentOptions) -> Option<Arc<dyn SharedDocument>> {
        if options.format.is_none() {
            log::warn!(
                "only concrete formats are supported; got none for \"{}\"",
                options.path
            );
            return None;
        }
        let factory = self.factory_for(&options.content_type)?;
        Some(factory(options))
    }
}

impl std::fmt::Debug for DocumentFactoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let factories = self.factories.read().unwrap();
        let mut types: Vec<&String> = factories.keys().collect();
        types.sort();
        f.debug_struct("DocumentFactoryRegistry")
            .field("content_types", &types)
            .finish()
    }
}
