//! Structured notebook shared document.
//!
//! Notebook content is an ordered list of cells plus document-level metadata.
//! Cells are stored as plain values in a CRDT array named `"cells"`; the
//! format fields and metadata live in a map named `"meta"`.

use std::sync::Arc;

use yrs::{Array, ArrayRef, Doc, Map, MapRef, Transact};

use super::document::{any_to_json, json_to_any, DisposeHook, DisposeState, SharedDocument};
use super::presence::PresenceState;
use crate::error::{DriveError, Result};

const CELLS_ARRAY_NAME: &str = "cells";
const META_MAP_NAME: &str = "meta";

/// Default notebook format version used when loaded content omits it.
const DEFAULT_NBFORMAT: i64 = 4;
const DEFAULT_NBFORMAT_MINOR: i64 = 5;

/// A shared document holding one structured notebook.
pub struct NotebookDocument {
    doc: Doc,
    cells: ArrayRef,
    meta: MapRef,
    presence: Arc<PresenceState>,
    content_type: String,
    dispose: DisposeState,
}

impl NotebookDocument {
    /// Create an empty notebook document.
    pub fn new(content_type: &str) -> Self {
        let doc = Doc::new();
        let cells = doc.get_or_insert_array(CELLS_ARRAY_NAME);
        let meta = doc.get_or_insert_map(META_MAP_NAME);
        let presence = PresenceState::new(doc.client_id());
        Self {
            doc,
            cells,
            meta,
            presence,
            content_type: content_type.to_string(),
            dispose: DisposeState::new(),
        }
    }

    /// Number of cells.
    pub fn cell_count(&self) -> u32 {
        let txn = self.doc.transact();
        self.cells.len(&txn)
    }

    /// The cells as JSON values.
    pub fn cells(&self) -> Vec<serde_json::Value> {
        let txn = self.doc.transact();
        (0..self.cells.len(&txn))
            .filter_map(|idx| self.cells.get(&txn, idx))
            .map(|out| match out {
                yrs::Out::Any(any) => any_to_json(&any),
                other => {
                    log::warn!("unexpected cell value in notebook: {other:?}");
                    serde_json::Value::Null
                }
            })
            .collect()
    }

    fn meta_field(&self, key: &str) -> Option<serde_json::Value> {
        let txn = self.doc.transact();
        self.meta.get(&txn, key).map(|out| match out {
            yrs::Out::Any(any) => any_to_json(&any),
            _ => serde_json::Value::Null,
        })
    }
}

impl SharedDocument for NotebookDocument {
    fn doc(&self) -> &Doc {
        &self.doc
    }

    fn presence(&self) -> &Arc<PresenceState> {
        &self.presence
    }

    fn content_type(&self) -> &str {
        &self.content_type
    }

    fn load_serialized(&self, content: &serde_json::Value) -> Result<()> {
        let serde_json::Value::Object(fields) = content else {
            return Err(DriveError::InvalidArgument(format!(
                "notebook documents load structured JSON content, got {content}"
            )));
        };

        let nbformat = fields
            .get("nbformat")
            .and_then(serde_json::Value::as_i64)
            .unwrap_or(DEFAULT_NBFORMAT);
        let nbformat_minor = fields
            .get("nbformat_minor")
            .and_then(serde_json::Value::as_i64)
            .unwrap_or(DEFAULT_NBFORMAT_MINOR);
        let metadata = fields
            .get("metadata")
            .cloned()
            .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new()));
        let cells = match fields.get("cells") {
            Some(serde_json::Value::Array(cells)) => cells.clone(),
            _ => Vec::new(),
        };

        let mut txn = self.doc.transact_mut();
        self.meta.insert(&mut txn, "nbformat", nbformat);
        self.meta.insert(&mut txn, "nbformat_minor", nbformat_minor);
        self.meta.insert(&mut txn, "metadata", json_to_any(&metadata));

        let existing = self.cells.len(&txn);
        if existing > 0 {
            self.cells.remove_range(&mut txn, 0, existing);
        }
        for cell in &cells {
            self.cells.push_back(&mut txn, json_to_any(cell));
        }
        Ok(())
    }

    fn serialized(&self) -> serde_json::Value {
        let mut object = serde_json::Map::new();
        object.insert(
            "cells".to_string(),
            serde_json::Value::Array(self.cells()),
        );
        object.insert(
            "metadata".to_string(),
            self.meta_field("metadata")
                .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new())),
        );
        object.insert(
            "nbformat".to_string(),
            self.meta_field("nbformat")
                .unwrap_or_else(|| serde_json::Value::Number(DEFAULT_NBFORMAT.into())),
        );
        object.insert(
            "nbformat_minor".to_string(),
            self.meta_field("nbformat_minor")
                .unwrap_or_else(|| serde_json::Value::Number(DEFAULT_NBFORMAT_MINOR.into())),
        );
        serde_json::Value::Object(object)
    }

    fn on_dispose(&self, hook: DisposeHook) {
        self.dispose.register(hook);
    }

    fn dispose(&self) {
        self.dispose.dispose();
    }

    fn is_disposed(&self) -> bool {
        self.dispose.is_disposed()
    }
}

impl std::fmt::Debug for NotebookDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotebookDocument")
            .field("cells", &self.cell_count())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}
