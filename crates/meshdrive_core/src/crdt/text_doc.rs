//! Plain-text shared document.

use std::sync::Arc;

use yrs::{Doc, GetString, Text, TextRef, Transact};

use super::document::{DisposeHook, DisposeState, SharedDocument};
use super::presence::PresenceState;
use crate::error::{DriveError, Result};

/// Name of the text holding the file source.
const SOURCE_TEXT_NAME: &str = "source";

/// A shared document holding one plain (or base64-encoded) file's source.
pub struct TextDocument {
    doc: Doc,
    source: TextRef,
    presence: Arc<PresenceState>,
    content_type: String,
    dispose: DisposeState,
}

impl TextDocument {
    /// Create an empty text document.
    pub fn new(content_type: &str) -> Self {
        let doc = Doc::new();
        let source = doc.get_or_insert_text(SOURCE_TEXT_NAME);
        let presence = PresenceState::new(doc.client_id());
        Self {
            doc,
            source,
            presence,
            content_type: content_type.to_string(),
            dispose: DisposeState::new(),
        }
    }

    /// Get the full source as a string.
    pub fn source(&self) -> String {
        let txn = self.doc.transact();
        self.source.get_string(&txn)
    }

    /// Replace the source, applying only the minimal edit.
    ///
    /// Instead of delete-all + insert-all, the common prefix and suffix are
    /// preserved so that unchanged content keeps its CRDT identity and merges
    /// cleanly with concurrent edits on other replicas.
    pub fn set_source(&self, content: &str) {
        let current = self.source();
        if current == content {
            return;
        }

        let current_chars: Vec<char> = current.chars().collect();
        let new_chars: Vec<char> = content.chars().collect();

        let common_prefix = current_chars
            .iter()
            .zip(new_chars.iter())
            .take_while(|(a, b)| a == b)
            .count();
        let remaining_current = current_chars.len() - common_prefix;
        let remaining_new = new_chars.len() - common_prefix;
        let common_suffix = current_chars[common_prefix..]
            .iter()
            .rev()
            .zip(new_chars[common_prefix..].iter().rev())
            .take_while(|(a, b)| a == b)
            .take(remaining_current.min(remaining_new))
            .count();

        let delete_len = current_chars.len() - common_suffix - common_prefix;
        let insert_end = new_chars.len() - common_suffix;

        let mut txn = self.doc.transact_mut();
        if delete_len > 0 {
            self.source
                .remove_range(&mut txn, common_prefix as u32, delete_len as u32);
        }
        if insert_end > common_prefix {
            let insert_text: String = new_chars[common_prefix..insert_end].iter().collect();
            self.source
                .insert(&mut txn, common_prefix as u32, &insert_text);
        }
    }
}

impl SharedDocument for TextDocument {
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
        match content {
            serde_json::Value::String(source) => {
                self.set_source(source);
                Ok(())
            }
            serde_json::Value::Null => Ok(()),
            other => Err(DriveError::InvalidArgument(format!(
                "text documents load string content, got {other}"
            ))),
        }
    }

    fn serialized(&self) -> serde_json::Value {
        serde_json::Value::String(self.source())
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

impl std::fmt::Debug for TextDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextDocument")
            .field("content_type", &self.content_type)
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_document() {
        let doc = TextDocument::new("file");
        assert_eq!(doc.source(), "");
        assert_eq!(doc.content_type(), "file");
    }

    #[test]
    fn test_set_and_get_source() {
        let doc = TextDocument::new("file");
        doc.set_source("hello world");
        assert_eq!(doc.source(), "hello world");
        doc.set_source("hello brave world");
        assert_eq!(doc.source(), "hello brave world");
    }

    #[test]
    fn test_load_serialized_string() {
        let doc = TextDocument::new("file");
        doc.load_serialized(&json!("imported content")).unwrap();
        assert_eq!(doc.source(), "imported content");
        assert_eq!(doc.serialized(), json!("imported content"));
    }

    #[test]
    fn test_load_serialized_rejects_non_string() {
        let doc = TextDocument::new("file");
        let err = doc.load_serialized(&json!({"cells": []})).unwrap_err();
        assert!(matches!(err, DriveError::InvalidArgument(_)));
    }

    #[test]
    fn test_load_serialized_null_is_noop() {
        let doc = TextDocument::new("file");
        doc.set_source("keep");
        doc.load_serialized(&serde_json::Value::Null).unwrap();
        assert_eq!(doc.source(), "keep");
    }

    #[test]
    fn test_minimal_diff_merges_with_concurrent_edit() {
        use super::super::document::apply_raw_update;
        use yrs::ReadTxn;

        let doc1 = TextDocument::new("file");
        let doc2 = TextDocument::new("file");

        doc1.set_source("shared base line");
        let initial = {
            let txn = doc1.doc().transact();
            txn.encode_state_as_update_v1(&yrs::StateVector::default())
        };
        apply_raw_update(doc2.doc(), &initial).unwrap();
        assert_eq!(doc2.source(), "shared base line");

        // Concurrent: doc1 extends via set_source, doc2 appends.
        doc1.set_source("shared base line, extended");
        doc2.set_source("shared base line!");

        let update1 = {
            let txn = doc1.doc().transact();
            txn.encode_state_as_update_v1(&yrs::StateVector::default())
        };
        let update2 = {
            let txn = doc2.doc().transact();
            txn.encode_state_as_update_v1(&yrs::StateVector::default())
        };
        apply_raw_update(doc2.doc(), &update1).unwrap();
        apply_raw_update(doc1.doc(), &update2).unwrap();

        // Both converge, and the shared prefix survived both edits.
        assert_eq!(doc1.source(), doc2.source());
        assert!(doc1.source().starts_with("shared base line"));
    }

    #[test]
    fn test_dispose_contract() {
        let doc = TextDocument::new("file");
        assert!(!doc.is_disposed());
        doc.dispose();
        doc.dispose();
        assert!(doc.is_disposed());
    }
}
