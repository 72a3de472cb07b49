//! Document metadata store
//!
//! A single keyed store `doc_id -> record`, JSON-file backed. Records are
//! persisted in the flat scalar encoding (lists as JSON strings) and
//! reverse-parsed on read, so what the adapters hand upward is always
//! fully typed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use parley_core::{DocRef, Document};

use crate::metadata::{document_from_fields, document_to_fields, FieldMap};
use crate::IndexError;

pub struct DocumentStore {
    path: Option<PathBuf>,
    docs: RwLock<HashMap<DocRef, Document>>,
}

impl DocumentStore {
    /// In-memory store with no backing file.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            docs: RwLock::new(HashMap::new()),
        }
    }

    /// Load from a JSON file of encoded records; a missing file is an
    /// empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, IndexError> {
        let path = path.into();
        let docs = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| IndexError::Backend(format!("read {}: {e}", path.display())))?;
            let encoded: HashMap<String, FieldMap> = serde_json::from_str(&raw)
                .map_err(|e| IndexError::Metadata(format!("parse {}: {e}", path.display())))?;
            let mut docs = HashMap::with_capacity(encoded.len());
            for (id, fields) in encoded {
                let doc = document_from_fields(&fields)?;
                docs.insert(DocRef(id), doc);
            }
            docs
        } else {
            HashMap::new()
        };
        Ok(Self {
            path: Some(path),
            docs: RwLock::new(docs),
        })
    }

    pub fn get(&self, id: &DocRef) -> Option<Document> {
        self.docs.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.docs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.read().is_empty()
    }

    /// Replace-or-insert a record. Used by the ingestion side; the query
    /// path never writes.
    pub fn put(&self, doc: Document) {
        self.docs.write().insert(doc.id.clone(), doc);
    }

    /// Persist the current records to the backing file, if any.
    pub fn flush(&self) -> Result<(), IndexError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let docs = self.docs.read();
        let encoded: HashMap<&str, FieldMap> = docs
            .iter()
            .map(|(id, doc)| (id.as_str(), document_to_fields(doc)))
            .collect();
        let raw = serde_json::to_string_pretty(&encoded)
            .map_err(|e| IndexError::Metadata(e.to_string()))?;
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent).map_err(|e| IndexError::Backend(e.to_string()))?;
        }
        std::fs::write(path, raw)
            .map_err(|e| IndexError::Backend(format!("write {}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::DocKind;

    fn sample(id: &str) -> Document {
        Document {
            id: DocRef(id.into()),
            url: "local".into(),
            kind: DocKind::Faq,
            language: "en".into(),
            title: "Sample".into(),
            published_at: None,
            updated_at: None,
            effective_at: None,
            expires_at: None,
            geo_scope: String::new(),
            currency: "USD".into(),
            product_entities: vec!["Gold tier".into()],
            categories: vec!["rewards".into()],
            authority: 0.75,
            source_path: "data/sample.md".into(),
        }
    }

    #[test]
    fn put_get_round_trip() {
        let store = DocumentStore::in_memory();
        let doc = sample("d1");
        store.put(doc.clone());
        assert_eq!(store.get(&DocRef("d1".into())), Some(doc));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn flush_and_reopen_preserves_records() {
        let dir = std::env::temp_dir().join(format!("parley-doc-store-{}", std::process::id()));
        let path = dir.join("documents.json");
        let _ = std::fs::remove_file(&path);

        let store = DocumentStore::open(&path).unwrap();
        store.put(sample("d1"));
        store.put(sample("d2"));
        store.flush().unwrap();

        let reopened = DocumentStore::open(&path).unwrap();
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.get(&DocRef("d1".into())), Some(sample("d1")));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
