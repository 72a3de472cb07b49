//! Document and chunk records
//!
//! Documents are created once on ingestion and immutable afterwards; a
//! re-ingestion replaces the whole record. Chunks reference their owning
//! document by id only, never by back-pointer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Document kind, used both for filtering and for the kind-authority
/// component of the authority score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocKind {
    Promo,
    Disclosure,
    Terms,
    Faq,
    Landing,
    Form,
    Other,
}

impl DocKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocKind::Promo => "promo",
            DocKind::Disclosure => "disclosure",
            DocKind::Terms => "terms",
            DocKind::Faq => "faq",
            DocKind::Landing => "landing",
            DocKind::Form => "form",
            DocKind::Other => "other",
        }
    }
}

impl Default for DocKind {
    fn default() -> Self {
        DocKind::Other
    }
}

/// Reference to a document by stable identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocRef(pub String);

impl DocRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DocRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to a chunk. Identifiers have the form `<docId>_chunk_<ordinal>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkRef(pub String);

impl ChunkRef {
    /// Compose a chunk id from its owning document and ordinal.
    pub fn compose(doc: &DocRef, ordinal: usize) -> Self {
        ChunkRef(format!("{}_chunk_{}", doc.0, ordinal))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Recover the owning document id, if the identifier is well-formed.
    pub fn doc_ref(&self) -> Option<DocRef> {
        self.0
            .rfind("_chunk_")
            .map(|idx| DocRef(self.0[..idx].to_string()))
    }
}

impl std::fmt::Display for ChunkRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Document-level metadata, stored once per document and referenced by
/// chunks via [`DocRef`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Stable, content-derived identifier.
    pub id: DocRef,
    /// Canonical URL or local path.
    pub url: String,
    pub kind: DocKind,
    /// BCP-47 language tag.
    pub language: String,
    #[serde(default)]
    pub title: String,
    pub published_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub effective_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub geo_scope: String,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub product_entities: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    /// In [0, 1]; mean of domain authority and document-kind authority.
    pub authority: f32,
    /// Provenance path of the ingested file.
    #[serde(default)]
    pub source_path: String,
}

impl Document {
    /// Text the metadata BM25 index runs against: title, categories,
    /// product entities and the document kind, concatenated.
    pub fn metadata_text(&self) -> String {
        let mut parts: Vec<&str> = vec![&self.title];
        parts.extend(self.categories.iter().map(String::as_str));
        parts.extend(self.product_entities.iter().map(String::as_str));
        parts.push(self.kind.as_str());
        parts.retain(|p| !p.is_empty());
        parts.join(" ")
    }
}

/// Chunk-level metadata, persisted alongside the chunk body in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkRef,
    pub doc: DocRef,
    /// Ordered position within the document.
    pub position: usize,
    pub text: String,
    pub token_count: usize,
    pub has_numbers: bool,
    pub has_currency: bool,
    pub start_line: usize,
    pub end_line: usize,
    pub start_char: usize,
    pub end_char: usize,
    /// Version tag of the embedding model the stored vector came from.
    pub embedding_version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_ref_round_trips_doc_id() {
        let doc = DocRef("doc-abc123".into());
        let chunk = ChunkRef::compose(&doc, 4);
        assert_eq!(chunk.as_str(), "doc-abc123_chunk_4");
        assert_eq!(chunk.doc_ref(), Some(doc));
    }

    #[test]
    fn chunk_ref_rejects_malformed_id() {
        assert_eq!(ChunkRef("no-separator".into()).doc_ref(), None);
    }

    #[test]
    fn metadata_text_concatenates_fields() {
        let doc = Document {
            id: DocRef("d1".into()),
            url: "https://example.com/fx".into(),
            kind: DocKind::Disclosure,
            language: "en".into(),
            title: "FX wire fees".into(),
            published_at: None,
            updated_at: None,
            effective_at: None,
            expires_at: None,
            geo_scope: "US".into(),
            currency: "USD".into(),
            product_entities: vec!["wire transfer".into()],
            categories: vec!["fees".into()],
            authority: 0.9,
            source_path: "data/fx.md".into(),
        };
        let text = doc.metadata_text();
        assert!(text.contains("FX wire fees"));
        assert!(text.contains("wire transfer"));
        assert!(text.contains("disclosure"));
    }
}
