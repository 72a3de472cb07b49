//! BM25 text indexes (Tantivy)
//!
//! Two lexical indexes back the adapter: one over chunk bodies, one over
//! concatenated document metadata. Both share the same analyzer chain
//! (simple Unicode tokenization, long-token removal, lowercasing, English
//! stemming).

use std::path::Path;

use parking_lot::RwLock;
use tantivy::{
    collector::TopDocs,
    query::QueryParser,
    schema::{Field, OwnedValue, Schema, TextFieldIndexing, TextOptions, STORED, STRING},
    tokenizer::{Language, LowerCaser, RemoveLongFilter, SimpleTokenizer, Stemmer, TextAnalyzer},
    Index, IndexReader, IndexWriter, TantivyDocument, Term,
};

use crate::IndexError;

const TOKENIZER: &str = "parley_en";
const WRITER_BUFFER_BYTES: usize = 50_000_000;

fn analyzer() -> TextAnalyzer {
    TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(100))
        .filter(LowerCaser)
        .filter(Stemmer::new(Language::English))
        .build()
}

/// One BM25 index mapping `id -> text`.
struct BmIndex {
    index: Index,
    reader: IndexReader,
    writer: RwLock<IndexWriter>,
    id_field: Field,
    text_field: Field,
}

impl BmIndex {
    fn build_schema() -> (Schema, Field, Field) {
        let text_options = TextOptions::default()
            .set_indexing_options(
                TextFieldIndexing::default()
                    .set_tokenizer(TOKENIZER)
                    .set_index_option(tantivy::schema::IndexRecordOption::WithFreqsAndPositions),
            )
            .set_stored();
        let mut builder = Schema::builder();
        let id_field = builder.add_text_field("id", STRING | STORED);
        let text_field = builder.add_text_field("text", text_options);
        (builder.build(), id_field, text_field)
    }

    fn open(index: Index, id_field: Field, text_field: Field) -> Result<Self, IndexError> {
        index.tokenizers().register(TOKENIZER, analyzer());
        let reader = index
            .reader()
            .map_err(|e| IndexError::Backend(e.to_string()))?;
        let writer = index
            .writer(WRITER_BUFFER_BYTES)
            .map_err(|e| IndexError::Backend(e.to_string()))?;
        Ok(Self {
            index,
            reader,
            writer: RwLock::new(writer),
            id_field,
            text_field,
        })
    }

    fn in_ram() -> Result<Self, IndexError> {
        let (schema, id_field, text_field) = Self::build_schema();
        Self::open(Index::create_in_ram(schema), id_field, text_field)
    }

    fn on_disk(path: &Path) -> Result<Self, IndexError> {
        let (schema, id_field, text_field) = Self::build_schema();
        std::fs::create_dir_all(path).map_err(|e| IndexError::Backend(e.to_string()))?;
        let dir = tantivy::directory::MmapDirectory::open(path)
            .map_err(|e| IndexError::Backend(e.to_string()))?;
        let index = Index::open_or_create(dir, schema)
            .map_err(|e| IndexError::Backend(e.to_string()))?;
        Self::open(index, id_field, text_field)
    }

    fn add(&self, id: &str, text: &str) -> Result<(), IndexError> {
        let mut doc = TantivyDocument::default();
        doc.add_text(self.id_field, id);
        doc.add_text(self.text_field, text);
        self.writer
            .read()
            .add_document(doc)
            .map_err(|e| IndexError::Backend(e.to_string()))?;
        Ok(())
    }

    fn delete(&self, id: &str) {
        let term = Term::from_field_text(self.id_field, id);
        self.writer.read().delete_term(term);
    }

    fn commit(&self) -> Result<(), IndexError> {
        self.writer
            .write()
            .commit()
            .map_err(|e| IndexError::Backend(e.to_string()))?;
        self.reader
            .reload()
            .map_err(|e| IndexError::Backend(e.to_string()))
    }

    /// Search; results sorted by score descending, id ascending on ties.
    fn search(&self, query: &str, k: usize) -> Result<Vec<(String, f32)>, IndexError> {
        if query.trim().is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let searcher = self.reader.searcher();
        let parser = QueryParser::for_index(&self.index, vec![self.text_field]);
        // Lenient parsing: user utterances are not query syntax.
        let (query, _errors) = parser.parse_query_lenient(query);

        let top = searcher
            .search(&query, &TopDocs::with_limit(k))
            .map_err(|e| IndexError::Backend(e.to_string()))?;

        let mut results = Vec::with_capacity(top.len());
        for (score, address) in top {
            let doc: TantivyDocument = searcher
                .doc(address)
                .map_err(|e| IndexError::Backend(e.to_string()))?;
            let id = doc
                .get_first(self.id_field)
                .and_then(|v| match v {
                    OwnedValue::Str(s) => Some(s.clone()),
                    _ => None,
                })
                .unwrap_or_default();
            results.push((id, score));
        }
        results.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        Ok(results)
    }

    fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }
}

/// The pair of BM25 indexes the adapters share.
pub struct TextIndex {
    chunks: BmIndex,
    doc_meta: BmIndex,
}

impl TextIndex {
    /// In-RAM indexes for tests and single-node development.
    pub fn in_ram() -> Result<Self, IndexError> {
        Ok(Self {
            chunks: BmIndex::in_ram()?,
            doc_meta: BmIndex::in_ram()?,
        })
    }

    /// On-disk indexes under `<path>/chunks` and `<path>/doc_meta`.
    pub fn open(path: &Path) -> Result<Self, IndexError> {
        Ok(Self {
            chunks: BmIndex::on_disk(&path.join("chunks"))?,
            doc_meta: BmIndex::on_disk(&path.join("doc_meta"))?,
        })
    }

    pub fn add_chunk(&self, id: &str, text: &str) -> Result<(), IndexError> {
        self.chunks.add(id, text)
    }

    pub fn add_doc_meta(&self, id: &str, text: &str) -> Result<(), IndexError> {
        self.doc_meta.add(id, text)
    }

    pub fn delete_chunk(&self, id: &str) {
        self.chunks.delete(id);
    }

    pub fn delete_doc_meta(&self, id: &str) {
        self.doc_meta.delete(id);
    }

    pub fn commit(&self) -> Result<(), IndexError> {
        self.chunks.commit()?;
        self.doc_meta.commit()
    }

    pub fn search_chunks(&self, query: &str, k: usize) -> Result<Vec<(String, f32)>, IndexError> {
        self.chunks.search(query, k)
    }

    pub fn search_doc_meta(&self, query: &str, k: usize) -> Result<Vec<(String, f32)>, IndexError> {
        self.doc_meta.search(query, k)
    }

    pub fn chunk_count(&self) -> u64 {
        self.chunks.num_docs()
    }
}
