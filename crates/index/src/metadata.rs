//! Flat scalar codec for store payloads
//!
//! The storage engine only accepts scalar payload values, so list fields
//! (categories, product entities) travel as JSON-encoded strings and
//! absent optional fields as the empty string, never null. Every read
//! path reverse-parses before metadata reaches the retriever or the
//! generator.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use parley_core::{Chunk, ChunkRef, DocKind, DocRef, Document};

use crate::IndexError;

pub type FieldMap = BTreeMap<String, String>;

fn encode_list(values: &[String]) -> String {
    if values.is_empty() {
        String::new()
    } else {
        serde_json::to_string(values).unwrap_or_default()
    }
}

fn decode_list(raw: &str) -> Result<Vec<String>, IndexError> {
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(raw).map_err(|e| IndexError::Metadata(format!("bad list field: {e}")))
}

fn encode_time(value: &Option<DateTime<Utc>>) -> String {
    value.map(|t| t.to_rfc3339()).unwrap_or_default()
}

fn decode_time(raw: &str) -> Result<Option<DateTime<Utc>>, IndexError> {
    if raw.is_empty() {
        return Ok(None);
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|t| Some(t.with_timezone(&Utc)))
        .map_err(|e| IndexError::Metadata(format!("bad timestamp: {e}")))
}

fn decode_kind(raw: &str) -> Result<DocKind, IndexError> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .map_err(|_| IndexError::Metadata(format!("unknown doc kind: {raw}")))
}

fn field<'a>(map: &'a FieldMap, key: &str) -> &'a str {
    map.get(key).map(String::as_str).unwrap_or("")
}

fn parse_number<T: std::str::FromStr>(map: &FieldMap, key: &str) -> Result<T, IndexError> {
    field(map, key)
        .parse()
        .map_err(|_| IndexError::Metadata(format!("bad numeric field {key}")))
}

pub fn document_to_fields(doc: &Document) -> FieldMap {
    let mut map = FieldMap::new();
    map.insert("doc_id".into(), doc.id.0.clone());
    map.insert("url".into(), doc.url.clone());
    map.insert("kind".into(), doc.kind.as_str().to_string());
    map.insert("language".into(), doc.language.clone());
    map.insert("title".into(), doc.title.clone());
    map.insert("published_at".into(), encode_time(&doc.published_at));
    map.insert("updated_at".into(), encode_time(&doc.updated_at));
    map.insert("effective_at".into(), encode_time(&doc.effective_at));
    map.insert("expires_at".into(), encode_time(&doc.expires_at));
    map.insert("geo_scope".into(), doc.geo_scope.clone());
    map.insert("currency".into(), doc.currency.clone());
    map.insert(
        "product_entities".into(),
        encode_list(&doc.product_entities),
    );
    map.insert("categories".into(), encode_list(&doc.categories));
    map.insert("authority".into(), doc.authority.to_string());
    map.insert("source_path".into(), doc.source_path.clone());
    map
}

pub fn document_from_fields(map: &FieldMap) -> Result<Document, IndexError> {
    let authority: f32 = parse_number(map, "authority")?;
    if !(0.0..=1.0).contains(&authority) {
        return Err(IndexError::Metadata(format!(
            "authority out of range: {authority}"
        )));
    }
    Ok(Document {
        id: DocRef(field(map, "doc_id").to_string()),
        url: field(map, "url").to_string(),
        kind: decode_kind(field(map, "kind"))?,
        language: field(map, "language").to_string(),
        title: field(map, "title").to_string(),
        published_at: decode_time(field(map, "published_at"))?,
        updated_at: decode_time(field(map, "updated_at"))?,
        effective_at: decode_time(field(map, "effective_at"))?,
        expires_at: decode_time(field(map, "expires_at"))?,
        geo_scope: field(map, "geo_scope").to_string(),
        currency: field(map, "currency").to_string(),
        product_entities: decode_list(field(map, "product_entities"))?,
        categories: decode_list(field(map, "categories"))?,
        authority,
        source_path: field(map, "source_path").to_string(),
    })
}

pub fn chunk_to_fields(chunk: &Chunk) -> FieldMap {
    let mut map = FieldMap::new();
    map.insert("chunk_id".into(), chunk.id.0.clone());
    map.insert("doc_id".into(), chunk.doc.0.clone());
    map.insert("position".into(), chunk.position.to_string());
    map.insert("token_count".into(), chunk.token_count.to_string());
    map.insert("has_numbers".into(), chunk.has_numbers.to_string());
    map.insert("has_currency".into(), chunk.has_currency.to_string());
    map.insert("start_line".into(), chunk.start_line.to_string());
    map.insert("end_line".into(), chunk.end_line.to_string());
    map.insert("start_char".into(), chunk.start_char.to_string());
    map.insert("end_char".into(), chunk.end_char.to_string());
    map.insert(
        "embedding_version".into(),
        chunk.embedding_version.clone(),
    );
    map
}

pub fn chunk_from_fields(map: &FieldMap, text: String) -> Result<Chunk, IndexError> {
    Ok(Chunk {
        id: ChunkRef(field(map, "chunk_id").to_string()),
        doc: DocRef(field(map, "doc_id").to_string()),
        position: parse_number(map, "position")?,
        text,
        token_count: parse_number(map, "token_count")?,
        has_numbers: field(map, "has_numbers") == "true",
        has_currency: field(map, "has_currency") == "true",
        start_line: parse_number(map, "start_line")?,
        end_line: parse_number(map, "end_line")?,
        start_char: parse_number(map, "start_char")?,
        end_char: parse_number(map, "end_char")?,
        embedding_version: field(map, "embedding_version").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_doc() -> Document {
        Document {
            id: DocRef("doc-1".into()),
            url: "https://www.bankofamerica.com/rewards".into(),
            kind: DocKind::Disclosure,
            language: "en".into(),
            title: "Preferred Rewards tiers".into(),
            published_at: Some(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()),
            updated_at: Some(Utc.with_ymd_and_hms(2025, 1, 15, 12, 30, 0).unwrap()),
            effective_at: None,
            expires_at: None,
            geo_scope: "US".into(),
            currency: "USD".into(),
            product_entities: vec!["Preferred Rewards".into(), "Gold tier".into()],
            categories: vec!["rewards".into(), "tiers".into()],
            authority: 0.925,
            source_path: "data/rewards.md".into(),
        }
    }

    #[test]
    fn document_round_trips_exactly() {
        let doc = sample_doc();
        let fields = document_to_fields(&doc);
        // Lists travel as JSON-encoded strings.
        assert!(fields["product_entities"].starts_with('['));
        // Absent optionals are the empty string, not null.
        assert_eq!(fields["effective_at"], "");
        let decoded = document_from_fields(&fields).unwrap();
        assert_eq!(decoded, doc);
    }

    #[test]
    fn chunk_round_trips_exactly() {
        let chunk = Chunk {
            id: ChunkRef("doc-1_chunk_0".into()),
            doc: DocRef("doc-1".into()),
            position: 0,
            text: "Gold tier requires $20,000 in combined balances.".into(),
            token_count: 9,
            has_numbers: true,
            has_currency: true,
            start_line: 1,
            end_line: 2,
            start_char: 0,
            end_char: 48,
            embedding_version: "mock-v1".into(),
        };
        let fields = chunk_to_fields(&chunk);
        let decoded = chunk_from_fields(&fields, chunk.text.clone()).unwrap();
        assert_eq!(decoded, chunk);
    }

    #[test]
    fn out_of_range_authority_is_rejected() {
        let mut fields = document_to_fields(&sample_doc());
        fields.insert("authority".into(), "1.7".into());
        assert!(document_from_fields(&fields).is_err());
    }

    #[test]
    fn malformed_list_is_an_error_not_empty() {
        let mut fields = document_to_fields(&sample_doc());
        fields.insert("categories".into(), "not-json".into());
        assert!(document_from_fields(&fields).is_err());
    }
}
