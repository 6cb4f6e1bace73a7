//! The result normalizer — the single point of schema translation between
//! whatever shape an MCP service's `/invoke` body happens to have and the
//! [`NormalizedDocument`] every downstream node consumes. No node past `execute_tool_calls`
//! may read `metadata["raw"]` for business logic; it exists for debugging only.

use std::collections::HashMap;

use tooling::mcp::{RawResult, ServiceKind};

use crate::state::{NormalizedDocument, SourceType};

/// Inline row-set threshold for the SQL derivation rule: row counts at or below this emit one
/// document per row; above it, one aggregated document.
const SQL_INLINE_ROW_THRESHOLD: usize = 20;

pub struct Normalizer;

impl Normalizer {
    /// Reshape one raw MCP result into zero or more normalized documents. Search results may
    /// fan out into one document per hit; every other kind produces exactly one.
    pub fn normalize(raw: &RawResult) -> Vec<NormalizedDocument> {
        match raw.kind {
            ServiceKind::Rag => vec![Self::normalize_rag(raw)],
            ServiceKind::Search => Self::normalize_search(raw),
            ServiceKind::Download => vec![Self::normalize_download(raw)],
            ServiceKind::Sql => Self::normalize_sql(raw),
            ServiceKind::Dns => vec![Self::normalize_dns(raw)],
            ServiceKind::Other => vec![Self::normalize_other(raw)],
        }
    }

    /// A well-formed tool error becomes a document with empty content and the error note
    /// preserved in metadata as a `ToolError`, never a panic.
    pub fn normalize_tool_error(service_id: &str, message: &str) -> NormalizedDocument {
        let mut metadata = HashMap::new();
        metadata.insert("error".to_string(), serde_json::Value::String(message.to_string()));
        NormalizedDocument {
            id: format!("{service_id}-error"),
            content: String::new(),
            title: String::new(),
            url: String::new(),
            source: service_id.to_string(),
            source_type: SourceType::Other,
            relevance_score: None,
            metadata,
            summary: None,
            full_content_available: false,
        }
    }

    fn normalize_rag(raw: &RawResult) -> NormalizedDocument {
        let body = &raw.body;
        let metadata = extract_metadata(body);
        let source = first_non_empty(&metadata, &["source", "filename", "title"])
            .unwrap_or_else(|| raw.service_id.clone());
        NormalizedDocument {
            id: string_field(body, "id").unwrap_or_else(|| format!("{}-{}", raw.service_id, 0)),
            content: string_field(body, "content").or_else(|| string_field(body, "text")).unwrap_or_default(),
            title: string_field(body, "title").unwrap_or_default(),
            url: String::new(),
            source,
            source_type: SourceType::LocalDocument,
            relevance_score: float_field(body, "score").or_else(|| float_field(body, "relevance_score")),
            metadata,
            summary: string_field(body, "summary"),
            full_content_available: bool_field(body, "full_content_available").unwrap_or(true),
        }
    }

    fn normalize_search(raw: &RawResult) -> Vec<NormalizedDocument> {
        let hits = raw
            .body
            .get("results")
            .or_else(|| raw.body.get("hits"))
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        if hits.is_empty() {
            // Not a multi-hit payload: treat the body itself as a single aggregated result.
            return vec![Self::aggregate_search(raw, &[raw.body.clone()])];
        }

        // Per-hit emission when the registry/config requests it is a caller decision; the
        // normalizer's default is the single-aggregated-document form.
        vec![Self::aggregate_search(raw, &hits)]
    }

    fn aggregate_search(raw: &RawResult, hits: &[serde_json::Value]) -> NormalizedDocument {
        let mut domains: Vec<String> = hits
            .iter()
            .filter_map(|hit| string_field(hit, "url"))
            .filter_map(|url| registered_domain(&url))
            .collect();
        domains.sort();
        domains.dedup();

        let source = if domains.is_empty() {
            format!("search: {}", raw.service_id)
        } else {
            format!("search: {}", domains.join(", "))
        };

        let content = hits
            .iter()
            .enumerate()
            .map(|(i, hit)| {
                let title = string_field(hit, "title").unwrap_or_default();
                let snippet = string_field(hit, "content")
                    .or_else(|| string_field(hit, "snippet"))
                    .unwrap_or_default();
                format!("[{}] {}: {}", i + 1, title, snippet)
            })
            .collect::<Vec<_>>()
            .join("\n");

        let mut metadata = HashMap::new();
        metadata.insert("hit_count".to_string(), serde_json::json!(hits.len()));
        metadata.insert("raw".to_string(), serde_json::json!(hits));

        NormalizedDocument {
            id: format!("{}-aggregate", raw.service_id),
            content,
            title: String::new(),
            url: String::new(),
            source,
            source_type: SourceType::WebSearch,
            relevance_score: None,
            metadata,
            summary: None,
            full_content_available: true,
        }
    }

    fn normalize_download(raw: &RawResult) -> NormalizedDocument {
        let body = &raw.body;
        let requested_url = string_field(body, "url").unwrap_or_default();
        let source = registered_domain(&requested_url).unwrap_or_else(|| raw.service_id.clone());
        NormalizedDocument {
            id: format!("{}-download", raw.service_id),
            content: string_field(body, "content").or_else(|| string_field(body, "body")).unwrap_or_default(),
            title: string_field(body, "title").unwrap_or_default(),
            url: requested_url,
            source,
            source_type: SourceType::DownloadResult,
            relevance_score: None,
            metadata: extract_metadata(body),
            summary: None,
            full_content_available: true,
        }
    }

    fn normalize_sql(raw: &RawResult) -> Vec<NormalizedDocument> {
        let rows = raw.body.get("rows").and_then(|v| v.as_array()).cloned().unwrap_or_default();
        let table = string_field(&raw.body, "table")
            .or_else(|| table_from_query(&string_field(&raw.body, "query").unwrap_or_default()));
        let source = table.unwrap_or_else(|| raw.service_id.clone());

        if rows.len() <= SQL_INLINE_ROW_THRESHOLD {
            rows.iter()
                .enumerate()
                .map(|(i, row)| NormalizedDocument {
                    id: format!("{}-row-{}", raw.service_id, i),
                    content: row.to_string(),
                    title: String::new(),
                    url: String::new(),
                    source: source.clone(),
                    source_type: SourceType::SqlRow,
                    relevance_score: None,
                    metadata: extract_metadata(row),
                    summary: None,
                    full_content_available: true,
                })
                .collect()
        } else {
            let mut metadata = HashMap::new();
            metadata.insert("row_count".to_string(), serde_json::json!(rows.len()));
            vec![NormalizedDocument {
                id: format!("{}-rows-aggregate", raw.service_id),
                content: serde_json::Value::Array(rows).to_string(),
                title: String::new(),
                url: String::new(),
                source,
                source_type: SourceType::SqlRow,
                relevance_score: None,
                metadata,
                summary: None,
                full_content_available: true,
            }]
        }
    }

    fn normalize_dns(raw: &RawResult) -> NormalizedDocument {
        let body = &raw.body;
        let name = string_field(body, "name").unwrap_or_else(|| raw.service_id.clone());
        let records = body.get("records").and_then(|v| v.as_array()).cloned().unwrap_or_default();
        let content = records
            .iter()
            .map(|r| r.to_string())
            .collect::<Vec<_>>()
            .join("\n");

        NormalizedDocument {
            id: format!("{}-dns", raw.service_id),
            content,
            title: String::new(),
            url: String::new(),
            source: name,
            source_type: SourceType::DnsRecord,
            relevance_score: None,
            metadata: extract_metadata(body),
            summary: None,
            full_content_available: true,
        }
    }

    fn normalize_other(raw: &RawResult) -> NormalizedDocument {
        let body = &raw.body;
        let source = first_non_empty(&extract_metadata(body), &["source", "title"])
            .unwrap_or_else(|| raw.service_id.clone());
        NormalizedDocument {
            id: format!("{}-other", raw.service_id),
            content: string_field(body, "content").unwrap_or_else(|| body.to_string()),
            title: string_field(body, "title").unwrap_or_default(),
            url: string_field(body, "url").unwrap_or_default(),
            source,
            source_type: SourceType::Other,
            relevance_score: float_field(body, "score"),
            metadata: extract_metadata(body),
            summary: None,
            full_content_available: true,
        }
    }
}

fn extract_metadata(value: &serde_json::Value) -> HashMap<String, serde_json::Value> {
    value
        .get("metadata")
        .and_then(|m| m.as_object())
        .map(|m| m.clone().into_iter().collect())
        .unwrap_or_default()
}

fn first_non_empty(metadata: &HashMap<String, serde_json::Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        metadata.get(*key).and_then(|v| v.as_str()).filter(|s| !s.is_empty()).map(str::to_string)
    })
}

fn string_field(value: &serde_json::Value, key: &str) -> Option<String> {
    value.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

fn float_field(value: &serde_json::Value, key: &str) -> Option<f64> {
    value.get(key).and_then(|v| v.as_f64())
}

fn bool_field(value: &serde_json::Value, key: &str) -> Option<bool> {
    value.get(key).and_then(|v| v.as_bool())
}

/// Extract the registered domain from an absolute URL without pulling in a full URL-parsing
/// dependency: strip scheme, take everything up to the first `/`, drop a leading `www.`.
fn registered_domain(url: &str) -> Option<String> {
    let without_scheme = url.split("://").nth(1).unwrap_or(url);
    let host = without_scheme.split('/').next()?;
    let host = host.split('@').last().unwrap_or(host);
    let host = host.split(':').next().unwrap_or(host);
    if host.is_empty() {
        return None;
    }
    Some(host.strip_prefix("www.").unwrap_or(host).to_string())
}

/// Best-effort `FROM <table>` extraction for SQL `source` attribution.
fn table_from_query(query: &str) -> Option<String> {
    let lower = query.to_lowercase();
    let idx = lower.find(" from ")?;
    let rest = query[idx + 6..].trim_start();
    rest.split(|c: char| c.is_whitespace() || c == ';' || c == ',')
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(kind: ServiceKind, body: serde_json::Value) -> RawResult {
        RawResult { service_id: "svc".to_string(), kind, body }
    }

    #[test]
    fn rag_document_source_falls_back_through_metadata_keys() {
        let result = raw(
            ServiceKind::Rag,
            serde_json::json!({
                "content": "generation forecasting rules...",
                "metadata": { "filename": "GOST_R_52633.3-2011" },
                "score": 0.87
            }),
        );
        let docs = Normalizer::normalize(&result);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].source, "GOST_R_52633.3-2011");
        assert_eq!(docs[0].source_type, SourceType::LocalDocument);
        assert_eq!(docs[0].relevance_score, Some(0.87));
    }

    #[test]
    fn search_aggregates_unique_sorted_domains() {
        let result = raw(
            ServiceKind::Search,
            serde_json::json!({
                "results": [
                    { "url": "https://docs.cntd.ru/a", "title": "A", "content": "..." },
                    { "url": "https://cyberleninka.ru/b", "title": "B", "content": "..." },
                    { "url": "https://www.docs.cntd.ru/c", "title": "C", "content": "..." }
                ]
            }),
        );
        let docs = Normalizer::normalize(&result);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].source, "search: cyberleninka.ru, docs.cntd.ru");
        assert_eq!(docs[0].source_type, SourceType::WebSearch);
    }

    #[test]
    fn download_source_is_requested_url_domain() {
        let result = raw(
            ServiceKind::Download,
            serde_json::json!({ "url": "https://example.org/file.pdf", "content": "body text" }),
        );
        let docs = Normalizer::normalize(&result);
        assert_eq!(docs[0].source, "example.org");
        assert_eq!(docs[0].source_type, SourceType::DownloadResult);
    }

    #[test]
    fn sql_rows_inline_below_threshold() {
        let result = raw(
            ServiceKind::Sql,
            serde_json::json!({
                "query": "SELECT * FROM contacts WHERE id = 1",
                "rows": [{"id": 1, "name": "a"}, {"id": 2, "name": "b"}]
            }),
        );
        let docs = Normalizer::normalize(&result);
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].source, "contacts");
        assert_eq!(docs[0].source_type, SourceType::SqlRow);
    }

    #[test]
    fn ambiguous_source_falls_back_to_service_id_never_unknown() {
        let result = raw(ServiceKind::Other, serde_json::json!({ "content": "x" }));
        let docs = Normalizer::normalize(&result);
        assert_eq!(docs[0].source, "svc");
        assert_ne!(docs[0].source, "Unknown");
    }

    #[test]
    fn tool_error_becomes_empty_content_document_with_error_metadata() {
        let doc = Normalizer::normalize_tool_error("rag-server", "connection reset");
        assert_eq!(doc.content, "");
        assert_eq!(doc.metadata.get("error").and_then(|v| v.as_str()), Some("connection reset"));
    }

    #[test]
    fn normalizing_an_already_normalized_document_is_the_identity() {
        let result = raw(
            ServiceKind::Rag,
            serde_json::json!({ "content": "x", "metadata": { "source": "doc1" } }),
        );
        let once = Normalizer::normalize(&result);
        let twice = Normalizer::normalize(&raw(
            ServiceKind::Rag,
            serde_json::json!({ "content": once[0].content, "metadata": { "source": once[0].source } }),
        ));
        assert_eq!(once[0].source, twice[0].source);
        assert_eq!(once[0].content, twice[0].content);
    }
}
