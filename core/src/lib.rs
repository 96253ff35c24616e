//! Shared building blocks for the strata pipeline: the record model, domain-key
//! extraction, chunked shard reading, report persistence, deterministic
//! randomness, the worker-pool helper, and HTML text extraction.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub mod domain;
pub mod extract;
pub mod persist;
pub mod pool;
pub mod rng;
pub mod shard;

/// One crawled page as it appears in a shard row. Fields beyond `url` and
/// `content` are carried verbatim through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub content: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A record after routing: tagged with its domain key and the shard it came
/// from. This is the row format of bucket files and sample files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutedRecord {
    pub url: String,
    pub domain: String,
    pub file_source: String,
    #[serde(default)]
    pub content: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Outcome classification of content normalization for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatTag {
    /// Structured extraction succeeded and produced non-empty text.
    Markdown,
    /// Nothing to extract; `text` is the raw content passed through.
    Raw,
    /// Extraction blew up; the raw content is preserved untouched.
    Error,
}

/// A sampled record augmented with extracted text. Created once, never
/// mutated; incremental re-runs only add records for missing domains.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub url: String,
    pub domain: String,
    /// Original raw markup, kept so no data is lost regardless of outcome.
    pub content: String,
    pub text: String,
    pub format_tag: FormatTag,
    pub source_file: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}
