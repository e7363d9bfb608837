use serde::{Deserialize, Serialize};

/// Lifecycle of a queue row. The happy path is `Pending -> Processing -> Done`,
/// never reversed; at most one worker holds a given ISBN in `Processing`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum QueueStatus {
    Pending,
    Processing,
    Done,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Done => "done",
        }
    }

    pub fn parse_status(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(QueueStatus::Pending),
            "processing" => Some(QueueStatus::Processing),
            "done" => Some(QueueStatus::Done),
            _ => None,
        }
    }
}

/// A normalized ISBNdb record. Every field has already been sanitized by
/// `ingest::parse_books`: strings are NUL-free and trimmed, numeric fields
/// default to zero when the upstream value is malformed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub isbn13: String,
    pub title: String,
    pub long_title: String,
    pub authors: String,
    pub publisher: String,
    pub date_published: String,
    pub synopsis: String,
    pub language: String,
    pub subjects: String,
    pub edition: String,
    pub isbn: String,
    pub isbn10: String,
    pub dewey_decimal: String,
    pub cover: String,
    pub binding: String,
    pub dimensions: String,
    pub pages: i64,
    pub msrp: f64,
}
