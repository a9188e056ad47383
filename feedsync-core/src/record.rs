//! Records mirrored into the secondary record store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::article::{Article, ArticleStatus, Author};
use crate::feed::FeedRef;

pub fn status_record_name(article_id: &str) -> String {
    format!("s|{article_id}")
}

pub fn article_record_name(article_id: &str) -> String {
    format!("a|{article_id}")
}

/// A large text field, held either inline or as a compressed blob.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoredText {
    Inline(String),
    Compressed(Vec<u8>),
}

impl StoredText {
    /// Compresses the text; keeps it inline if the encoder fails.
    pub fn compress(text: String, level: i32) -> Self {
        match zstd::encode_all(text.as_bytes(), level) {
            Ok(data) => StoredText::Compressed(data),
            Err(e) => {
                warn!(error = %e, "compression failed, storing text inline");
                StoredText::Inline(text)
            }
        }
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self, StoredText::Compressed(_))
    }

    pub fn decode(&self) -> std::io::Result<String> {
        match self {
            StoredText::Inline(text) => Ok(text.clone()),
            StoredText::Compressed(data) => {
                let bytes = zstd::decode_all(data.as_slice())?;
                String::from_utf8(bytes)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusRecord {
    pub record_name: String,
    pub feed_external_id: Option<String>,
    pub read: bool,
    pub starred: bool,
}

impl StatusRecord {
    pub fn new(article_id: &str, status: ArticleStatus, feed: Option<&FeedRef>) -> Self {
        Self {
            record_name: status_record_name(article_id),
            feed_external_id: feed.and_then(|f| f.external_id.clone()),
            read: status.read,
            starred: status.starred,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArticleRecord {
    pub record_name: String,
    /// Status record this one hangs off; deleting it deletes this record.
    pub article_status: String,
    pub feed_url: Option<String>,
    pub unique_id: String,
    pub title: Option<String>,
    pub content_html: Option<StoredText>,
    pub content_text: Option<StoredText>,
    pub url: Option<String>,
    pub external_url: Option<String>,
    pub summary: Option<String>,
    pub image_url: Option<String>,
    pub date_published: Option<DateTime<Utc>>,
    pub date_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub parsed_authors: Vec<String>,
}

impl ArticleRecord {
    pub fn new(article: &Article, feed: Option<&FeedRef>) -> Self {
        Self {
            record_name: article_record_name(&article.article_id),
            article_status: status_record_name(&article.article_id),
            feed_url: feed.map(|f| f.url.clone()),
            unique_id: article.unique_id.clone(),
            title: article.title.clone(),
            content_html: article.content_html.clone().map(StoredText::Inline),
            content_text: article.content_text.clone().map(StoredText::Inline),
            url: article.url.clone(),
            external_url: article.external_url.clone(),
            summary: article.summary.clone(),
            image_url: article.image_url.clone(),
            date_published: article.date_published,
            date_modified: article.date_modified,
            parsed_authors: encode_authors(&article.authors),
        }
    }

    pub fn compress(mut self, level: i32) -> Self {
        self.content_html = self.content_html.map(|text| compress_field(text, level));
        self.content_text = self.content_text.map(|text| compress_field(text, level));
        self
    }
}

fn compress_field(text: StoredText, level: i32) -> StoredText {
    match text {
        StoredText::Inline(text) => StoredText::compress(text, level),
        compressed => compressed,
    }
}

fn encode_authors(authors: &[Author]) -> Vec<String> {
    authors
        .iter()
        .filter_map(|author| serde_json::to_string(author).ok())
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "record_type")]
pub enum Record {
    ArticleStatus(StatusRecord),
    Article(ArticleRecord),
}

impl Record {
    pub fn record_name(&self) -> &str {
        match self {
            Record::ArticleStatus(record) => &record.record_name,
            Record::Article(record) => &record.record_name,
        }
    }

    pub fn compress(self, level: i32) -> Self {
        match self {
            Record::Article(record) => Record::Article(record.compress(level)),
            status => status,
        }
    }
}
