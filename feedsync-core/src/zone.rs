use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::article::{Article, ArticleStatus};
use crate::config::ZoneConfig;
use crate::error::SyncError;
use crate::feed::FeedDirectory;
use crate::record::{article_record_name, status_record_name, ArticleRecord, Record, StatusRecord};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ZoneError {
    #[error("record zone not found")]
    ZoneNotFound,
    #[error("request exceeds the record store limits")]
    LimitExceeded,
    #[error("record store unavailable: {0}")]
    Unavailable(String),
    #[error("record store rejected the request: {0}")]
    Rejected(String),
}

impl From<ZoneError> for SyncError {
    fn from(e: ZoneError) -> Self {
        match e {
            ZoneError::ZoneNotFound => SyncError::ZoneRevoked,
            ZoneError::LimitExceeded => {
                SyncError::InvalidParameter("record exceeds the record store limits".into())
            }
            ZoneError::Unavailable(msg) => SyncError::RemoteUnavailable(msg),
            ZoneError::Rejected(msg) => SyncError::InvalidParameter(msg),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ZoneId {
    pub zone_name: String,
    pub owner_name: String,
}

impl ZoneId {
    pub fn new(zone_name: impl Into<String>) -> Self {
        Self {
            zone_name: zone_name.into(),
            owner_name: "__defaultOwner__".to_string(),
        }
    }
}

/// The secondary record store, independent of the aggregator.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn create_zone(&self, zone: &ZoneId) -> Result<(), ZoneError>;

    /// Upserts `save` and deletes `delete` in one request.
    async fn modify(&self, zone: &ZoneId, save: &[Record], delete: &[String]) -> Result<(), ZoneError>;

    /// Writes only the records that do not exist yet.
    async fn save_if_absent(&self, zone: &ZoneId, records: &[Record]) -> Result<(), ZoneError>;

    /// Deletes every status record of a feed; article records cascade.
    async fn delete_status_records_for_feed(
        &self,
        zone: &ZoneId,
        feed_external_id: &str,
    ) -> Result<(), ZoneError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneState {
    Absent,
    Active,
    UserDeleted,
    Recreating,
}

/// Mirror intent for one article's status change.
#[derive(Debug, Clone, PartialEq)]
pub enum ArticleStatusUpdate {
    /// Upsert the status record and the article record.
    All { article: Article },
    /// Write both records unless they already exist.
    New { article: Article },
    /// Delete the status record, cascading to the article record.
    Delete { article_id: String },
    /// Upsert the status record and drop the article record.
    StatusOnly {
        article_id: String,
        feed_id: String,
        status: ArticleStatus,
    },
}

impl ArticleStatusUpdate {
    /// Read, unstarred articles keep only their status in the store.
    pub fn for_status_change(article: Article) -> Self {
        if article.status.is_worth_mirroring() {
            ArticleStatusUpdate::All { article }
        } else {
            ArticleStatusUpdate::StatusOnly {
                article_id: article.article_id,
                feed_id: article.feed_id,
                status: article.status,
            }
        }
    }
}

#[derive(Clone, Copy)]
enum WriteMode {
    Upsert,
    UpsertIfAbsent,
}

#[derive(Debug, Default)]
struct Batch {
    save: Vec<Record>,
    delete: Vec<String>,
}

impl Batch {
    fn len(&self) -> usize {
        self.save.len() + self.delete.len()
    }

    /// Splits at the middle of the records-then-ids sequence.
    fn split_at(mut self, at: usize) -> (Batch, Batch) {
        let save_at = at.min(self.save.len());
        let delete_at = at.saturating_sub(self.save.len()).min(self.delete.len());
        let rest = Batch {
            save: self.save.split_off(save_at),
            delete: self.delete.split_off(delete_at),
        };
        (self, rest)
    }

    fn plan(save: &[Record], delete: &[String], max: usize) -> VecDeque<Batch> {
        let mut batches = VecDeque::new();
        let mut rest = Batch {
            save: save.to_vec(),
            delete: delete.to_vec(),
        };
        while rest.len() > max {
            let (head, tail) = rest.split_at(max);
            batches.push_back(head);
            rest = tail;
        }
        if rest.len() > 0 {
            batches.push_back(rest);
        }
        batches
    }
}

/// Mirrors articles and their statuses into one zone of the record store.
#[derive(Clone)]
pub struct ArticlesZone {
    store: Arc<dyn ObjectStore>,
    zone: ZoneId,
    state: Arc<Mutex<ZoneState>>,
    config: ZoneConfig,
}

impl ArticlesZone {
    pub fn new(store: Arc<dyn ObjectStore>, config: ZoneConfig) -> Self {
        Self {
            store,
            zone: ZoneId::new(config.zone_name.clone()),
            state: Arc::new(Mutex::new(ZoneState::Absent)),
            config,
        }
    }

    pub fn zone_id(&self) -> &ZoneId {
        &self.zone
    }

    pub fn state(&self) -> ZoneState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ZoneState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub async fn ensure_zone(&self) -> Result<(), SyncError> {
        if self.state() == ZoneState::Active {
            return Ok(());
        }
        self.store.create_zone(&self.zone).await?;
        self.set_state(ZoneState::Active);
        Ok(())
    }

    pub async fn save_new_articles(
        &self,
        articles: &[Article],
        feeds: &FeedDirectory,
    ) -> Result<(), SyncError> {
        let mut records = Vec::new();
        for article in articles.iter().filter(|a| a.status.is_worth_mirroring()) {
            let feed = feeds.get(&article.feed_id);
            records.push(Record::ArticleStatus(StatusRecord::new(
                &article.article_id,
                article.status,
                feed,
            )));
            records.push(Record::Article(ArticleRecord::new(article, feed)));
        }
        if records.is_empty() {
            return Ok(());
        }

        let records = self.compress_records(records).await?;
        debug!(count = records.len(), "saving new article records");
        let records = &records;
        self.with_zone_recovery(move || self.write_records(WriteMode::Upsert, records, &[]))
            .await
    }

    pub async fn modify_articles(
        &self,
        updates: &[ArticleStatusUpdate],
        feeds: &FeedDirectory,
    ) -> Result<(), SyncError> {
        if updates.is_empty() {
            return Ok(());
        }

        let mut modify_records = Vec::new();
        let mut new_records = Vec::new();
        let mut delete_ids = Vec::new();

        for update in updates {
            match update {
                ArticleStatusUpdate::All { article } => {
                    let feed = feeds.get(&article.feed_id);
                    modify_records.push(Record::ArticleStatus(StatusRecord::new(
                        &article.article_id,
                        article.status,
                        feed,
                    )));
                    modify_records.push(Record::Article(ArticleRecord::new(article, feed)));
                }
                ArticleStatusUpdate::New { article } => {
                    let feed = feeds.get(&article.feed_id);
                    new_records.push(Record::ArticleStatus(StatusRecord::new(
                        &article.article_id,
                        article.status,
                        feed,
                    )));
                    new_records.push(Record::Article(ArticleRecord::new(article, feed)));
                }
                ArticleStatusUpdate::Delete { article_id } => {
                    delete_ids.push(status_record_name(article_id));
                }
                ArticleStatusUpdate::StatusOnly {
                    article_id,
                    feed_id,
                    status,
                } => {
                    modify_records.push(Record::ArticleStatus(StatusRecord::new(
                        article_id,
                        *status,
                        feeds.get(feed_id),
                    )));
                    delete_ids.push(article_record_name(article_id));
                }
            }
        }

        let modify_records = self.compress_records(modify_records).await?;
        let new_records = self.compress_records(new_records).await?;

        let (save, delete, fresh) = (&modify_records, &delete_ids, &new_records);
        self.with_zone_recovery(move || self.apply_modifications(save, delete, fresh))
            .await
    }

    pub async fn delete_articles(&self, feed_external_id: &str) -> Result<(), SyncError> {
        self.with_zone_recovery(move || {
            self.store
                .delete_status_records_for_feed(&self.zone, feed_external_id)
        })
        .await
    }

    async fn apply_modifications(
        &self,
        save: &[Record],
        delete: &[String],
        fresh: &[Record],
    ) -> Result<(), ZoneError> {
        self.write_records(WriteMode::Upsert, save, delete).await?;
        self.write_records(WriteMode::UpsertIfAbsent, fresh, &[]).await
    }

    /// Runs `op`; if the zone turns out to be deleted, recreates it and runs
    /// `op` exactly once more. Any other failure is returned as is.
    async fn with_zone_recovery<F, Fut>(&self, op: F) -> Result<(), SyncError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<(), ZoneError>>,
    {
        match op().await {
            Ok(()) => {
                self.set_state(ZoneState::Active);
                return Ok(());
            }
            Err(ZoneError::ZoneNotFound) => {}
            Err(e) => return Err(e.into()),
        }

        warn!(zone = %self.zone.zone_name, "record zone was deleted, recreating it");
        self.set_state(ZoneState::UserDeleted);
        self.set_state(ZoneState::Recreating);
        if let Err(e) = self.store.create_zone(&self.zone).await {
            self.set_state(ZoneState::UserDeleted);
            return Err(e.into());
        }
        self.set_state(ZoneState::Active);
        info!(zone = %self.zone.zone_name, "record zone recreated, retrying");

        match op().await {
            Ok(()) => Ok(()),
            Err(ZoneError::ZoneNotFound) => {
                self.set_state(ZoneState::UserDeleted);
                Err(SyncError::ZoneRevoked)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Sends records in size-bounded batches; a batch the store rejects as
    /// too large is halved and each half sent again.
    async fn write_records(
        &self,
        mode: WriteMode,
        save: &[Record],
        delete: &[String],
    ) -> Result<(), ZoneError> {
        let max = self.config.max_records_per_request.max(1);
        let mut pending = Batch::plan(save, delete, max);

        while let Some(batch) = pending.pop_front() {
            let result = match mode {
                WriteMode::Upsert => self.store.modify(&self.zone, &batch.save, &batch.delete).await,
                WriteMode::UpsertIfAbsent => self.store.save_if_absent(&self.zone, &batch.save).await,
            };
            match result {
                Ok(()) => {}
                Err(ZoneError::LimitExceeded) if batch.len() > 1 => {
                    let half = batch.len() / 2;
                    debug!(size = batch.len(), "record batch too large, splitting");
                    let (head, tail) = batch.split_at(half);
                    pending.push_front(tail);
                    pending.push_front(head);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn compress_records(&self, records: Vec<Record>) -> Result<Vec<Record>, SyncError> {
        if records.is_empty() {
            return Ok(records);
        }
        let level = self.config.compression_level;
        let compressed = tokio::task::spawn_blocking(move || {
            records
                .into_iter()
                .map(|record| record.compress(level))
                .collect::<Vec<_>>()
        })
        .await?;
        Ok(compressed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::StatusRecord;

    fn status(id: &str) -> Record {
        Record::ArticleStatus(StatusRecord::new(id, ArticleStatus::default(), None))
    }

    #[test]
    fn plan_cuts_records_then_ids_at_the_limit() {
        let save: Vec<Record> = (0..3).map(|i| status(&i.to_string())).collect();
        let delete: Vec<String> = (0..2).map(|i| format!("a|{i}")).collect();
        let batches = Batch::plan(&save, &delete, 2);
        let sizes: Vec<(usize, usize)> = batches.iter().map(|b| (b.save.len(), b.delete.len())).collect();
        assert_eq!(sizes, vec![(2, 0), (1, 1), (0, 1)]);
    }

    #[test]
    fn split_never_leaves_an_empty_half() {
        let batch = Batch {
            save: vec![status("1")],
            delete: vec!["a|2".into()],
        };
        let (head, tail) = batch.split_at(1);
        assert_eq!(head.len(), 1);
        assert_eq!(tail.len(), 1);
    }

    #[test]
    fn read_unstarred_change_keeps_only_the_status() {
        let article = Article {
            article_id: "h1".into(),
            feed_id: "42".into(),
            unique_id: "u1".into(),
            title: None,
            content_html: None,
            content_text: None,
            url: None,
            external_url: None,
            summary: None,
            image_url: None,
            date_published: None,
            date_modified: None,
            authors: vec![],
            tags: vec![],
            status: ArticleStatus { read: true, starred: false },
        };
        assert!(matches!(
            ArticleStatusUpdate::for_status_change(article),
            ArticleStatusUpdate::StatusOnly { .. }
        ));
    }
}
