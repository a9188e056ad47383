use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::article::SharedArticles;
use crate::error::SyncError;
use crate::remote::{RemoteStory, StoryHash, StoryService};

/// Bookkeeping persisted next to the account.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SyncMetadata {
    pub last_article_fetch_start: Option<DateTime<Utc>>,
    pub last_article_fetch_end: Option<DateTime<Utc>>,
    /// Feeds whose initial download completed.
    #[serde(default)]
    pub synced_feed_ids: BTreeSet<String>,
}

impl SyncMetadata {
    pub fn has_sync_history(&self, feed_id: &str) -> bool {
        self.synced_feed_ids.contains(feed_id)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub number_of_tasks: usize,
    pub number_remaining: usize,
}

impl ProgressSnapshot {
    pub fn is_complete(&self) -> bool {
        self.number_remaining == 0
    }
}

/// Task counter the host observes while a refresh runs.
#[derive(Debug, Clone)]
pub struct RefreshProgress {
    tx: Arc<watch::Sender<ProgressSnapshot>>,
}

impl Default for RefreshProgress {
    fn default() -> Self {
        let (tx, _rx) = watch::channel(ProgressSnapshot::default());
        Self { tx: Arc::new(tx) }
    }
}

impl RefreshProgress {
    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        *self.tx.borrow()
    }

    pub fn add_tasks(&self, count: usize) {
        self.tx.send_modify(|p| {
            p.number_of_tasks += count;
            p.number_remaining += count;
        });
    }

    pub fn complete_task(&self) {
        self.tx.send_modify(|p| {
            p.number_remaining = p.number_remaining.saturating_sub(1);
            if p.number_remaining == 0 {
                p.number_of_tasks = 0;
            }
        });
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchSummary {
    pub pages_or_chunks: usize,
    pub created: Vec<String>,
    pub updated: usize,
}

impl FetchSummary {
    fn absorb(&mut self, created: Vec<String>, updated: usize) {
        self.pages_or_chunks += 1;
        self.created.extend(created);
        self.updated += updated;
    }
}

#[derive(Clone)]
pub struct StoryFetcher {
    service: Arc<dyn StoryService>,
    articles: SharedArticles,
    progress: RefreshProgress,
    hash_batch_limit: usize,
}

impl StoryFetcher {
    pub fn new(
        service: Arc<dyn StoryService>,
        articles: SharedArticles,
        progress: RefreshProgress,
        hash_batch_limit: usize,
    ) -> Self {
        Self {
            service,
            articles,
            progress,
            hash_batch_limit: hash_batch_limit.max(1),
        }
    }

    pub fn progress(&self) -> &RefreshProgress {
        &self.progress
    }

    /// Pages through a feed without sync history, newest first, until the
    /// service runs dry or a page holds nothing newer than `since`.
    pub async fn download_feed(
        &self,
        feed_id: &str,
        since: DateTime<Utc>,
    ) -> Result<FetchSummary, SyncError> {
        let mut summary = FetchSummary::default();
        let mut page = 1;
        loop {
            self.progress.add_tasks(1);
            let result = self.service.fetch_stories_by_page(feed_id, page).await;
            let stories = match result {
                Ok(stories) => stories,
                Err(e) => {
                    self.progress.complete_task();
                    warn!(feed = %feed_id, page, error = %e, "page download failed");
                    return Err(e);
                }
            };

            if stories.is_empty() {
                self.progress.complete_task();
                break;
            }

            let recent: Vec<RemoteStory> = stories
                .into_iter()
                .filter(|story| story.date_published.map_or(true, |date| date >= since))
                .collect();
            let reached_cutoff = recent.is_empty();

            let applied = self.articles.write().await.apply_stories(&recent);
            summary.absorb(applied.created, applied.updated);
            self.progress.complete_task();

            if reached_cutoff {
                debug!(feed = %feed_id, page, "no more recent stories");
                break;
            }
            page += 1;
        }
        info!(feed = %feed_id, pages = summary.pages_or_chunks, created = summary.created.len(), "feed download finished");
        Ok(summary)
    }

    /// Resolves story hashes in service-sized chunks. The fetch watermark in
    /// `metadata` only ever advances to the last chunk the service answered.
    pub async fn refresh_stories_by_hash(
        &self,
        hashes: &[StoryHash],
        metadata: &mut SyncMetadata,
    ) -> Result<FetchSummary, SyncError> {
        let mut summary = FetchSummary::default();
        let mut last_fetch: Option<DateTime<Utc>> = None;

        let chunks: Vec<&[StoryHash]> = hashes.chunks(self.hash_batch_limit).collect();
        self.progress.add_tasks(chunks.len());

        let mut outcome = Ok(());
        for (index, chunk) in chunks.iter().enumerate() {
            match self.service.fetch_stories_by_hash(chunk).await {
                Ok((stories, server_date)) => {
                    let applied = self.articles.write().await.apply_stories(&stories);
                    summary.absorb(applied.created, applied.updated);
                    last_fetch = Some(server_date);
                    self.progress.complete_task();
                }
                Err(e) => {
                    warn!(chunk = index, error = %e, "story hash refresh failed");
                    for _ in index..chunks.len() {
                        self.progress.complete_task();
                    }
                    outcome = Err(e);
                    break;
                }
            }
        }

        if let Some(date) = last_fetch {
            metadata.last_article_fetch_start = Some(date);
            metadata.last_article_fetch_end = Some(Utc::now());
        }
        outcome.map(|_| summary)
    }
}
