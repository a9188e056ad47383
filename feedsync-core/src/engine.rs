use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::article::{Article, SharedArticles, StatusKind};
use crate::config::SyncConfig;
use crate::data::DataApi;
use crate::error::SyncError;
use crate::feed::{is_root_folder, Feed, SharedAccount};
use crate::fetcher::{RefreshProgress, StoryFetcher, SyncMetadata};
use crate::ledger::{PendingLedger, SyncStatus};
use crate::propagator::{sync_story_state, StatusPropagator};
use crate::reconcile::{reconcile, ReconcileReport};
use crate::remote::{StoryHash, StoryService, TaxonomyService};
use crate::zone::{ArticleStatusUpdate, ArticlesZone};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub taxonomy: ReconcileReport,
    pub feeds_downloaded: usize,
    pub articles_created: usize,
    pub statuses_adopted: usize,
}

#[derive(Debug, Clone)]
pub enum SyncEvent {
    RefreshFinished(RefreshSummary),
    RefreshFailed(String),
    MirrorFailed(String),
}

/// Host-facing facade: owns the account state and runs refresh cycles.
pub struct SyncEngine {
    account: SharedAccount,
    articles: SharedArticles,
    ledger: PendingLedger,
    metadata: Mutex<SyncMetadata>,
    taxonomy: Arc<dyn TaxonomyService>,
    fetcher: StoryFetcher,
    propagator: StatusPropagator,
    stories: Arc<dyn StoryService>,
    zone: Option<ArticlesZone>,
    data: Option<DataApi>,
    events: Option<mpsc::Sender<SyncEvent>>,
    throttle: AtomicBool,
    refresh_lock: Mutex<()>,
    config: SyncConfig,
}

pub struct SyncEngineBuilder {
    account: SharedAccount,
    articles: SharedArticles,
    ledger: PendingLedger,
    metadata: SyncMetadata,
    taxonomy: Arc<dyn TaxonomyService>,
    stories: Arc<dyn StoryService>,
    zone: Option<ArticlesZone>,
    data: Option<DataApi>,
    events: Option<mpsc::Sender<SyncEvent>>,
    progress: RefreshProgress,
    config: SyncConfig,
}

impl SyncEngineBuilder {
    pub fn metadata(mut self, metadata: SyncMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn zone(mut self, zone: ArticlesZone) -> Self {
        self.zone = Some(zone);
        self
    }

    pub fn data_api(mut self, data: DataApi) -> Self {
        self.data = Some(data);
        self
    }

    pub fn events(mut self, events: mpsc::Sender<SyncEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn progress(mut self, progress: RefreshProgress) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> SyncEngine {
        let fetcher = StoryFetcher::new(
            Arc::clone(&self.stories),
            self.articles.clone(),
            self.progress,
            self.config.refresh.hash_batch_limit,
        );
        let propagator = StatusPropagator::new(
            Arc::clone(&self.stories),
            self.ledger.clone(),
            self.config.statuses.clone(),
        );
        SyncEngine {
            account: self.account,
            articles: self.articles,
            ledger: self.ledger,
            metadata: Mutex::new(self.metadata),
            taxonomy: self.taxonomy,
            fetcher,
            propagator,
            stories: self.stories,
            zone: self.zone,
            data: self.data,
            events: self.events,
            throttle: AtomicBool::new(false),
            refresh_lock: Mutex::new(()),
            config: self.config,
        }
    }
}

impl SyncEngine {
    pub fn builder(
        account: SharedAccount,
        articles: SharedArticles,
        ledger: PendingLedger,
        taxonomy: Arc<dyn TaxonomyService>,
        stories: Arc<dyn StoryService>,
    ) -> SyncEngineBuilder {
        SyncEngineBuilder {
            account,
            articles,
            ledger,
            metadata: SyncMetadata::default(),
            taxonomy,
            stories,
            zone: None,
            data: None,
            events: None,
            progress: RefreshProgress::default(),
            config: SyncConfig::default(),
        }
    }

    pub fn account(&self) -> &SharedAccount {
        &self.account
    }

    pub fn articles(&self) -> &SharedArticles {
        &self.articles
    }

    pub fn ledger(&self) -> &PendingLedger {
        &self.ledger
    }

    pub fn progress(&self) -> &RefreshProgress {
        self.fetcher.progress()
    }

    pub async fn metadata(&self) -> SyncMetadata {
        self.metadata.lock().await.clone()
    }

    pub fn is_throttled(&self) -> bool {
        self.throttle.load(Ordering::SeqCst)
    }

    /// One full cycle: taxonomy, then stories, then local status changes.
    pub async fn refresh_all(&self) -> Result<RefreshSummary, SyncError> {
        let _cycle = self.refresh_lock.lock().await;
        let mut summary = RefreshSummary::default();
        let mut created = Vec::new();

        let snapshot = self.taxonomy.fetch_taxonomy().await?;
        summary.taxonomy = {
            let mut account = self.account.write().await;
            reconcile(&mut account, &snapshot)
        };
        self.forget_removed_feeds().await;

        let feed_ids = self.account.read().await.feed_ids();
        let since = self.config.refresh.cutoff(Utc::now());
        for feed_id in feed_ids {
            if self.metadata.lock().await.has_sync_history(&feed_id) {
                continue;
            }
            let fetched = self.fetcher.download_feed(&feed_id, since).await?;
            created.extend(fetched.created);
            self.metadata.lock().await.synced_feed_ids.insert(feed_id);
            summary.feeds_downloaded += 1;
        }

        let unread = self.stories.fetch_unread_story_hashes().await?;
        let starred = self.stories.fetch_starred_story_hashes().await?;
        let missing = self.missing_story_hashes(&unread, &starred).await;
        if !missing.is_empty() {
            let mut watermark = self.metadata.lock().await.clone();
            let fetched = self
                .fetcher
                .refresh_stories_by_hash(&missing, &mut watermark)
                .await;
            {
                let mut metadata = self.metadata.lock().await;
                metadata.last_article_fetch_start = watermark.last_article_fetch_start;
                metadata.last_article_fetch_end = watermark.last_article_fetch_end;
            }
            created.extend(fetched?.created);
        }

        let mut adopted =
            sync_story_state(&self.articles, &self.ledger, StatusKind::Read, &unread).await;
        adopted.extend(
            sync_story_state(&self.articles, &self.ledger, StatusKind::Starred, &starred).await,
        );
        summary.statuses_adopted = adopted.len();

        let pushed = self.send_article_statuses().await;

        summary.articles_created = created.len();
        self.mirror_new_articles(&created).await;
        let fresh: HashSet<&String> = created.iter().collect();
        adopted.retain(|id| !fresh.contains(id));
        adopted.sort();
        adopted.dedup();
        self.mirror_status_changes(&adopted).await;
        self.persist().await;
        pushed?;

        info!(
            feeds_downloaded = summary.feeds_downloaded,
            articles_created = summary.articles_created,
            statuses_adopted = summary.statuses_adopted,
            "refresh finished"
        );
        Ok(summary)
    }

    /// Pushes pending local changes. A rate-limited push makes the next
    /// attempt send one status per call.
    pub async fn send_article_statuses(&self) -> Result<(), SyncError> {
        let throttle = self.is_throttled();
        let result = self.propagator.send_article_statuses(throttle).await;
        match &result {
            Ok(()) => self.throttle.store(false, Ordering::SeqCst),
            Err(e) if e.is_rate_limited() => {
                warn!("status push was rate limited, throttling the next cycle");
                self.throttle.store(true, Ordering::SeqCst);
            }
            Err(_) => {}
        }
        result
    }

    /// Applies a local read/starred change and queues it for the service.
    pub async fn mark_articles(
        &self,
        article_ids: &[String],
        kind: StatusKind,
        flag: bool,
    ) -> Result<Vec<String>, SyncError> {
        let (changed, updated) = {
            let mut store = self.articles.write().await;
            let changed = store.mark(article_ids, kind, flag);
            let updated = store.cloned(&changed);
            (changed, updated)
        };
        if changed.is_empty() {
            return Ok(changed);
        }

        let statuses = changed
            .iter()
            .map(|id| SyncStatus::new(id.clone(), kind, flag))
            .collect();
        self.ledger.insert_statuses(statuses).await?;

        self.mirror_updates(updated).await;
        Ok(changed)
    }

    /// Subscribes to a feed and downloads its recent stories.
    pub async fn create_feed(&self, url: &str, folder: Option<&str>) -> Result<Feed, SyncError> {
        let folder = folder.filter(|name| !is_root_folder(name));
        let remote = self.taxonomy.subscribe(url, folder).await?;

        let feed = {
            let mut account = self.account.write().await;
            let mut feed = Feed::new(&remote.feed_id, &remote.name, &remote.url);
            feed.home_page_url = remote.home_page_url.clone();
            feed.favicon_url = remote.favicon_url.clone();
            account.create_feeds(vec![feed]);
            if let Some(folder) = folder {
                account.ensure_folder(folder);
                account.add_feed_to_folder(folder, &remote.feed_id);
                account.remove_feed_from_root(&remote.feed_id);
                if let Some(feed) = account.existing_feed_mut(&remote.feed_id) {
                    feed.save_folder_relationship(folder, folder);
                }
            }
            account
                .existing_feed(&remote.feed_id)
                .cloned()
                .ok_or_else(|| SyncError::InvalidParameter(format!("feed {} vanished", remote.feed_id)))?
        };

        let since = self.config.refresh.cutoff(Utc::now());
        let fetched = self.fetcher.download_feed(&feed.feed_id, since).await?;
        self.metadata
            .lock()
            .await
            .synced_feed_ids
            .insert(feed.feed_id.clone());
        self.mirror_new_articles(&fetched.created).await;
        self.persist().await;
        Ok(feed)
    }

    /// Unsubscribes from a feed in one container (the root when `folder` is
    /// `None`). Articles are dropped once no container holds the feed.
    pub async fn delete_feed(&self, feed_id: &str, folder: Option<&str>) -> Result<(), SyncError> {
        let external_id = {
            let account = self.account.read().await;
            let feed = account
                .existing_feed(feed_id)
                .ok_or_else(|| SyncError::InvalidParameter(format!("unknown feed {feed_id}")))?;
            feed.external_id
                .clone()
                .ok_or_else(|| SyncError::InvalidParameter(format!("feed {feed_id} has no external id")))?
        };
        let folder = folder.filter(|name| !is_root_folder(name));

        self.taxonomy.unsubscribe(&external_id, folder).await?;

        let still_referenced = {
            let mut account = self.account.write().await;
            match folder {
                Some(name) => {
                    account.remove_feed_from_folder(name, feed_id);
                    if let Some(feed) = account.existing_feed_mut(feed_id) {
                        feed.clear_folder_relationship(name);
                    }
                }
                None => {
                    account.remove_feed_from_root(feed_id);
                }
            }
            let referenced = account.is_referenced(feed_id);
            if !referenced {
                account.remove_feed(feed_id);
            }
            referenced
        };

        if !still_referenced {
            self.forget_feed(feed_id, Some(&external_id)).await;
        }
        self.persist().await;
        Ok(())
    }

    async fn forget_removed_feeds(&self) {
        let known: HashSet<String> = self.account.read().await.feed_ids().into_iter().collect();
        let removed: Vec<String> = self
            .metadata
            .lock()
            .await
            .synced_feed_ids
            .iter()
            .filter(|id| !known.contains(*id))
            .cloned()
            .collect();
        for feed_id in removed {
            self.forget_feed(&feed_id, Some(&feed_id)).await;
        }
    }

    async fn forget_feed(&self, feed_id: &str, external_id: Option<&str>) {
        let dropped = self.articles.write().await.remove_feed_articles(feed_id);
        self.metadata.lock().await.synced_feed_ids.remove(feed_id);
        debug!(feed = %feed_id, dropped, "forgot feed articles");

        if let (Some(zone), Some(external_id)) = (&self.zone, external_id) {
            if let Err(e) = zone.delete_articles(external_id).await {
                warn!(error = %e, feed = %feed_id, "failed to delete mirrored articles");
                self.notify(SyncEvent::MirrorFailed(e.to_string())).await;
            }
        }
    }

    async fn missing_story_hashes(&self, unread: &[StoryHash], starred: &[StoryHash]) -> Vec<StoryHash> {
        let store = self.articles.read().await;
        let mut seen = HashSet::new();
        unread
            .iter()
            .chain(starred)
            .filter(|h| !store.contains(&h.hash) && seen.insert(h.hash.clone()))
            .cloned()
            .collect()
    }

    async fn mirror_new_articles(&self, created: &[String]) {
        let Some(zone) = &self.zone else {
            return;
        };
        if created.is_empty() {
            return;
        }
        let articles = self.articles.read().await.cloned(created);
        let feeds = self.account.read().await.feed_directory();
        if let Err(e) = zone.save_new_articles(&articles, &feeds).await {
            warn!(error = %e, "failed to mirror new articles");
            self.notify(SyncEvent::MirrorFailed(e.to_string())).await;
        }
    }

    async fn mirror_status_changes(&self, article_ids: &[String]) {
        if self.zone.is_none() || article_ids.is_empty() {
            return;
        }
        let updated = self.articles.read().await.cloned(article_ids);
        self.mirror_updates(updated).await;
    }

    async fn mirror_updates(&self, updated: Vec<Article>) {
        let Some(zone) = &self.zone else {
            return;
        };
        let updates: Vec<ArticleStatusUpdate> = updated
            .into_iter()
            .map(ArticleStatusUpdate::for_status_change)
            .collect();
        let feeds = self.account.read().await.feed_directory();
        if let Err(e) = zone.modify_articles(&updates, &feeds).await {
            warn!(error = %e, "failed to mirror status changes");
            self.notify(SyncEvent::MirrorFailed(e.to_string())).await;
        }
    }

    async fn persist(&self) {
        let Some(data) = &self.data else {
            return;
        };
        data.persist_account(&*self.account.read().await).await;
        data.persist_articles(&*self.articles.read().await).await;
        data.persist_metadata(&*self.metadata.lock().await).await;
    }

    async fn notify(&self, event: SyncEvent) {
        if let Some(events) = &self.events {
            if events.send(event).await.is_err() {
                warn!("event receiver dropped");
            }
        }
    }
}

pub struct RefresherHandle {
    cancel_tx: broadcast::Sender<()>,
    join: JoinHandle<()>,
}

impl RefresherHandle {
    pub async fn stop(self) -> Result<(), SyncError> {
        let _ = self.cancel_tx.send(());
        self.join.await.map_err(SyncError::from)
    }
}

/// Runs a refresh cycle every `interval` until stopped. The first cycle
/// starts immediately.
pub fn spawn_refresher(engine: Arc<SyncEngine>, interval: Duration) -> RefresherHandle {
    let (cancel_tx, mut cancel_rx) = broadcast::channel(1);
    let join = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel_rx.recv() => {
                    info!("refresher shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    match engine.refresh_all().await {
                        Ok(summary) => engine.notify(SyncEvent::RefreshFinished(summary)).await,
                        Err(err) => {
                            warn!(error = %err, "refresh failed");
                            engine.notify(SyncEvent::RefreshFailed(err.to_string())).await;
                        }
                    }
                }
            }
        }
    });

    RefresherHandle { cancel_tx, join }
}
