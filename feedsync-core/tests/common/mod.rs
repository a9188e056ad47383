#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use feedsync_core::record::Record;
use feedsync_core::remote::{
    FolderEdge, RemoteFeed, RemoteStory, StatusAction, StoryHash, StoryService, TaxonomyService,
    TaxonomySnapshot,
};
use feedsync_core::zone::{ObjectStore, ZoneError, ZoneId};
use feedsync_core::SyncError;

pub fn server_time(offset_secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 10, 21, 8, 0, 0).unwrap() + Duration::seconds(offset_secs)
}

pub fn remote_feed(id: &str, folders: &[&str]) -> RemoteFeed {
    RemoteFeed {
        feed_id: id.into(),
        name: format!("Feed {id}"),
        url: format!("http://example.com/{id}.xml"),
        home_page_url: Some(format!("http://example.com/{id}")),
        favicon_url: None,
        folder_edges: folders.iter().map(|name| FolderEdge::new(*name)).collect(),
    }
}

pub fn story(feed_id: &str, hash: &str, published: Option<DateTime<Utc>>) -> RemoteStory {
    RemoteStory {
        story_hash: hash.into(),
        story_id: format!("guid-{hash}"),
        feed_id: feed_id.into(),
        title: Some(format!("Story {hash}")),
        url: Some(format!("http://example.com/{hash}")),
        content_html: Some(format!("<p>Body of {hash}</p>")),
        date_published: published,
        ..Default::default()
    }
}

#[derive(Default)]
pub struct FakeTaxonomy {
    pub snapshot: Mutex<TaxonomySnapshot>,
    pub unsubscribed: Mutex<Vec<(String, Option<String>)>>,
}

impl FakeTaxonomy {
    pub fn new(snapshot: TaxonomySnapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
            ..Default::default()
        }
    }
}

#[async_trait]
impl TaxonomyService for FakeTaxonomy {
    async fn fetch_taxonomy(&self) -> Result<TaxonomySnapshot, SyncError> {
        Ok(self.snapshot.lock().unwrap().clone())
    }

    async fn subscribe(&self, url: &str, folder: Option<&str>) -> Result<RemoteFeed, SyncError> {
        let id = url.rsplit('/').next().unwrap_or(url).trim_end_matches(".xml").to_string();
        let mut feed = remote_feed(&id, &[]);
        if let Some(folder) = folder {
            feed.folder_edges = vec![FolderEdge::new(folder)];
        }
        self.snapshot.lock().unwrap().feeds.push(feed.clone());
        Ok(feed)
    }

    async fn unsubscribe(&self, feed_id: &str, folder: Option<&str>) -> Result<(), SyncError> {
        self.unsubscribed
            .lock()
            .unwrap()
            .push((feed_id.to_string(), folder.map(str::to_string)));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeStories {
    /// feed id -> pages, page 1 first
    pub pages: Mutex<HashMap<String, Vec<Vec<RemoteStory>>>>,
    pub by_hash: Mutex<HashMap<String, RemoteStory>>,
    pub unread: Mutex<Vec<StoryHash>>,
    pub starred: Mutex<Vec<StoryHash>>,
    pub page_calls: Mutex<Vec<(String, u32)>>,
    pub hash_calls: Mutex<Vec<usize>>,
    /// zero-based index of the hash call that fails
    pub failing_hash_call: Mutex<Option<usize>>,
    /// every hash call sleeps this long before answering
    pub hash_delay: Mutex<Option<StdDuration>>,
    pub push_calls: Mutex<Vec<(StatusAction, Vec<String>)>>,
    /// a push containing any of these ids fails
    pub failing_ids: Mutex<HashSet<String>>,
    pub rate_limited: Mutex<bool>,
}

impl FakeStories {
    pub fn with_pages(feed_id: &str, pages: Vec<Vec<RemoteStory>>) -> Self {
        let fake = Self::default();
        fake.pages.lock().unwrap().insert(feed_id.to_string(), pages);
        fake
    }

    pub fn add_hashed(&self, stories: Vec<RemoteStory>) {
        let mut by_hash = self.by_hash.lock().unwrap();
        for story in stories {
            by_hash.insert(story.story_hash.clone(), story);
        }
    }

    pub fn fail_ids(&self, ids: &[&str]) {
        let mut failing = self.failing_ids.lock().unwrap();
        failing.extend(ids.iter().map(|id| id.to_string()));
    }

    pub fn pushed_ids(&self) -> Vec<Vec<String>> {
        self.push_calls.lock().unwrap().iter().map(|(_, ids)| ids.clone()).collect()
    }
}

#[async_trait]
impl StoryService for FakeStories {
    async fn fetch_stories_by_page(
        &self,
        feed_id: &str,
        page: u32,
    ) -> Result<Vec<RemoteStory>, SyncError> {
        self.page_calls.lock().unwrap().push((feed_id.to_string(), page));
        let pages = self.pages.lock().unwrap();
        Ok(pages
            .get(feed_id)
            .and_then(|pages| pages.get(page as usize - 1))
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_stories_by_hash(
        &self,
        hashes: &[StoryHash],
    ) -> Result<(Vec<RemoteStory>, DateTime<Utc>), SyncError> {
        let call = {
            let mut calls = self.hash_calls.lock().unwrap();
            calls.push(hashes.len());
            calls.len() - 1
        };
        let delay = *self.hash_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if *self.failing_hash_call.lock().unwrap() == Some(call) {
            return Err(SyncError::RemoteUnavailable("hash fetch timed out".into()));
        }
        let by_hash = self.by_hash.lock().unwrap();
        let stories = hashes
            .iter()
            .filter_map(|h| by_hash.get(&h.hash).cloned())
            .collect();
        Ok((stories, server_time(call as i64)))
    }

    async fn fetch_unread_story_hashes(&self) -> Result<Vec<StoryHash>, SyncError> {
        Ok(self.unread.lock().unwrap().clone())
    }

    async fn fetch_starred_story_hashes(&self) -> Result<Vec<StoryHash>, SyncError> {
        Ok(self.starred.lock().unwrap().clone())
    }

    async fn push_status(&self, action: StatusAction, hashes: &[String]) -> Result<(), SyncError> {
        self.push_calls.lock().unwrap().push((action, hashes.to_vec()));
        if *self.rate_limited.lock().unwrap() {
            return Err(SyncError::RateLimited);
        }
        let failing = self.failing_ids.lock().unwrap();
        if hashes.iter().any(|h| failing.contains(h)) {
            return Err(SyncError::RemoteUnavailable("push failed".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    CreateZone,
    Modify { save: usize, delete: usize },
    SaveIfAbsent { save: usize },
    DeleteForFeed(String),
}

/// In-memory record store; failures are scripted per call.
#[derive(Default)]
pub struct FakeObjectStore {
    pub records: Mutex<HashMap<String, Record>>,
    pub calls: Mutex<Vec<StoreCall>>,
    /// errors returned by the next modify/save calls, in order
    pub scripted_errors: Mutex<Vec<ZoneError>>,
    /// batches above this size are rejected as too large
    pub max_batch: Mutex<Option<usize>>,
    pub zone_exists: Mutex<bool>,
}

impl FakeObjectStore {
    pub fn new() -> Self {
        let store = Self::default();
        *store.zone_exists.lock().unwrap() = true;
        store
    }

    pub fn script(&self, errors: Vec<ZoneError>) {
        *self.scripted_errors.lock().unwrap() = errors;
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, matcher: impl Fn(&StoreCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|call| matcher(call)).count()
    }

    fn next_error(&self, size: usize) -> Option<ZoneError> {
        let mut scripted = self.scripted_errors.lock().unwrap();
        if !scripted.is_empty() {
            return Some(scripted.remove(0));
        }
        if !*self.zone_exists.lock().unwrap() {
            return Some(ZoneError::ZoneNotFound);
        }
        match *self.max_batch.lock().unwrap() {
            Some(max) if size > max => Some(ZoneError::LimitExceeded),
            _ => None,
        }
    }
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn create_zone(&self, _zone: &ZoneId) -> Result<(), ZoneError> {
        self.calls.lock().unwrap().push(StoreCall::CreateZone);
        *self.zone_exists.lock().unwrap() = true;
        Ok(())
    }

    async fn modify(&self, _zone: &ZoneId, save: &[Record], delete: &[String]) -> Result<(), ZoneError> {
        self.calls.lock().unwrap().push(StoreCall::Modify {
            save: save.len(),
            delete: delete.len(),
        });
        if let Some(e) = self.next_error(save.len() + delete.len()) {
            return Err(e);
        }
        let mut records = self.records.lock().unwrap();
        for record in save {
            records.insert(record.record_name().to_string(), record.clone());
        }
        for name in delete {
            records.remove(name);
        }
        Ok(())
    }

    async fn save_if_absent(&self, _zone: &ZoneId, save: &[Record]) -> Result<(), ZoneError> {
        self.calls.lock().unwrap().push(StoreCall::SaveIfAbsent { save: save.len() });
        if let Some(e) = self.next_error(save.len()) {
            return Err(e);
        }
        let mut records = self.records.lock().unwrap();
        for record in save {
            records
                .entry(record.record_name().to_string())
                .or_insert_with(|| record.clone());
        }
        Ok(())
    }

    async fn delete_status_records_for_feed(
        &self,
        _zone: &ZoneId,
        feed_external_id: &str,
    ) -> Result<(), ZoneError> {
        self.calls
            .lock()
            .unwrap()
            .push(StoreCall::DeleteForFeed(feed_external_id.to_string()));
        if let Some(e) = self.next_error(0) {
            return Err(e);
        }
        let mut records = self.records.lock().unwrap();
        let doomed: Vec<String> = records
            .values()
            .filter_map(|record| match record {
                Record::ArticleStatus(status)
                    if status.feed_external_id.as_deref() == Some(feed_external_id) =>
                {
                    Some(status.record_name.clone())
                }
                _ => None,
            })
            .collect();
        for status_name in doomed {
            records.remove(&status_name);
            // the article record references its status record
            let article_name = format!("a|{}", status_name.trim_start_matches("s|"));
            records.remove(&article_name);
        }
        Ok(())
    }
}
