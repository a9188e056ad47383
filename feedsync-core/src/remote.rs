//! Contracts of the remote aggregator, as seen by the sync engine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::article::StatusKind;
use crate::error::SyncError;
use crate::feed::{is_root_folder, ROOT_FOLDER_NAME};

/// Membership of a feed in one remote folder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct FolderEdge {
    pub folder_name: String,
    pub remote_id: String,
}

impl FolderEdge {
    pub fn new(folder_name: impl Into<String>) -> Self {
        let folder_name = folder_name.into();
        Self {
            remote_id: folder_name.clone(),
            folder_name,
        }
    }

    pub fn root() -> Self {
        Self::new(ROOT_FOLDER_NAME)
    }

    pub fn is_root(&self) -> bool {
        is_root_folder(&self.folder_name)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteFeed {
    pub feed_id: String,
    pub name: String,
    pub url: String,
    pub home_page_url: Option<String>,
    pub favicon_url: Option<String>,
    #[serde(default)]
    pub folder_edges: Vec<FolderEdge>,
}

impl RemoteFeed {
    /// A feed listed in no folder lives at the account root.
    pub fn effective_edges(&self) -> Vec<FolderEdge> {
        if self.folder_edges.is_empty() {
            vec![FolderEdge::root()]
        } else {
            self.folder_edges.clone()
        }
    }
}

/// One consistent listing of the remote folders and feeds.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaxonomySnapshot {
    pub folders: Vec<String>,
    pub feeds: Vec<RemoteFeed>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RemoteStory {
    pub story_hash: String,
    pub story_id: String,
    pub feed_id: String,
    pub title: Option<String>,
    pub url: Option<String>,
    pub content_html: Option<String>,
    pub image_url: Option<String>,
    pub author_name: Option<String>,
    pub date_published: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub starred: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct StoryHash {
    pub hash: String,
    pub timestamp: Option<DateTime<Utc>>,
}

impl StoryHash {
    pub fn new(hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            timestamp: None,
        }
    }
}

/// Direction of a status push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusAction {
    MarkRead,
    MarkUnread,
    Star,
    Unstar,
}

impl StatusAction {
    pub fn new(kind: StatusKind, flag: bool) -> Self {
        match (kind, flag) {
            (StatusKind::Read, true) => StatusAction::MarkRead,
            (StatusKind::Read, false) => StatusAction::MarkUnread,
            (StatusKind::Starred, true) => StatusAction::Star,
            (StatusKind::Starred, false) => StatusAction::Unstar,
        }
    }

    pub fn kind(&self) -> StatusKind {
        match self {
            StatusAction::MarkRead | StatusAction::MarkUnread => StatusKind::Read,
            StatusAction::Star | StatusAction::Unstar => StatusKind::Starred,
        }
    }
}

#[async_trait]
pub trait TaxonomyService: Send + Sync {
    async fn fetch_taxonomy(&self) -> Result<TaxonomySnapshot, SyncError>;

    async fn subscribe(&self, url: &str, folder: Option<&str>) -> Result<RemoteFeed, SyncError>;

    async fn unsubscribe(&self, feed_id: &str, folder: Option<&str>) -> Result<(), SyncError>;
}

#[async_trait]
pub trait StoryService: Send + Sync {
    async fn fetch_stories_by_page(
        &self,
        feed_id: &str,
        page: u32,
    ) -> Result<Vec<RemoteStory>, SyncError>;

    /// Resolves at most the per-call hash limit; returns the server time.
    async fn fetch_stories_by_hash(
        &self,
        hashes: &[StoryHash],
    ) -> Result<(Vec<RemoteStory>, DateTime<Utc>), SyncError>;

    async fn fetch_unread_story_hashes(&self) -> Result<Vec<StoryHash>, SyncError>;

    async fn fetch_starred_story_hashes(&self) -> Result<Vec<StoryHash>, SyncError>;

    async fn push_status(&self, action: StatusAction, hashes: &[String]) -> Result<(), SyncError>;
}
