use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Name the remote service uses for the account-level group.
pub const ROOT_FOLDER_NAME: &str = " ";

/// Any blank name designates the account root, never a real folder.
pub fn is_root_folder(name: &str) -> bool {
    name.trim().is_empty()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Feed {
    pub feed_id: String,
    pub name: String,
    #[serde(default)]
    pub edited_name: Option<String>,
    pub url: String,
    #[serde(default)]
    pub home_page_url: Option<String>,
    #[serde(default)]
    pub favicon_url: Option<String>,
    #[serde(default)]
    pub external_id: Option<String>,
    /// folder name -> opaque remote handle for that membership
    #[serde(default)]
    pub folder_relationship: BTreeMap<String, String>,
}

impl Feed {
    pub fn new(feed_id: impl Into<String>, name: impl Into<String>, url: impl Into<String>) -> Self {
        let feed_id = feed_id.into();
        Self {
            external_id: Some(feed_id.clone()),
            feed_id,
            name: name.into(),
            edited_name: None,
            url: url.into(),
            home_page_url: None,
            favicon_url: None,
            folder_relationship: BTreeMap::new(),
        }
    }

    pub fn name_for_display(&self) -> &str {
        self.edited_name.as_deref().unwrap_or(&self.name)
    }

    pub fn save_folder_relationship(&mut self, folder_name: &str, remote_id: &str) -> bool {
        let previous = self
            .folder_relationship
            .insert(folder_name.to_owned(), remote_id.to_owned());
        previous.as_deref() != Some(remote_id)
    }

    pub fn clear_folder_relationship(&mut self, folder_name: &str) -> bool {
        self.folder_relationship.remove(folder_name).is_some()
    }

    pub fn feed_ref(&self) -> FeedRef {
        FeedRef {
            external_id: self.external_id.clone(),
            url: self.url.clone(),
        }
    }
}

/// What the record store needs to know about an article's feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedRef {
    pub external_id: Option<String>,
    pub url: String,
}

/// feed id -> [`FeedRef`], a detached copy of the account's feeds.
pub type FeedDirectory = HashMap<String, FeedRef>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Folder {
    pub name: String,
    #[serde(default)]
    pub feed_ids: BTreeSet<String>,
}

impl Folder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            feed_ids: BTreeSet::new(),
        }
    }

    pub fn contains(&self, feed_id: &str) -> bool {
        self.feed_ids.contains(feed_id)
    }
}

/// The taxonomy of one account: a feed registry, the feeds shown at the
/// account root and the folders with their top-level feeds.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    pub account_id: String,
    #[serde(default)]
    feeds: BTreeMap<String, Feed>,
    #[serde(default)]
    top_level: BTreeSet<String>,
    #[serde(default)]
    folders: BTreeMap<String, Folder>,
}

impl Account {
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            ..Default::default()
        }
    }

    pub fn existing_feed(&self, feed_id: &str) -> Option<&Feed> {
        self.feeds.get(feed_id)
    }

    pub fn existing_feed_mut(&mut self, feed_id: &str) -> Option<&mut Feed> {
        self.feeds.get_mut(feed_id)
    }

    pub fn feeds(&self) -> impl Iterator<Item = &Feed> {
        self.feeds.values()
    }

    pub fn feed_ids(&self) -> Vec<String> {
        self.feeds.keys().cloned().collect()
    }

    pub fn top_level_feed_ids(&self) -> Vec<String> {
        self.top_level.iter().cloned().collect()
    }

    pub fn is_top_level(&self, feed_id: &str) -> bool {
        self.top_level.contains(feed_id)
    }

    pub fn folder(&self, name: &str) -> Option<&Folder> {
        self.folders.get(name)
    }

    pub fn folders(&self) -> impl Iterator<Item = &Folder> {
        self.folders.values()
    }

    pub fn folder_names(&self) -> Vec<String> {
        self.folders.keys().cloned().collect()
    }

    /// Returns true if the folder had to be created.
    pub fn ensure_folder(&mut self, name: &str) -> bool {
        if is_root_folder(name) || self.folders.contains_key(name) {
            return false;
        }
        self.folders.insert(name.to_owned(), Folder::new(name));
        true
    }

    pub fn remove_folder(&mut self, name: &str) -> Option<Folder> {
        self.folders.remove(name)
    }

    pub fn add_feed_to_root(&mut self, feed_id: &str) -> bool {
        self.feeds.contains_key(feed_id) && self.top_level.insert(feed_id.to_owned())
    }

    pub fn remove_feed_from_root(&mut self, feed_id: &str) -> bool {
        self.top_level.remove(feed_id)
    }

    pub fn add_feed_to_folder(&mut self, folder_name: &str, feed_id: &str) -> bool {
        if !self.feeds.contains_key(feed_id) {
            return false;
        }
        match self.folders.get_mut(folder_name) {
            Some(folder) => folder.feed_ids.insert(feed_id.to_owned()),
            None => false,
        }
    }

    pub fn remove_feed_from_folder(&mut self, folder_name: &str, feed_id: &str) -> bool {
        self.folders
            .get_mut(folder_name)
            .map(|folder| folder.feed_ids.remove(feed_id))
            .unwrap_or(false)
    }

    /// Adds a batch of feeds to the registry and the account root at once.
    pub fn create_feeds(&mut self, feeds: Vec<Feed>) -> usize {
        let mut created = 0;
        for feed in feeds {
            let feed_id = feed.feed_id.clone();
            if self.feeds.insert(feed_id.clone(), feed).is_none() {
                created += 1;
            }
            self.top_level.insert(feed_id);
        }
        created
    }

    /// Removes the feed from every folder, the root and the registry.
    pub fn remove_feed(&mut self, feed_id: &str) -> Option<Feed> {
        self.top_level.remove(feed_id);
        for folder in self.folders.values_mut() {
            folder.feed_ids.remove(feed_id);
        }
        self.feeds.remove(feed_id)
    }

    pub fn is_referenced(&self, feed_id: &str) -> bool {
        self.top_level.contains(feed_id) || self.folders.values().any(|f| f.contains(feed_id))
    }

    /// Drops registry entries no container references any more.
    pub fn prune_orphaned_feeds(&mut self) -> Vec<Feed> {
        let orphaned: Vec<String> = self
            .feeds
            .keys()
            .filter(|id| !self.is_referenced(id))
            .cloned()
            .collect();
        orphaned
            .iter()
            .filter_map(|id| self.feeds.remove(id))
            .collect()
    }

    pub fn feed_directory(&self) -> FeedDirectory {
        self.feeds
            .iter()
            .map(|(id, feed)| (id.clone(), feed.feed_ref()))
            .collect()
    }
}

pub type SharedAccount = Arc<RwLock<Account>>;

pub fn shared_account(initial: Account) -> SharedAccount {
    Arc::new(RwLock::new(initial))
}
