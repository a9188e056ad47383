use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::remote::RemoteStory;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Read,
    Starred,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArticleStatus {
    pub read: bool,
    pub starred: bool,
}

impl ArticleStatus {
    pub fn get(&self, kind: StatusKind) -> bool {
        match kind {
            StatusKind::Read => self.read,
            StatusKind::Starred => self.starred,
        }
    }

    pub fn set(&mut self, kind: StatusKind, flag: bool) -> bool {
        let slot = match kind {
            StatusKind::Read => &mut self.read,
            StatusKind::Starred => &mut self.starred,
        };
        let changed = *slot != flag;
        *slot = flag;
        changed
    }

    /// Fully read, unstarred articles are not worth mirroring.
    pub fn is_worth_mirroring(&self) -> bool {
        !self.read || self.starred
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Author {
    pub name: Option<String>,
    pub url: Option<String>,
    pub avatar_url: Option<String>,
    pub email_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Article {
    pub article_id: String,
    pub feed_id: String,
    pub unique_id: String,
    pub title: Option<String>,
    pub content_html: Option<String>,
    pub content_text: Option<String>,
    pub url: Option<String>,
    pub external_url: Option<String>,
    pub summary: Option<String>,
    pub image_url: Option<String>,
    pub date_published: Option<DateTime<Utc>>,
    pub date_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub authors: Vec<Author>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub status: ArticleStatus,
}

impl Article {
    pub fn from_story(story: &RemoteStory) -> Self {
        let authors = story
            .author_name
            .as_ref()
            .filter(|name| !name.trim().is_empty())
            .map(|name| {
                vec![Author {
                    name: Some(name.clone()),
                    ..Default::default()
                }]
            })
            .unwrap_or_default();

        Self {
            article_id: story.story_hash.clone(),
            feed_id: story.feed_id.clone(),
            unique_id: story.story_id.clone(),
            title: story.title.clone(),
            content_html: story.content_html.clone(),
            content_text: None,
            url: story.url.clone(),
            external_url: None,
            summary: None,
            image_url: story.image_url.clone(),
            date_published: story.date_published,
            date_modified: None,
            authors,
            tags: story.tags.clone(),
            status: ArticleStatus {
                read: story.read,
                starred: story.starred,
            },
        }
    }
}

/// Outcome of applying one batch of stories.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedStories {
    pub created: Vec<String>,
    pub updated: usize,
}

/// Local articles keyed by article id.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ArticleStore {
    articles: BTreeMap<String, Article>,
}

impl ArticleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.articles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.articles.is_empty()
    }

    pub fn get(&self, article_id: &str) -> Option<&Article> {
        self.articles.get(article_id)
    }

    pub fn contains(&self, article_id: &str) -> bool {
        self.articles.contains_key(article_id)
    }

    /// Upserts stories. Content is refreshed, the local status of an
    /// existing article is kept.
    pub fn apply_stories(&mut self, stories: &[RemoteStory]) -> AppliedStories {
        let mut applied = AppliedStories::default();
        for story in stories {
            let incoming = Article::from_story(story);
            match self.articles.get_mut(&incoming.article_id) {
                Some(existing) => {
                    let status = existing.status;
                    *existing = Article { status, ..incoming };
                    applied.updated += 1;
                }
                None => {
                    applied.created.push(incoming.article_id.clone());
                    self.articles.insert(incoming.article_id.clone(), incoming);
                }
            }
        }
        applied
    }

    pub fn article_ids_with(&self, kind: StatusKind, flag: bool) -> HashSet<String> {
        self.articles
            .values()
            .filter(|article| article.status.get(kind) == flag)
            .map(|article| article.article_id.clone())
            .collect()
    }

    pub fn unread_article_ids(&self) -> HashSet<String> {
        self.article_ids_with(StatusKind::Read, false)
    }

    pub fn starred_article_ids(&self) -> HashSet<String> {
        self.article_ids_with(StatusKind::Starred, true)
    }

    /// Sets a status flag, returning the ids whose value actually changed.
    pub fn mark<'a, I>(&mut self, article_ids: I, kind: StatusKind, flag: bool) -> Vec<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        article_ids
            .into_iter()
            .filter_map(|id| {
                let article = self.articles.get_mut(id)?;
                article.status.set(kind, flag).then(|| id.clone())
            })
            .collect()
    }

    pub fn articles_for_feed(&self, feed_id: &str) -> Vec<&Article> {
        self.articles
            .values()
            .filter(|article| article.feed_id == feed_id)
            .collect()
    }

    pub fn cloned(&self, article_ids: &[String]) -> Vec<Article> {
        article_ids
            .iter()
            .filter_map(|id| self.articles.get(id).cloned())
            .collect()
    }

    pub fn remove_feed_articles(&mut self, feed_id: &str) -> usize {
        let before = self.articles.len();
        self.articles.retain(|_, article| article.feed_id != feed_id);
        before - self.articles.len()
    }
}

pub type SharedArticles = Arc<RwLock<ArticleStore>>;

pub fn shared_articles(initial: ArticleStore) -> SharedArticles {
    Arc::new(RwLock::new(initial))
}
