//! NewsBlur-style aggregator client over `reqwest`.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{header, Client, ClientBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::config::ServiceConfig;
use crate::error::SyncError;
use crate::remote::{
    FolderEdge, RemoteFeed, RemoteStory, StatusAction, StoryHash, StoryService, TaxonomyService,
    TaxonomySnapshot,
};

/// Separator the service uses when flattening nested folder names.
const NESTED_FOLDER_SEPARATOR: &str = " - ";

#[derive(Debug, Clone)]
pub struct NewsBlurClient {
    client: Client,
    base_url: Url,
}

#[derive(Debug, Deserialize)]
struct FeedsResponse {
    #[serde(default)]
    feeds: HashMap<String, FeedPayload>,
    #[serde(default)]
    folders: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct FeedPayload {
    id: Value,
    #[serde(default)]
    feed_title: String,
    #[serde(default)]
    feed_address: String,
    feed_link: Option<String>,
    favicon_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StoriesResponse {
    #[serde(default)]
    stories: Vec<StoryPayload>,
}

#[derive(Debug, Deserialize)]
struct StoryPayload {
    story_hash: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    story_feed_id: Value,
    story_title: Option<String>,
    story_permalink: Option<String>,
    story_content: Option<String>,
    #[serde(default)]
    image_urls: Vec<String>,
    story_authors: Option<String>,
    #[serde(default)]
    story_timestamp: Value,
    #[serde(default)]
    story_tags: Vec<String>,
    #[serde(default)]
    read_status: i64,
    #[serde(default)]
    starred: bool,
}

#[derive(Debug, Deserialize)]
struct UnreadHashesResponse {
    #[serde(default)]
    unread_feed_story_hashes: HashMap<String, Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct StarredHashesResponse {
    #[serde(default)]
    starred_story_hashes: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct AddFeedResponse {
    feed: Option<FeedPayload>,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    authenticated: bool,
}

impl NewsBlurClient {
    pub fn new(client: Client, base_url: &str) -> Result<Self, SyncError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| SyncError::InvalidParameter(format!("invalid base url {base_url}: {e}")))?;
        Ok(Self { client, base_url })
    }

    pub fn from_config(config: &ServiceConfig) -> Result<Self, SyncError> {
        let client = ClientBuilder::new()
            .cookie_store(true)
            .timeout(config.request_timeout())
            .user_agent(concat!("feedsync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Self::new(client, &config.base_url)
    }

    fn endpoint(&self, path: &str) -> Result<Url, SyncError> {
        self.base_url
            .join(path)
            .map_err(|e| SyncError::InvalidParameter(format!("invalid endpoint {path}: {e}")))
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<(), SyncError> {
        let response = self
            .client
            .post(self.endpoint("/api/login")?)
            .form(&[("username", username), ("password", password)])
            .send()
            .await?;
        let body: LoginResponse = check_status(response)?.json().await?;
        if body.authenticated {
            Ok(())
        } else {
            Err(SyncError::InvalidParameter("credentials were rejected".into()))
        }
    }

    async fn post_hashes(&self, path: &str, hashes: &[String]) -> Result<(), SyncError> {
        let form: Vec<(&str, &str)> = hashes.iter().map(|h| ("story_hash", h.as_str())).collect();
        let response = self.client.post(self.endpoint(path)?).form(&form).send().await?;
        check_status(response)?;
        Ok(())
    }
}

fn check_status(response: Response) -> Result<Response, SyncError> {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        warn!(url = %response.url(), "service is rate limiting");
        return Err(SyncError::RateLimited);
    }
    if !status.is_success() {
        return Err(SyncError::RemoteUnavailable(format!(
            "{} returned {}",
            response.url().path(),
            status
        )));
    }
    Ok(response)
}

fn value_to_id(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

fn value_to_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let secs = match value {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => s.parse().ok()?,
        _ => return None,
    };
    Utc.timestamp_opt(secs, 0).single()
}

/// Walks the nested folder listing. Bare ids sit at the root; objects map a
/// folder name to its own nested listing.
fn flatten_folders(
    items: &[Value],
    prefix: Option<&str>,
    names: &mut Vec<String>,
    membership: &mut BTreeMap<String, Vec<FolderEdge>>,
) {
    for item in items {
        match item {
            Value::Object(map) => {
                for (name, children) in map {
                    let full_name = match prefix {
                        Some(parent) => format!("{parent}{NESTED_FOLDER_SEPARATOR}{name}"),
                        None => name.clone(),
                    };
                    if !names.contains(&full_name) {
                        names.push(full_name.clone());
                    }
                    if let Value::Array(children) = children {
                        flatten_folders(children, Some(&full_name), names, membership);
                    }
                }
            }
            other => {
                let Some(feed_id) = value_to_id(other) else {
                    continue;
                };
                let edge = match prefix {
                    Some(folder) => FolderEdge::new(folder),
                    None => FolderEdge::root(),
                };
                membership.entry(feed_id).or_default().push(edge);
            }
        }
    }
}

fn to_snapshot(body: FeedsResponse) -> TaxonomySnapshot {
    let mut folders = Vec::new();
    let mut membership = BTreeMap::new();
    flatten_folders(&body.folders, None, &mut folders, &mut membership);

    let mut feeds: Vec<RemoteFeed> = body
        .feeds
        .into_values()
        .filter_map(|payload| {
            let feed_id = value_to_id(&payload.id)?;
            let folder_edges = membership.remove(&feed_id).unwrap_or_default();
            Some(RemoteFeed {
                name: payload.feed_title,
                url: payload.feed_address,
                home_page_url: payload.feed_link,
                favicon_url: payload.favicon_url,
                folder_edges,
                feed_id,
            })
        })
        .collect();
    feeds.sort_by(|a, b| a.feed_id.cmp(&b.feed_id));

    TaxonomySnapshot { folders, feeds }
}

fn to_remote_feed(payload: FeedPayload) -> Option<RemoteFeed> {
    Some(RemoteFeed {
        feed_id: value_to_id(&payload.id)?,
        name: payload.feed_title,
        url: payload.feed_address,
        home_page_url: payload.feed_link,
        favicon_url: payload.favicon_url,
        folder_edges: Vec::new(),
    })
}

fn to_remote_story(payload: StoryPayload) -> RemoteStory {
    let feed_id = value_to_id(&payload.story_feed_id)
        .or_else(|| payload.story_hash.split(':').next().map(str::to_owned))
        .unwrap_or_default();
    RemoteStory {
        story_id: payload.id.unwrap_or_else(|| payload.story_hash.clone()),
        feed_id,
        title: payload.story_title,
        url: payload.story_permalink,
        content_html: payload.story_content,
        image_url: payload.image_urls.into_iter().next(),
        author_name: payload.story_authors,
        date_published: value_to_timestamp(&payload.story_timestamp),
        tags: payload.story_tags,
        read: payload.read_status == 1,
        starred: payload.starred,
        story_hash: payload.story_hash,
    }
}

/// `["hash", timestamp]` pairs, or bare hashes.
fn to_story_hash(value: &Value) -> Option<StoryHash> {
    match value {
        Value::String(hash) => Some(StoryHash::new(hash.clone())),
        Value::Array(pair) => {
            let hash = pair.first()?.as_str()?.to_owned();
            let timestamp = pair.get(1).and_then(value_to_timestamp);
            Some(StoryHash { hash, timestamp })
        }
        _ => None,
    }
}

#[async_trait]
impl TaxonomyService for NewsBlurClient {
    async fn fetch_taxonomy(&self) -> Result<TaxonomySnapshot, SyncError> {
        let response = self
            .client
            .get(self.endpoint("/reader/feeds")?)
            .query(&[("flat", "false"), ("update_counts", "false")])
            .send()
            .await?;
        let body: FeedsResponse = check_status(response)?.json().await?;
        let snapshot = to_snapshot(body);
        debug!(folders = snapshot.folders.len(), feeds = snapshot.feeds.len(), "fetched taxonomy");
        Ok(snapshot)
    }

    async fn subscribe(&self, url: &str, folder: Option<&str>) -> Result<RemoteFeed, SyncError> {
        let mut form = vec![("url", url)];
        if let Some(folder) = folder {
            form.push(("folder", folder));
        }
        let response = self
            .client
            .post(self.endpoint("/reader/add_url")?)
            .form(&form)
            .send()
            .await?;
        let body: AddFeedResponse = check_status(response)?.json().await?;
        let mut feed = body
            .feed
            .and_then(to_remote_feed)
            .ok_or_else(|| SyncError::InvalidParameter(format!("no feed found at {url}")))?;
        feed.folder_edges = folder.map(|name| vec![FolderEdge::new(name)]).unwrap_or_default();
        Ok(feed)
    }

    async fn unsubscribe(&self, feed_id: &str, folder: Option<&str>) -> Result<(), SyncError> {
        let mut form = vec![("feed_id", feed_id)];
        if let Some(folder) = folder {
            form.push(("in_folder", folder));
        }
        let response = self
            .client
            .post(self.endpoint("/reader/delete_feed")?)
            .form(&form)
            .send()
            .await?;
        check_status(response)?;
        Ok(())
    }
}

#[async_trait]
impl StoryService for NewsBlurClient {
    async fn fetch_stories_by_page(
        &self,
        feed_id: &str,
        page: u32,
    ) -> Result<Vec<RemoteStory>, SyncError> {
        let response = self
            .client
            .get(self.endpoint(&format!("/reader/feed/{feed_id}"))?)
            .query(&[("page", page.to_string())])
            .send()
            .await?;
        let body: StoriesResponse = check_status(response)?.json().await?;
        Ok(body.stories.into_iter().map(to_remote_story).collect())
    }

    async fn fetch_stories_by_hash(
        &self,
        hashes: &[StoryHash],
    ) -> Result<(Vec<RemoteStory>, DateTime<Utc>), SyncError> {
        let query: Vec<(&str, &str)> = hashes.iter().map(|h| ("h", h.hash.as_str())).collect();
        let response = self
            .client
            .get(self.endpoint("/reader/river_stories")?)
            .query(&query)
            .send()
            .await?;
        let response = check_status(response)?;
        let server_date = response
            .headers()
            .get(header::DATE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| DateTime::parse_from_rfc2822(value).ok())
            .map(|date| date.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        let body: StoriesResponse = response.json().await?;
        Ok((body.stories.into_iter().map(to_remote_story).collect(), server_date))
    }

    async fn fetch_unread_story_hashes(&self) -> Result<Vec<StoryHash>, SyncError> {
        let response = self
            .client
            .get(self.endpoint("/reader/unread_story_hashes")?)
            .query(&[("include_timestamps", "true")])
            .send()
            .await?;
        let body: UnreadHashesResponse = check_status(response)?.json().await?;
        Ok(body
            .unread_feed_story_hashes
            .values()
            .flatten()
            .filter_map(to_story_hash)
            .collect())
    }

    async fn fetch_starred_story_hashes(&self) -> Result<Vec<StoryHash>, SyncError> {
        let response = self
            .client
            .get(self.endpoint("/reader/starred_story_hashes")?)
            .query(&[("include_timestamps", "true")])
            .send()
            .await?;
        let body: StarredHashesResponse = check_status(response)?.json().await?;
        Ok(body
            .starred_story_hashes
            .iter()
            .filter_map(to_story_hash)
            .collect())
    }

    async fn push_status(&self, action: StatusAction, hashes: &[String]) -> Result<(), SyncError> {
        let path = match action {
            StatusAction::MarkRead => "/reader/mark_story_hashes_as_read",
            StatusAction::MarkUnread => "/reader/mark_story_hash_as_unread",
            StatusAction::Star => "/reader/mark_story_hash_as_starred",
            StatusAction::Unstar => "/reader/mark_story_hash_as_unstarred",
        };
        self.post_hashes(path, hashes).await
    }
}
