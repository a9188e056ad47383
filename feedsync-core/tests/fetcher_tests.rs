mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{server_time, story, FakeStories};
use feedsync_core::remote::StoryHash;
use feedsync_core::{
    shared_articles, ArticleStore, RefreshProgress, SharedArticles, StatusKind, StoryFetcher,
    SyncError, SyncMetadata,
};

fn fetcher(service: Arc<FakeStories>, articles: SharedArticles, limit: usize) -> StoryFetcher {
    StoryFetcher::new(service, articles, RefreshProgress::default(), limit)
}

#[tokio::test]
async fn download_stops_at_the_first_empty_page() {
    let now = Utc::now();
    let recent = Some(now - Duration::days(1));
    let service = Arc::new(FakeStories::with_pages(
        "42",
        vec![
            vec![story("42", "h1", recent), story("42", "h2", recent)],
            vec![story("42", "h3", None)],
        ],
    ));
    let articles = shared_articles(ArticleStore::new());

    let summary = fetcher(service.clone(), articles.clone(), 100)
        .download_feed("42", now - Duration::days(90))
        .await
        .unwrap();

    let pages: Vec<u32> = service.page_calls.lock().unwrap().iter().map(|(_, p)| *p).collect();
    assert_eq!(pages, vec![1, 2, 3]);
    assert_eq!(summary.pages_or_chunks, 2);
    assert_eq!(summary.created.len(), 3);
    assert_eq!(articles.read().await.len(), 3);
}

#[tokio::test]
async fn download_stops_once_a_page_is_entirely_older_than_the_cutoff() {
    let now = Utc::now();
    let since = now - Duration::days(90);
    let fresh = Some(now - Duration::days(10));
    let stale = Some(now - Duration::days(120));
    let service = Arc::new(FakeStories::with_pages(
        "42",
        vec![
            vec![story("42", "h1", fresh), story("42", "h2", stale)],
            vec![story("42", "h3", stale), story("42", "h4", stale)],
            vec![story("42", "h5", fresh)],
        ],
    ));
    let articles = shared_articles(ArticleStore::new());

    fetcher(service.clone(), articles.clone(), 100)
        .download_feed("42", since)
        .await
        .unwrap();

    assert_eq!(service.page_calls.lock().unwrap().len(), 2);
    let store = articles.read().await;
    assert!(store.contains("h1"));
    assert!(!store.contains("h2"), "stories older than the cutoff are dropped");
    assert!(!store.contains("h5"), "paging stopped before page 3");
}

#[tokio::test]
async fn progress_returns_to_idle_after_a_download() {
    let service = Arc::new(FakeStories::with_pages(
        "42",
        vec![vec![story("42", "h1", None)]],
    ));
    let progress = RefreshProgress::default();
    let mut watcher = progress.subscribe();
    let fetcher = StoryFetcher::new(service, shared_articles(ArticleStore::new()), progress.clone(), 100);

    fetcher.download_feed("42", Utc::now()).await.unwrap();

    assert!(watcher.has_changed().unwrap());
    let snapshot = *watcher.borrow_and_update();
    assert!(snapshot.is_complete());
    assert_eq!(progress.snapshot().number_of_tasks, 0);
}

#[tokio::test]
async fn reapplied_stories_keep_their_local_status() {
    let service = Arc::new(FakeStories::with_pages(
        "42",
        vec![vec![story("42", "h1", None)]],
    ));
    let mut store = ArticleStore::new();
    store.apply_stories(&[story("42", "h1", None)]);
    store.mark(&["h1".to_string()], StatusKind::Read, true);
    let articles = shared_articles(store);

    let summary = fetcher(service, articles.clone(), 100)
        .download_feed("42", Utc::now())
        .await
        .unwrap();

    assert!(summary.created.is_empty());
    assert_eq!(summary.updated, 1);
    assert!(articles.read().await.get("h1").unwrap().status.read);
}

fn hashes(count: usize) -> Vec<StoryHash> {
    (0..count).map(|i| StoryHash::new(format!("h{i}"))).collect()
}

#[tokio::test]
async fn hashes_are_resolved_in_limited_chunks() {
    let service = Arc::new(FakeStories::default());
    service.add_hashed((0..250).map(|i| story("42", &format!("h{i}"), None)).collect());
    let articles = shared_articles(ArticleStore::new());
    let mut metadata = SyncMetadata::default();

    let summary = fetcher(service.clone(), articles.clone(), 100)
        .refresh_stories_by_hash(&hashes(250), &mut metadata)
        .await
        .unwrap();

    assert_eq!(*service.hash_calls.lock().unwrap(), vec![100, 100, 50]);
    assert_eq!(summary.created.len(), 250);
    assert_eq!(metadata.last_article_fetch_start, Some(server_time(2)));
    assert!(metadata.last_article_fetch_end.is_some());
}

#[tokio::test]
async fn watermark_stops_at_the_last_answered_chunk() {
    let service = Arc::new(FakeStories::default());
    service.add_hashed((0..250).map(|i| story("42", &format!("h{i}"), None)).collect());
    *service.failing_hash_call.lock().unwrap() = Some(1);
    let articles = shared_articles(ArticleStore::new());
    let mut metadata = SyncMetadata::default();

    let err = fetcher(service.clone(), articles.clone(), 100)
        .refresh_stories_by_hash(&hashes(250), &mut metadata)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::RemoteUnavailable(_)));
    assert_eq!(service.hash_calls.lock().unwrap().len(), 2);
    assert_eq!(articles.read().await.len(), 100);
    assert_eq!(metadata.last_article_fetch_start, Some(server_time(0)));
}

#[tokio::test]
async fn first_chunk_failure_leaves_the_watermark_alone() {
    let service = Arc::new(FakeStories::default());
    *service.failing_hash_call.lock().unwrap() = Some(0);
    let mut metadata = SyncMetadata::default();

    let result = fetcher(service, shared_articles(ArticleStore::new()), 100)
        .refresh_stories_by_hash(&hashes(3), &mut metadata)
        .await;

    assert!(result.is_err());
    assert_eq!(metadata, SyncMetadata::default());
}
