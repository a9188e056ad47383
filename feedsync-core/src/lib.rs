pub mod article;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod feed;
pub mod fetcher;
pub mod http;
pub mod ledger;
pub mod propagator;
pub mod reconcile;
pub mod record;
pub mod remote;
pub mod zone;

pub use article::{shared_articles, Article, ArticleStatus, ArticleStore, SharedArticles, StatusKind};
pub use config::SyncConfig;
pub use data::DataApi;
pub use engine::{spawn_refresher, RefreshSummary, RefresherHandle, SyncEngine, SyncEvent};
pub use error::SyncError;
pub use feed::{shared_account, Account, Feed, FeedDirectory, FeedRef, Folder, SharedAccount};
pub use fetcher::{RefreshProgress, StoryFetcher, SyncMetadata};
pub use http::NewsBlurClient;
pub use ledger::{PendingLedger, SyncStatus};
pub use propagator::{chunk_article_ids, StatusPropagator};
pub use reconcile::{reconcile, ReconcileReport};
pub use record::{Record, StoredText};
pub use remote::{
    FolderEdge, RemoteFeed, RemoteStory, StatusAction, StoryHash, StoryService, TaxonomyService,
    TaxonomySnapshot,
};
pub use zone::{ArticleStatusUpdate, ArticlesZone, ObjectStore, ZoneError, ZoneId, ZoneState};
