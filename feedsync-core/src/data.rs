use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;

use crate::article::ArticleStore;
use crate::error::SyncError;
use crate::feed::Account;
use crate::fetcher::SyncMetadata;

/// Reads JSON, falling back to the `.json.tmp` sibling when the main file
/// is corrupted, and to `T::default()` when neither parses.
pub(crate) async fn read_json_with_tmp_fallback<T: DeserializeOwned + Default>(path: &Path) -> T {
    match tokio::fs::read(path).await {
        Ok(bytes) => match serde_json::from_slice::<T>(&bytes) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, path = %path.display(), "failed to parse JSON, trying tmp fallback");
                let tmp = path.with_extension("json.tmp");
                match tokio::fs::read(&tmp).await {
                    Ok(tmp_bytes) => serde_json::from_slice::<T>(&tmp_bytes).unwrap_or_default(),
                    Err(_) => Default::default(),
                }
            }
        },
        Err(_) => Default::default(),
    }
}

/// Ecriture atomique: temp file then rename.
pub(crate) async fn write_json_atomically<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> Result<(), SyncError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Durable home of the account taxonomy, the local articles and the sync
/// metadata. The engine mutates in-memory copies and flushes them here.
#[derive(Debug, Clone)]
pub struct DataApi {
    account_path: PathBuf,
    articles_path: PathBuf,
    metadata_path: PathBuf,
    ledger_path: PathBuf,
}

/// Everything loaded from disk at startup.
#[derive(Debug, Clone, Default)]
pub struct LoadedState {
    pub account: Account,
    pub articles: ArticleStore,
    pub metadata: SyncMetadata,
}

impl DataApi {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            account_path: dir.join("account.json"),
            articles_path: dir.join("articles_store.json"),
            metadata_path: dir.join("sync_metadata.json"),
            ledger_path: dir.join("pending_statuses.json"),
        }
    }

    /// Initialise from a directory, creating it when missing.
    pub async fn load_from_dir(dir: impl AsRef<Path>) -> (Self, LoadedState) {
        let dir = dir.as_ref();
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            warn!(error = %e, "failed to create data dir");
        }
        let api = Self::new(dir);

        let account: Account = read_json_with_tmp_fallback(&api.account_path).await;
        let articles: ArticleStore = read_json_with_tmp_fallback(&api.articles_path).await;
        let metadata: SyncMetadata = read_json_with_tmp_fallback(&api.metadata_path).await;

        (
            api,
            LoadedState {
                account,
                articles,
                metadata,
            },
        )
    }

    pub fn ledger_path(&self) -> &Path {
        &self.ledger_path
    }

    pub async fn persist_account(&self, account: &Account) {
        if let Err(e) = write_json_atomically(&self.account_path, account).await {
            warn!(error = %e, path = %self.account_path.display(), "failed to persist account.json");
        }
    }

    pub async fn persist_articles(&self, articles: &ArticleStore) {
        if let Err(e) = write_json_atomically(&self.articles_path, articles).await {
            warn!(error = %e, path = %self.articles_path.display(), "failed to persist articles_store.json");
        }
    }

    pub async fn persist_metadata(&self, metadata: &SyncMetadata) {
        if let Err(e) = write_json_atomically(&self.metadata_path, metadata).await {
            warn!(error = %e, path = %self.metadata_path.display(), "failed to persist sync_metadata.json");
        }
    }
}
