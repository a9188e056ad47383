use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::article::StatusKind;
use crate::data::{read_json_with_tmp_fallback, write_json_atomically};
use crate::error::SyncError;

/// A local status change the remote service has not acknowledged yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncStatus {
    pub article_id: String,
    pub key: StatusKind,
    pub flag: bool,
    /// Set while a push carrying this row is in flight.
    #[serde(default)]
    pub selected: bool,
}

impl SyncStatus {
    pub fn new(article_id: impl Into<String>, key: StatusKind, flag: bool) -> Self {
        Self {
            article_id: article_id.into(),
            key,
            flag,
            selected: false,
        }
    }
}

type LedgerKey = (StatusKind, String);

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerData {
    statuses: Vec<SyncStatus>,
}

/// Durable queue of pending status operations. Every operation takes the
/// lock once, so select-then-delete/reset never interleaves with a writer.
#[derive(Debug, Clone)]
pub struct PendingLedger {
    inner: Arc<Mutex<BTreeMap<LedgerKey, SyncStatus>>>,
    path: Option<PathBuf>,
}

impl PendingLedger {
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(Mutex::new(BTreeMap::new())),
            path: None,
        }
    }

    pub async fn load_from(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let data: LedgerData = read_json_with_tmp_fallback(&path).await;
        let rows = data
            .statuses
            .into_iter()
            .map(|status| ((status.key, status.article_id.clone()), status))
            .collect();
        Self {
            inner: Arc::new(Mutex::new(rows)),
            path: Some(path),
        }
    }

    /// Records local changes. A row already in flight is replaced by an
    /// unselected one, so its pending acknowledgement will not delete it.
    pub async fn insert_statuses(&self, statuses: Vec<SyncStatus>) -> Result<(), SyncError> {
        if statuses.is_empty() {
            return Ok(());
        }
        let mut rows = self.inner.lock().await;
        let mut next = rows.clone();
        for mut status in statuses {
            status.selected = false;
            next.insert((status.key, status.article_id.clone()), status);
        }
        self.commit(&mut rows, next).await
    }

    /// Marks every unselected row as in flight and returns them.
    pub async fn select_for_processing(&self) -> Result<Vec<SyncStatus>, SyncError> {
        let mut rows = self.inner.lock().await;
        let mut next = rows.clone();
        let mut selected = Vec::new();
        for status in next.values_mut().filter(|status| !status.selected) {
            status.selected = true;
            selected.push(status.clone());
        }
        if !selected.is_empty() {
            self.commit(&mut rows, next).await?;
        }
        Ok(selected)
    }

    /// Ids with any row of this kind, in flight or not.
    pub async fn select_pending_article_ids(&self, key: StatusKind) -> HashSet<String> {
        let rows = self.inner.lock().await;
        rows.keys()
            .filter(|(kind, _)| *kind == key)
            .map(|(_, id)| id.clone())
            .collect()
    }

    /// Acknowledged: drops the in-flight rows for these ids.
    pub async fn delete_selected_for_processing(
        &self,
        key: StatusKind,
        article_ids: &[String],
    ) -> Result<usize, SyncError> {
        let mut rows = self.inner.lock().await;
        let mut next = rows.clone();
        let mut deleted = 0;
        for id in article_ids {
            let row_key = (key, id.clone());
            if next.get(&row_key).is_some_and(|status| status.selected) {
                next.remove(&row_key);
                deleted += 1;
            }
        }
        self.commit(&mut rows, next).await?;
        Ok(deleted)
    }

    /// Not acknowledged: puts the rows back in the queue for the next cycle.
    /// The rows are released in memory even when the write fails; selected
    /// rows on disk are released at startup.
    pub async fn reset_selected_for_processing(
        &self,
        key: StatusKind,
        article_ids: &[String],
    ) -> Result<(), SyncError> {
        let mut rows = self.inner.lock().await;
        for id in article_ids {
            if let Some(status) = rows.get_mut(&(key, id.clone())) {
                status.selected = false;
            }
        }
        self.persist(&rows).await
    }

    /// After a crash nothing is actually in flight.
    pub async fn reset_all_selected_for_processing(&self) -> Result<(), SyncError> {
        let mut rows = self.inner.lock().await;
        let mut touched = false;
        for status in rows.values_mut().filter(|status| status.selected) {
            status.selected = false;
            touched = true;
        }
        if touched {
            self.persist(&rows).await?;
        }
        Ok(())
    }

    pub async fn pending(&self) -> Vec<SyncStatus> {
        self.inner.lock().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    /// Memory only moves to `next` once the disk copy has.
    async fn commit(
        &self,
        rows: &mut BTreeMap<LedgerKey, SyncStatus>,
        next: BTreeMap<LedgerKey, SyncStatus>,
    ) -> Result<(), SyncError> {
        self.persist(&next).await?;
        *rows = next;
        Ok(())
    }

    async fn persist(&self, rows: &BTreeMap<LedgerKey, SyncStatus>) -> Result<(), SyncError> {
        match &self.path {
            Some(path) => {
                let data = LedgerData {
                    statuses: rows.values().cloned().collect(),
                };
                write_json_atomically(path, &data).await
            }
            None => {
                debug!("pending ledger is in-memory only; skipping persist");
                Ok(())
            }
        }
    }
}
