use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use tracing::{debug, error, info};

use crate::article::{SharedArticles, StatusKind};
use crate::config::StatusConfig;
use crate::error::SyncError;
use crate::ledger::{PendingLedger, SyncStatus};
use crate::remote::{StatusAction, StoryHash, StoryService};

/// Splits ids into disjoint groups that respect the per-call item limit.
pub fn chunk_article_ids(article_ids: &[String], chunk_size: usize) -> Vec<Vec<String>> {
    article_ids
        .chunks(chunk_size.max(1))
        .map(<[String]>::to_vec)
        .collect()
}

enum ChunkOutcome {
    Acknowledged,
    Failed { rate_limited: bool },
}

#[derive(Clone)]
pub struct StatusPropagator {
    service: Arc<dyn StoryService>,
    ledger: PendingLedger,
    config: StatusConfig,
}

impl StatusPropagator {
    pub fn new(service: Arc<dyn StoryService>, ledger: PendingLedger, config: StatusConfig) -> Self {
        Self {
            service,
            ledger,
            config,
        }
    }

    pub fn chunk_size(&self, throttle: bool) -> usize {
        if throttle {
            self.config.throttled_chunk_size
        } else {
            self.config.chunk_size
        }
    }

    /// Pushes every pending row: selects them, groups them by direction and
    /// sends each group through [`Self::send_story_statuses`].
    pub async fn send_article_statuses(&self, throttle: bool) -> Result<(), SyncError> {
        let statuses = self.ledger.select_for_processing().await?;
        if statuses.is_empty() {
            return Ok(());
        }
        info!(count = statuses.len(), throttle, "sending article statuses");

        let mut groups: BTreeMap<(StatusKind, bool), Vec<SyncStatus>> = BTreeMap::new();
        for status in statuses {
            groups.entry((status.key, status.flag)).or_default().push(status);
        }

        let mut failed_chunks = 0;
        let mut rate_limited = false;
        for ((kind, flag), group) in groups {
            let action = StatusAction::new(kind, flag);
            let service = Arc::clone(&self.service);
            let result = self
                .send_story_statuses(&group, kind, throttle, |hashes| {
                    let service = Arc::clone(&service);
                    async move { service.push_status(action, &hashes).await }
                })
                .await;
            if let Err(SyncError::PropagationPartialFailure {
                failed_chunks: failed,
                rate_limited: limited,
            }) = result
            {
                failed_chunks += failed;
                rate_limited |= limited;
            } else {
                result?;
            }
        }

        if failed_chunks > 0 {
            return Err(SyncError::PropagationPartialFailure {
                failed_chunks,
                rate_limited,
            });
        }
        Ok(())
    }

    /// Sends one group of statuses in chunks, concurrently. Each chunk is
    /// settled in the ledger on its own: deleted when acknowledged, reset
    /// otherwise. Fails after every chunk settled if any of them failed.
    pub async fn send_story_statuses<F, Fut>(
        &self,
        statuses: &[SyncStatus],
        kind: StatusKind,
        throttle: bool,
        api_call: F,
    ) -> Result<(), SyncError>
    where
        F: Fn(Vec<String>) -> Fut,
        Fut: Future<Output = Result<(), SyncError>>,
    {
        if statuses.is_empty() {
            return Ok(());
        }

        let article_ids: Vec<String> = statuses.iter().map(|s| s.article_id.clone()).collect();
        let chunks = chunk_article_ids(&article_ids, self.chunk_size(throttle));
        debug!(chunks = chunks.len(), ?kind, "pushing status chunks");

        let outcomes: Vec<ChunkOutcome> = stream::iter(chunks)
            .map(|chunk| {
                let call = api_call(chunk.clone());
                async move {
                    let result = call.await;
                    self.settle_chunk(kind, &chunk, result).await
                }
            })
            .buffer_unordered(self.config.max_in_flight.max(1))
            .collect()
            .await;

        let mut failed_chunks = 0;
        let mut rate_limited = false;
        for outcome in outcomes {
            if let ChunkOutcome::Failed { rate_limited: limited } = outcome {
                failed_chunks += 1;
                rate_limited |= limited;
            }
        }

        if failed_chunks > 0 {
            Err(SyncError::PropagationPartialFailure {
                failed_chunks,
                rate_limited,
            })
        } else {
            Ok(())
        }
    }

    async fn settle_chunk(
        &self,
        kind: StatusKind,
        chunk: &[String],
        result: Result<(), SyncError>,
    ) -> ChunkOutcome {
        let failure = match result {
            Ok(()) => match self.ledger.delete_selected_for_processing(kind, chunk).await {
                Ok(_) => return ChunkOutcome::Acknowledged,
                Err(e) => e,
            },
            Err(e) => e,
        };

        error!(error = %failure, ids = chunk.len(), "story status sync call failed");
        if let Err(e) = self.ledger.reset_selected_for_processing(kind, chunk).await {
            error!(error = %e, "failed to reset statuses for retry");
        }
        ChunkOutcome::Failed {
            rate_limited: failure.is_rate_limited(),
        }
    }
}

/// Adopts the remote unread (or starred) set locally, leaving alone every
/// article with a pending change of that kind. Returns the ids flipped.
pub async fn sync_story_state(
    articles: &SharedArticles,
    ledger: &PendingLedger,
    kind: StatusKind,
    remote_hashes: &[StoryHash],
) -> Vec<String> {
    let pending = ledger.select_pending_article_ids(kind).await;
    let remote: HashSet<String> = remote_hashes
        .iter()
        .map(|h| h.hash.clone())
        .filter(|hash| !pending.contains(hash))
        .collect();

    // Remote set names articles that are unread, or starred.
    let remote_flag = match kind {
        StatusKind::Read => false,
        StatusKind::Starred => true,
    };

    let mut store = articles.write().await;
    let current = store.article_ids_with(kind, remote_flag);

    let gained: Vec<String> = remote.difference(&current).cloned().collect();
    let lost: Vec<String> = current
        .difference(&remote)
        .filter(|id| !pending.contains(*id))
        .cloned()
        .collect();

    let mut changed = store.mark(&gained, kind, remote_flag);
    changed.extend(store.mark(&lost, kind, !remote_flag));
    debug!(?kind, changed = changed.len(), "adopted remote story state");
    changed
}
