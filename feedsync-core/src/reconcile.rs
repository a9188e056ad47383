use std::collections::{BTreeMap, HashSet};

use tracing::{debug, warn};

use crate::feed::{is_root_folder, Account, Feed};
use crate::remote::{FolderEdge, RemoteFeed, TaxonomySnapshot};

/// Counts of every mutation a reconciliation applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub folders_created: usize,
    pub folders_removed: usize,
    pub feeds_created: usize,
    pub feeds_updated: usize,
    pub feeds_removed: usize,
    pub memberships_added: usize,
    pub memberships_removed: usize,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        *self == ReconcileReport::default()
    }
}

/// Brings the account's folders, feeds and memberships in line with one
/// remote snapshot. The caller holds the account exclusively for the
/// duration of the three passes.
pub fn reconcile(account: &mut Account, snapshot: &TaxonomySnapshot) -> ReconcileReport {
    let mut report = ReconcileReport::default();
    sync_folders(account, &snapshot.folders, &mut report);
    sync_feeds(account, &snapshot.feeds, &mut report);
    sync_feed_folder_relationships(account, &snapshot.feeds, &mut report);

    let orphaned = account.prune_orphaned_feeds();
    report.feeds_removed += orphaned.len();

    debug!(?report, account = %account.account_id, "taxonomy reconciled");
    report
}

pub fn sync_folders(account: &mut Account, remote_folders: &[String], report: &mut ReconcileReport) {
    debug!(count = remote_folders.len(), "syncing folders");
    let remote_names: HashSet<&str> = remote_folders.iter().map(String::as_str).collect();

    for name in account.folder_names() {
        if remote_names.contains(name.as_str()) {
            continue;
        }
        if let Some(folder) = account.remove_folder(&name) {
            for feed_id in &folder.feed_ids {
                account.add_feed_to_root(feed_id);
                if let Some(feed) = account.existing_feed_mut(feed_id) {
                    feed.clear_folder_relationship(&name);
                }
            }
            report.folders_removed += 1;
        }
    }

    for name in remote_folders {
        if !is_root_folder(name) && account.ensure_folder(name) {
            report.folders_created += 1;
        }
    }
}

pub fn sync_feeds(account: &mut Account, remote_feeds: &[RemoteFeed], report: &mut ReconcileReport) {
    debug!(count = remote_feeds.len(), "syncing feeds");
    let remote_ids: HashSet<&str> = remote_feeds.iter().map(|f| f.feed_id.as_str()).collect();

    for feed_id in account.feed_ids() {
        if !remote_ids.contains(feed_id.as_str()) && account.remove_feed(&feed_id).is_some() {
            report.feeds_removed += 1;
        }
    }

    let mut to_add = Vec::new();
    for remote in remote_feeds {
        match account.existing_feed_mut(&remote.feed_id) {
            Some(feed) => {
                if update_feed(feed, remote) {
                    report.feeds_updated += 1;
                }
            }
            None => to_add.push(new_feed(remote)),
        }
    }

    // One batch so the account rebuilds once.
    report.feeds_created += account.create_feeds(to_add);
}

fn update_feed(feed: &mut Feed, remote: &RemoteFeed) -> bool {
    let mut changed = false;
    if feed.name != remote.name {
        feed.name = remote.name.clone();
        changed = true;
    }
    if feed.edited_name.take().is_some() {
        changed = true;
    }
    if feed.home_page_url != remote.home_page_url {
        feed.home_page_url = remote.home_page_url.clone();
        changed = true;
    }
    if feed.favicon_url != remote.favicon_url {
        feed.favicon_url = remote.favicon_url.clone();
        changed = true;
    }
    if feed.external_id.as_deref() != Some(remote.feed_id.as_str()) {
        feed.external_id = Some(remote.feed_id.clone());
        changed = true;
    }
    changed
}

fn new_feed(remote: &RemoteFeed) -> Feed {
    let mut feed = Feed::new(&remote.feed_id, &remote.name, &remote.url);
    feed.home_page_url = remote.home_page_url.clone();
    feed.favicon_url = remote.favicon_url.clone();
    feed
}

pub fn sync_feed_folder_relationships(
    account: &mut Account,
    remote_feeds: &[RemoteFeed],
    report: &mut ReconcileReport,
) {
    let mut root_edges: Option<HashSet<String>> = None;
    let mut by_folder: BTreeMap<String, Vec<(String, FolderEdge)>> = BTreeMap::new();
    for remote in remote_feeds {
        let mut filed = false;
        for edge in remote.effective_edges() {
            if edge.is_root() {
                root_edges
                    .get_or_insert_with(HashSet::new)
                    .insert(remote.feed_id.clone());
                filed = true;
            } else if account.folder(&edge.folder_name).is_none() {
                warn!(
                    feed = %remote.feed_id,
                    folder = %edge.folder_name,
                    "membership references a folder missing from the listing"
                );
            } else {
                by_folder
                    .entry(edge.folder_name.clone())
                    .or_default()
                    .push((remote.feed_id.clone(), edge));
                filed = true;
            }
        }
        // Every edge pointed at an unlisted folder: keep the feed at the root.
        if !filed {
            root_edges
                .get_or_insert_with(HashSet::new)
                .insert(remote.feed_id.clone());
        }
    }

    for folder_name in account.folder_names() {
        let edges = by_folder.get(&folder_name).map(Vec::as_slice).unwrap_or_default();
        let remote_ids: HashSet<&str> = edges.iter().map(|(id, _)| id.as_str()).collect();

        let local_ids: Vec<String> = account
            .folder(&folder_name)
            .map(|folder| folder.feed_ids.iter().cloned().collect())
            .unwrap_or_default();

        for feed_id in local_ids.iter().filter(|id| !remote_ids.contains(id.as_str())) {
            account.remove_feed_from_folder(&folder_name, feed_id);
            if let Some(feed) = account.existing_feed_mut(feed_id) {
                feed.clear_folder_relationship(&folder_name);
            }
            account.add_feed_to_root(feed_id);
            report.memberships_removed += 1;
        }

        for (feed_id, edge) in edges {
            if local_ids.contains(feed_id) {
                continue;
            }
            let Some(feed) = account.existing_feed_mut(feed_id) else {
                continue;
            };
            feed.save_folder_relationship(&folder_name, &edge.remote_id);
            if account.add_feed_to_folder(&folder_name, feed_id) {
                report.memberships_added += 1;
            }
        }
    }

    // Without root edges every feed has been filed into folders remotely.
    let root_ids = root_edges.unwrap_or_default();
    for feed_id in account.top_level_feed_ids() {
        if !root_ids.contains(&feed_id) && account.remove_feed_from_root(&feed_id) {
            report.memberships_removed += 1;
        }
    }
}
