mod common;

use common::remote_feed;
use feedsync_core::remote::{FolderEdge, TaxonomySnapshot};
use feedsync_core::{reconcile, Account, Feed};

fn folders(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

#[test]
fn empty_account_takes_the_remote_taxonomy() {
    let mut account = Account::new("newsblur");
    let snapshot = TaxonomySnapshot {
        folders: folders(&["Tech", "News"]),
        feeds: vec![remote_feed("1", &["Tech"]), remote_feed("2", &[])],
    };

    let report = reconcile(&mut account, &snapshot);

    assert_eq!(account.folder_names(), folders(&["News", "Tech"]));
    assert!(account.folder("Tech").unwrap().contains("1"));
    assert!(!account.is_top_level("1"));
    assert!(account.is_top_level("2"));
    assert!(account.folder("News").unwrap().feed_ids.is_empty());
    assert_eq!(report.folders_created, 2);
    assert_eq!(report.feeds_created, 2);
}

#[test]
fn dropped_folder_sends_its_feeds_to_the_root() {
    let mut account = Account::new("newsblur");
    reconcile(
        &mut account,
        &TaxonomySnapshot {
            folders: folders(&["Tech"]),
            feeds: vec![remote_feed("1", &["Tech"])],
        },
    );
    assert!(account.folder("Tech").unwrap().contains("1"));

    let report = reconcile(
        &mut account,
        &TaxonomySnapshot {
            folders: vec![],
            feeds: vec![remote_feed("1", &[])],
        },
    );

    assert!(account.folder("Tech").is_none());
    assert!(account.is_top_level("1"));
    assert!(!account
        .existing_feed("1")
        .unwrap()
        .folder_relationship
        .contains_key("Tech"));
    assert_eq!(report.folders_removed, 1);
}

#[test]
fn every_feed_of_a_removed_folder_loses_that_relationship() {
    let mut account = Account::new("newsblur");
    let ids = ["1", "2", "3"];
    reconcile(
        &mut account,
        &TaxonomySnapshot {
            folders: folders(&["Tech", "News"]),
            feeds: ids.iter().map(|id| remote_feed(id, &["Tech", "News"])).collect(),
        },
    );

    reconcile(
        &mut account,
        &TaxonomySnapshot {
            folders: folders(&["News"]),
            feeds: ids.iter().map(|id| remote_feed(id, &["News"])).collect(),
        },
    );

    for id in ids {
        let feed = account.existing_feed(id).unwrap();
        assert!(!feed.folder_relationship.contains_key("Tech"), "feed {id}");
        assert!(feed.folder_relationship.contains_key("News"), "feed {id}");
        assert!(account.folder("News").unwrap().contains(id));
    }
}

#[test]
fn applying_the_same_snapshot_twice_changes_nothing() {
    let mut account = Account::new("newsblur");
    let snapshot = TaxonomySnapshot {
        folders: folders(&["Tech", "News", "Empty"]),
        feeds: vec![
            remote_feed("1", &["Tech"]),
            remote_feed("2", &[]),
            remote_feed("3", &["Tech", "News"]),
            remote_feed("4", &[" ", "News"]),
        ],
    };

    let first = reconcile(&mut account, &snapshot);
    assert!(!first.is_empty());
    let after_first = account.clone();

    let second = reconcile(&mut account, &snapshot);
    assert!(second.is_empty(), "second pass mutated: {second:?}");
    assert_eq!(account, after_first);
}

#[test]
fn feeds_missing_remotely_are_removed_everywhere() {
    let mut account = Account::new("newsblur");
    reconcile(
        &mut account,
        &TaxonomySnapshot {
            folders: folders(&["Tech"]),
            feeds: vec![remote_feed("1", &["Tech", " "]), remote_feed("2", &[])],
        },
    );

    let report = reconcile(
        &mut account,
        &TaxonomySnapshot {
            folders: folders(&["Tech"]),
            feeds: vec![remote_feed("2", &[])],
        },
    );

    assert!(account.existing_feed("1").is_none());
    assert!(!account.is_top_level("1"));
    assert!(!account.folder("Tech").unwrap().contains("1"));
    assert_eq!(report.feeds_removed, 1);
}

#[test]
fn fully_folderized_remote_empties_the_root() {
    let mut account = Account::new("newsblur");
    account.create_feeds(vec![
        Feed::new("1", "Feed 1", "http://example.com/1.xml"),
        Feed::new("2", "Feed 2", "http://example.com/2.xml"),
    ]);
    assert_eq!(account.top_level_feed_ids().len(), 2);

    reconcile(
        &mut account,
        &TaxonomySnapshot {
            folders: folders(&["Tech"]),
            feeds: vec![remote_feed("1", &["Tech"]), remote_feed("2", &["Tech"])],
        },
    );

    assert!(account.top_level_feed_ids().is_empty());
    assert_eq!(account.folder("Tech").unwrap().feed_ids.len(), 2);
}

#[test]
fn remote_metadata_wins_over_local_values() {
    let mut account = Account::new("newsblur");
    let mut local = Feed::new("1", "Old name", "http://example.com/1.xml");
    local.edited_name = Some("My name".into());
    local.favicon_url = Some("http://example.com/old.ico".into());
    account.create_feeds(vec![local]);

    let mut remote = remote_feed("1", &[]);
    remote.name = "New name".into();
    remote.favicon_url = Some("http://example.com/new.ico".into());
    reconcile(
        &mut account,
        &TaxonomySnapshot {
            folders: vec![],
            feeds: vec![remote],
        },
    );

    let feed = account.existing_feed("1").unwrap();
    assert_eq!(feed.name, "New name");
    assert_eq!(feed.edited_name, None);
    assert_eq!(feed.favicon_url.as_deref(), Some("http://example.com/new.ico"));
    assert_eq!(feed.home_page_url.as_deref(), Some("http://example.com/1"));
}

#[test]
fn folder_membership_records_the_remote_handle() {
    let mut account = Account::new("newsblur");
    let mut remote = remote_feed("1", &[]);
    remote.folder_edges = vec![FolderEdge {
        folder_name: "Tech".into(),
        remote_id: "folder:17".into(),
    }];
    reconcile(
        &mut account,
        &TaxonomySnapshot {
            folders: folders(&["Tech"]),
            feeds: vec![remote],
        },
    );

    let feed = account.existing_feed("1").unwrap();
    assert_eq!(feed.folder_relationship.get("Tech").map(String::as_str), Some("folder:17"));
}

#[test]
fn edges_to_unlisted_folders_are_skipped() {
    let mut account = Account::new("newsblur");
    let report = reconcile(
        &mut account,
        &TaxonomySnapshot {
            folders: folders(&["Tech"]),
            feeds: vec![remote_feed("1", &["Ghost", " "])],
        },
    );

    assert!(account.folder("Ghost").is_none());
    assert!(account.is_top_level("1"));
    assert_eq!(report.memberships_added, 0);
}

#[test]
fn feed_filed_only_in_unlisted_folders_stays_at_root() {
    let mut account = Account::new("newsblur");
    let snapshot = TaxonomySnapshot {
        folders: folders(&["Tech"]),
        feeds: vec![remote_feed("1", &["Ghost"]), remote_feed("2", &["Tech"])],
    };

    reconcile(&mut account, &snapshot);
    let second = reconcile(&mut account, &snapshot);

    assert!(second.is_empty(), "second pass changed {second:?}");
    assert!(account.existing_feed("1").is_some());
    assert!(account.is_top_level("1"));
    assert!(account.folder("Tech").unwrap().contains("2"));
    assert!(!account.is_top_level("2"));
}
