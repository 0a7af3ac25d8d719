//! Tree synchronizer against real directory trees

mod common;

use common::{Fixture, Placeholder};
use core_library::repositories::{PathCatalog, SourceRepository};
use core_library::search::{SearchHit, SearchScope};
use core_runtime::events::{CoreEvent, SyncEvent};
use core_sync::SyncError;
use std::time::Duration;

async fn catalog_snapshot(fx: &Fixture) -> Vec<(String, String, Option<String>, bool)> {
    let mut rows: Vec<_> = fx
        .catalog
        .list_files(&fx.source.id)
        .await
        .unwrap()
        .into_iter()
        .map(|e| (e.path_id, e.relative_path, e.content_hash, e.is_directory))
        .collect();
    rows.sort();
    rows
}

#[tokio::test]
async fn second_run_over_unchanged_tree_is_idempotent() {
    let fx = Fixture::new().await;
    fx.write("A/song1.mp3", b"one");
    fx.write("A/cover.jpg", b"jpg");
    fx.write("B/C/song2.flac", b"two");

    let first = fx.synchronizer.run(&fx.source.id).await.unwrap();
    assert_eq!(first.total_entries, 6);
    assert_eq!(first.directories, 3);
    assert_eq!(first.audio_files, 2);
    assert_eq!(first.removed, 0);
    let before = catalog_snapshot(&fx).await;
    let count_before = fx.catalog.count(&fx.source.id).await.unwrap();

    let second = fx.synchronizer.run(&fx.source.id).await.unwrap();
    assert_eq!(second.generation, first.generation + 1);
    assert_eq!(second.total_entries, first.total_entries);
    assert_eq!(second.removed, 0);
    assert_eq!(catalog_snapshot(&fx).await, before);
    assert_eq!(fx.catalog.count(&fx.source.id).await.unwrap(), count_before);

    let source = fx.sources.find_by_id(&fx.source.id).await.unwrap().unwrap();
    assert_eq!(source.last_entry_count, 6);
    assert!(source.last_error.is_none());
}

#[tokio::test]
async fn deleted_file_disappears_with_its_index_row() {
    let fx = Fixture::new().await;
    fx.write("A/keep.mp3", b"keep");
    let doomed = fx.write("A/doomed.mp3", b"doomed");
    fx.synchronizer.run(&fx.source.id).await.unwrap();

    std::fs::remove_file(&doomed).unwrap();
    let report = fx.synchronizer.run(&fx.source.id).await.unwrap();
    assert_eq!(report.removed, 1);

    assert!(fx
        .catalog
        .find_by_relative_path(&fx.source.id, "A/doomed.mp3")
        .await
        .unwrap()
        .is_none());
    assert!(fx
        .catalog
        .find_by_relative_path(&fx.source.id, "A/keep.mp3")
        .await
        .unwrap()
        .is_some());

    let page = fx.search.query(SearchScope::Paths, "doomed", 10, 0).await.unwrap();
    assert_eq!(page.total, 0);
    let page = fx.search.query(SearchScope::Paths, "keep", 10, 0).await.unwrap();
    assert_eq!(page.total, 1);
}

#[cfg(unix)]
#[tokio::test]
async fn symlinks_are_never_followed_or_cataloged() {
    let fx = Fixture::new().await;
    fx.write("A/song.mp3", b"x");
    std::os::unix::fs::symlink(&fx.root, fx.path("A/loop")).unwrap();
    std::os::unix::fs::symlink(fx.path("A/song.mp3"), fx.path("alias.mp3")).unwrap();

    let report = fx.synchronizer.run(&fx.source.id).await.unwrap();
    assert_eq!(report.total_entries, 2);
    assert_eq!(report.skipped, 2);
    assert!(fx
        .catalog
        .find_by_relative_path(&fx.source.id, "A/loop")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn placeholders_are_materialized_or_retained() {
    let fx = Fixture::new().await;
    let slow = fx.write("A/slow.mp3", b"slow");
    let stuck = fx.write("A/stuck.mp3", b"stuck");
    fx.synchronizer.run(&fx.source.id).await.unwrap();

    fx.fs.evict(&slow, Placeholder::MaterializesAfter(1));
    fx.fs.evict(&stuck, Placeholder::Never);
    let report = fx.synchronizer.run(&fx.source.id).await.unwrap();

    assert!(fx.fs.was_requested(&slow));
    assert!(fx.fs.was_requested(&stuck));
    assert_eq!(report.skipped, 1);
    assert_eq!(report.removed, 0);
    assert!(report.error.as_deref().unwrap().contains("stuck.mp3"));

    // The unavailable file keeps its row from the previous run.
    let stuck_row = fx
        .catalog
        .find_by_relative_path(&fx.source.id, "A/stuck.mp3")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stuck_row.generation, report.generation);
}

#[tokio::test]
async fn unavailable_directory_keeps_its_subtree() {
    let fx = Fixture::new().await;
    fx.write("Remote/deep/song.mp3", b"x");
    fx.synchronizer.run(&fx.source.id).await.unwrap();
    let before = fx.catalog.count(&fx.source.id).await.unwrap();

    fx.fs.evict(&fx.path("Remote"), Placeholder::Never);
    let report = fx.synchronizer.run(&fx.source.id).await.unwrap();

    assert_eq!(report.removed, 0);
    assert_eq!(fx.catalog.count(&fx.source.id).await.unwrap(), before);
}

#[tokio::test]
async fn missing_root_fails_and_records_error() {
    let fx = Fixture::new().await;
    fx.write("A/song.mp3", b"x");
    fx.synchronizer.run(&fx.source.id).await.unwrap();
    let before = fx.catalog.count(&fx.source.id).await.unwrap();

    std::fs::remove_dir_all(&fx.root).unwrap();
    let err = fx.synchronizer.run(&fx.source.id).await.unwrap_err();
    assert!(matches!(err, SyncError::Access(_)));

    assert_eq!(fx.catalog.count(&fx.source.id).await.unwrap(), before);
    let source = fx.sources.find_by_id(&fx.source.id).await.unwrap().unwrap();
    assert!(source.last_error.is_some());
    assert_eq!(fx.resolver.live_grants(), 0);
}

#[tokio::test]
async fn cancelled_run_tombstones_nothing() {
    let fx = Fixture::with_poll(Duration::from_millis(20), 10_000).await;
    let gone = fx.write("A/gone.mp3", b"x");
    let waiting = fx.write("A/waiting.mp3", b"y");
    fx.synchronizer.run(&fx.source.id).await.unwrap();

    std::fs::remove_file(&gone).unwrap();
    fx.fs.evict(&waiting, Placeholder::Never);

    let mut events = fx.events.subscribe();
    let synchronizer = fx.synchronizer.clone();
    let source_id = fx.source.id.clone();
    let run = tokio::spawn(async move { synchronizer.run(&source_id).await });

    while !fx.fs.was_requested(&waiting) {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(matches!(
        fx.synchronizer.run(&fx.source.id).await,
        Err(SyncError::SyncInProgress { .. })
    ));
    assert!(fx.synchronizer.cancel_source(&fx.source.id));

    let err = run.await.unwrap().unwrap_err();
    assert!(err.is_cancelled());
    assert!(!fx.synchronizer.is_running(&fx.source.id));

    // No reconciliation happened: the deleted file's row is still there.
    assert!(fx
        .catalog
        .find_by_relative_path(&fx.source.id, "A/gone.mp3")
        .await
        .unwrap()
        .is_some());
    let source = fx.sources.find_by_id(&fx.source.id).await.unwrap().unwrap();
    assert!(source.last_error.is_none());

    let mut cancelled = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, CoreEvent::Sync(SyncEvent::Cancelled { .. })) {
            cancelled = true;
        }
    }
    assert!(cancelled);

    // The next run completes and reconciles.
    fx.fs.restore(&waiting);
    let report = fx.synchronizer.run(&fx.source.id).await.unwrap();
    assert_eq!(report.removed, 1);
}

#[tokio::test]
async fn catalog_listing_browses_the_tree() {
    let fx = Fixture::new().await;
    fx.write("b.mp3", b"x");
    fx.write("Zed/c.mp3", b"x");
    fx.write("alpha/d.mp3", b"x");
    fx.synchronizer.run(&fx.source.id).await.unwrap();

    let top = fx.catalog.list(&fx.source.id, None).await.unwrap();
    let names: Vec<_> = top.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["alpha", "Zed", "b.mp3"]);

    let zed = &top[1];
    let children = fx
        .catalog
        .list(&fx.source.id, Some(&zed.path_id))
        .await
        .unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].relative_path, "Zed/c.mp3");

    let hits = fx.search.query(SearchScope::Paths, "zed", 10, 0).await.unwrap();
    assert!(hits
        .hits
        .iter()
        .any(|hit| matches!(hit, SearchHit::Path { entry, .. } if entry.name == "Zed")));
}
