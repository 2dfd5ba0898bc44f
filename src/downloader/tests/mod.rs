use super::test_helpers::{MockFetcher, body_for, chunk_urls, create_test_downloader, test_config};
use super::*;
use crate::config::ConcatMode;
use crate::error::{ConcatError, Error};
use crate::status::TaskStatus;
use crate::types::Summary;
use std::time::Duration;


#[test]
fn add_tasks_assigns_sequential_indices_and_names() {
    let dir = tempfile::tempdir().unwrap();
    let (downloader, _fetcher) = create_test_downloader(test_config(dir.path()), MockFetcher::new());

    let added = downloader.add_urls(chunk_urls(3)).unwrap();
    assert_eq!(added, 3);
    let added = downloader
        .add_urls(["https://cdn.test/video/tail.ts"])
        .unwrap();
    assert_eq!(added, 1);

    let tasks = downloader.tasks();
    let indices: Vec<usize> = tasks.iter().map(|t| t.index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3]);
    assert_eq!(tasks[1].filename, "seg-1.ts");
    assert_eq!(tasks[3].filename, "tail.ts");

    assert_eq!(downloader.total(), 4);
    assert_eq!(downloader.stats().total, 4);
    assert_eq!(downloader.status().len(), 4);
    assert_eq!(downloader.status().count(TaskStatus::Pending), 4);
}

#[test]
fn ascending_names_use_the_index() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        ascending: true,
        ..test_config(dir.path())
    };
    let (downloader, _fetcher) = create_test_downloader(config, MockFetcher::new());

    downloader.add_urls(chunk_urls(2)).unwrap();
    let names: Vec<String> = downloader.tasks().into_iter().map(|t| t.filename).collect();
    assert_eq!(names, vec!["00000000.ts", "00000001.ts"]);
}

#[test]
fn adding_nothing_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let (downloader, _fetcher) = create_test_downloader(test_config(dir.path()), MockFetcher::new());

    assert_eq!(downloader.add_tasks(Vec::new()).unwrap(), 0);
    assert_eq!(downloader.total(), 0);
}

#[test]
fn rejected_add_leaves_no_pending_slots() {
    let dir = tempfile::tempdir().unwrap();
    let (downloader, _fetcher) = create_test_downloader(test_config(dir.path()), MockFetcher::new());
    let mut events = downloader.subscribe();

    downloader.add_urls(chunk_urls(2)).unwrap();
    downloader.shutdown();

    let result = downloader.add_urls(["https://cdn.test/video/late.ts"]);
    assert!(matches!(result, Err(Error::ShuttingDown)));
    assert_eq!(downloader.total(), 2);
    assert_eq!(downloader.status().len(), 2);
    assert_eq!(downloader.status().get(2), None);

    // Only the accepted batch was announced
    assert!(matches!(events.try_recv(), Ok(Event::Queued { count: 2, total: 2 })));
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn add_after_run_is_rejected_without_touching_status() {
    let dir = tempfile::tempdir().unwrap();
    let (downloader, _fetcher) = create_test_downloader(test_config(dir.path()), MockFetcher::new());
    downloader.add_urls(chunk_urls(2)).unwrap();
    downloader.run().await.unwrap();

    let result = downloader.add_urls(["https://cdn.test/video/late.ts"]);
    assert!(matches!(result, Err(Error::SchedulerFinished)));
    assert_eq!(downloader.status().len(), 2);
    assert_eq!(downloader.status().count(TaskStatus::Pending), 0);
    assert_eq!(downloader.status().count(TaskStatus::Done), 2);
}

#[test]
fn existing_concat_output_is_rejected_at_construction() {
    let dir = tempfile::tempdir().unwrap();
    let existing = dir.path().join("merged.ts");
    std::fs::write(&existing, b"keep me").unwrap();

    let config = Config {
        concat: true,
        concat_output: Some(existing.clone()),
        ..test_config(dir.path())
    };
    let result = Downloader::with_fetcher(config, std::sync::Arc::new(MockFetcher::new()));
    assert!(matches!(
        result,
        Err(Error::Concat(ConcatError::OutputExists(ref path))) if *path == existing
    ));
    assert_eq!(std::fs::read(&existing).unwrap(), b"keep me");
}

#[test]
fn zero_threads_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        threads: 0,
        ..test_config(dir.path())
    };
    assert!(Downloader::with_fetcher(config, std::sync::Arc::new(MockFetcher::new())).is_err());
}
