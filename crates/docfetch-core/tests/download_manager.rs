//! Integration tests: the download manager against a local HTTP server.
//!
//! Each test starts its own server and an in-memory (or temp-file) task store,
//! enqueues work through the public API and checks the durable task state,
//! the files on disk and what the server saw.

mod common;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::range_server::{self, RangeServer, RangeServerOptions};
use docfetch_core::config::{DocfetchConfig, RetryConfig, SourceConfig};
use docfetch_core::source::{CredentialProvider, Credentials};
use docfetch_core::task::CREDENTIALS_REQUIRED;
use docfetch_core::{
    DownloadManager, DownloadTask, EnqueueRequest, TaskQuery, TaskStatus, TaskStore,
};
use tempfile::{tempdir, TempDir};

const SOURCE: &str = "local";

fn body(len: usize) -> Vec<u8> {
    (0u8..251).cycle().take(len).collect()
}

fn config(max_parallel: usize) -> DocfetchConfig {
    let mut cfg = DocfetchConfig::default();
    cfg.max_parallel = max_parallel;
    cfg.timeout_secs = 30;
    cfg.progress_bytes_threshold = 1024;
    cfg.progress_interval_ms = 20;
    cfg.retry = Some(RetryConfig {
        retry_attempts: 3,
        retry_delay_secs: 0.05,
        max_retry_delay_secs: 1,
    });
    cfg.sources.insert(
        SOURCE.to_string(),
        SourceConfig {
            requests_per_minute: Some(600),
            ..SourceConfig::default()
        },
    );
    cfg
}

fn slow() -> RangeServerOptions {
    RangeServerOptions {
        throttle: Some((4096, Duration::from_millis(30))),
        ..RangeServerOptions::default()
    }
}

async fn start(cfg: DocfetchConfig) -> DownloadManager {
    let store = TaskStore::open_memory().await.unwrap();
    DownloadManager::builder(cfg, store).start().await.unwrap()
}

async fn settle(manager: &DownloadManager) {
    tokio::time::timeout(Duration::from_secs(30), manager.wait_idle())
        .await
        .expect("manager did not go idle in time");
}

async fn reload(manager: &DownloadManager, task: &DownloadTask) -> DownloadTask {
    manager.get(task.id).await.unwrap().expect("task exists")
}

/// Wait for a progress event showing `task_id` Active with bytes on disk.
async fn wait_for_progress(events: &mut docfetch_core::EventStream, task_id: i64) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(event) = events.recv().await {
            if event.task_id == task_id
                && event.status == TaskStatus::Active
                && event.bytes_downloaded > 0
            {
                return;
            }
        }
        panic!("event stream closed before progress");
    })
    .await
    .expect("no progress event in time");
}

/// Poll the store until every task is terminal. Returns the largest number of
/// tasks seen Active at the same time.
async fn peak_active(manager: &DownloadManager) -> usize {
    let active = TaskQuery::default().with_status(TaskStatus::Active);
    tokio::time::timeout(Duration::from_secs(30), async {
        let mut peak = 0;
        loop {
            peak = peak.max(manager.list(&active).await.unwrap().len());
            let all = manager.list(&TaskQuery::default()).await.unwrap();
            if all.iter().all(|t| t.status.is_terminal()) {
                return peak;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("tasks did not finish in time")
}

fn dest(dir: &TempDir, name: &str) -> PathBuf {
    dir.path().join(SOURCE).join(name)
}

fn write_partial(dest: &Path, data: &[u8]) -> PathBuf {
    let partial = docfetch_core::transfer::partial_path(dest);
    std::fs::create_dir_all(partial.parent().unwrap()).unwrap();
    std::fs::write(&partial, data).unwrap();
    partial
}

#[tokio::test]
async fn full_download_completes_and_file_matches() {
    let content = body(200 * 1024);
    let server = range_server::start(content.clone());
    let dir = tempdir().unwrap();
    let manager = start(config(3)).await;
    let mut events = manager.subscribe();

    let task = manager
        .enqueue(EnqueueRequest::new(server.url("a.pdf"), SOURCE, dest(&dir, "a.pdf")))
        .await
        .unwrap();
    settle(&manager).await;

    let task = reload(&manager, &task).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.attempt_count, 1);
    assert_eq!(task.bytes_downloaded, content.len() as u64);
    assert_eq!(task.bytes_total, Some(content.len() as u64));
    assert_eq!(task.resume_token.as_deref(), Some("\"v1\""));
    assert_eq!(std::fs::read(&task.destination_path).unwrap(), content);
    assert!(!task.partial_path().exists());

    let mut statuses = Vec::new();
    while let Some(event) = events.try_recv() {
        if statuses.last() != Some(&event.status) {
            statuses.push(event.status);
        }
    }
    assert_eq!(
        statuses,
        vec![TaskStatus::Queued, TaskStatus::Active, TaskStatus::Completed]
    );
    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn resume_sends_range_and_if_range() {
    let content = body(64 * 1024);
    let server = range_server::start(content.clone());
    let dir = tempdir().unwrap();
    let target = dest(&dir, "resume.pdf");
    write_partial(&target, &content[..10_000]);

    let store = TaskStore::open_memory().await.unwrap();
    let mut task = store
        .insert(&EnqueueRequest::new(server.url("resume.pdf"), SOURCE, &target))
        .await
        .unwrap();
    task.bytes_downloaded = 10_000;
    task.bytes_total = Some(content.len() as u64);
    task.resume_token = Some("\"v1\"".to_string());
    store.persist(&mut task).await.unwrap();

    let manager = DownloadManager::builder(config(1), store).start().await.unwrap();
    settle(&manager).await;

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].header("range"), Some("bytes=10000-"));
    assert_eq!(requests[0].header("if-range"), Some("\"v1\""));
    let task = reload(&manager, &task).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(std::fs::read(&target).unwrap(), content);
}

#[tokio::test]
async fn changed_validator_restarts_from_zero() {
    let content = body(32 * 1024);
    let server = range_server::start_with_options(
        content.clone(),
        RangeServerOptions {
            etag: Some("\"v2\"".to_string()),
            ..RangeServerOptions::default()
        },
    );
    let dir = tempdir().unwrap();
    let target = dest(&dir, "changed.pdf");
    write_partial(&target, &[0xAA; 5_000]);

    let store = TaskStore::open_memory().await.unwrap();
    let mut task = store
        .insert(&EnqueueRequest::new(server.url("changed.pdf"), SOURCE, &target))
        .await
        .unwrap();
    task.bytes_downloaded = 5_000;
    task.resume_token = Some("\"v1\"".to_string());
    store.persist(&mut task).await.unwrap();

    let manager = DownloadManager::builder(config(1), store).start().await.unwrap();
    settle(&manager).await;

    let task = reload(&manager, &task).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.resume_token.as_deref(), Some("\"v2\""));
    assert_eq!(std::fs::read(&target).unwrap(), content);
}

#[tokio::test]
async fn partial_already_complete_is_finalized_on_416() {
    let content = body(16 * 1024);
    let server = range_server::start(content.clone());
    let dir = tempdir().unwrap();
    let target = dest(&dir, "done.pdf");
    write_partial(&target, &content);

    let store = TaskStore::open_memory().await.unwrap();
    let mut task = store
        .insert(&EnqueueRequest::new(server.url("done.pdf"), SOURCE, &target))
        .await
        .unwrap();
    task.bytes_downloaded = content.len() as u64;
    task.resume_token = Some("\"v1\"".to_string());
    store.persist(&mut task).await.unwrap();

    let manager = DownloadManager::builder(config(1), store).start().await.unwrap();
    settle(&manager).await;

    let task = reload(&manager, &task).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.bytes_total, Some(content.len() as u64));
    assert_eq!(std::fs::read(&target).unwrap(), content);
}

#[derive(Default)]
struct CountingCredentials {
    required: AtomicUsize,
}

impl CredentialProvider for CountingCredentials {
    fn credentials(&self, _source_id: &str) -> Option<Credentials> {
        None
    }

    fn credentials_required(&self, _task: &DownloadTask) {
        self.required.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn unauthorized_pauses_with_credentials_required() {
    let server = range_server::start_with_options(
        Vec::new(),
        RangeServerOptions {
            fixed_status: Some(401),
            ..RangeServerOptions::default()
        },
    );
    let dir = tempdir().unwrap();
    let provider = Arc::new(CountingCredentials::default());
    let store = TaskStore::open_memory().await.unwrap();
    let manager = DownloadManager::builder(config(1), store)
        .credentials(provider.clone())
        .start()
        .await
        .unwrap();

    let task = manager
        .enqueue(EnqueueRequest::new(server.url("locked.pdf"), SOURCE, dest(&dir, "locked.pdf")))
        .await
        .unwrap();
    settle(&manager).await;

    let task = reload(&manager, &task).await;
    assert_eq!(task.status, TaskStatus::Paused);
    assert_eq!(task.last_error.as_deref(), Some(CREDENTIALS_REQUIRED));
    assert_eq!(task.attempt_count, 0);
    assert_eq!(provider.required.load(Ordering::SeqCst), 1);
    assert_eq!(server.request_count(), 1);
}

#[tokio::test]
async fn transient_failures_are_retried_until_success() {
    let content = body(8 * 1024);
    let server = range_server::start_with_options(
        content.clone(),
        RangeServerOptions {
            fail_first: 2,
            ..RangeServerOptions::default()
        },
    );
    let dir = tempdir().unwrap();
    let manager = start(config(1)).await;

    let task = manager
        .enqueue(EnqueueRequest::new(server.url("flaky.pdf"), SOURCE, dest(&dir, "flaky.pdf")))
        .await
        .unwrap();
    settle(&manager).await;

    let task = reload(&manager, &task).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.attempt_count, 3);
    assert_eq!(task.last_error, None);
    assert_eq!(server.request_count(), 3);
    assert_eq!(std::fs::read(&task.destination_path).unwrap(), content);
}

#[tokio::test]
async fn transient_failures_exhaust_attempts() {
    let server = range_server::start_with_options(
        body(1024),
        RangeServerOptions {
            fail_first: usize::MAX,
            ..RangeServerOptions::default()
        },
    );
    let dir = tempdir().unwrap();
    let manager = start(config(1)).await;

    let task = manager
        .enqueue(EnqueueRequest::new(server.url("down.pdf"), SOURCE, dest(&dir, "down.pdf")))
        .await
        .unwrap();
    settle(&manager).await;

    let task = reload(&manager, &task).await;
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.attempt_count, 3);
    assert_eq!(task.last_error.as_deref(), Some("HTTP 500"));
    assert_eq!(server.request_count(), 3);

    // Operator retry grants a fresh budget.
    let retried = manager.retry(task.id).await.unwrap();
    assert_eq!(retried.attempt_count, 0);
    settle(&manager).await;
    assert_eq!(server.request_count(), 6);
}

#[tokio::test]
async fn permanent_failure_is_not_retried() {
    let server = range_server::start_with_options(
        Vec::new(),
        RangeServerOptions {
            fixed_status: Some(404),
            ..RangeServerOptions::default()
        },
    );
    let dir = tempdir().unwrap();
    let manager = start(config(1)).await;

    let task = manager
        .enqueue(EnqueueRequest::new(server.url("gone.pdf"), SOURCE, dest(&dir, "gone.pdf")))
        .await
        .unwrap();
    settle(&manager).await;

    let task = reload(&manager, &task).await;
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.attempt_count, 1);
    assert_eq!(task.last_error.as_deref(), Some("HTTP 404"));
    assert_eq!(server.request_count(), 1);
}

#[tokio::test]
async fn rate_limit_spaces_transfer_starts() {
    let server = range_server::start(body(1024));
    let dir = tempdir().unwrap();
    let mut cfg = config(5);
    cfg.sources.insert(
        SOURCE.to_string(),
        SourceConfig {
            requests_per_minute: Some(2),
            window_secs: Some(1),
            ..SourceConfig::default()
        },
    );
    let manager = start(cfg).await;

    for i in 0..5 {
        let name = format!("{i}.pdf");
        manager
            .enqueue(EnqueueRequest::new(server.url(&name), SOURCE, dest(&dir, &name)))
            .await
            .unwrap();
    }
    settle(&manager).await;

    let starts: Vec<_> = server.requests().iter().map(|r| r.at).collect();
    assert_eq!(starts.len(), 5);
    for pair in starts.windows(3) {
        let spread = pair[2].duration_since(pair[0]);
        assert!(
            spread >= Duration::from_millis(900),
            "three starts within {spread:?}"
        );
    }
    let all = manager.list(&Default::default()).await.unwrap();
    assert!(all.iter().all(|t| t.status == TaskStatus::Completed));
}

#[tokio::test]
async fn higher_priority_starts_first() {
    let server = range_server::start(body(1024));
    let dir = tempdir().unwrap();
    let store = TaskStore::open_memory().await.unwrap();
    let manager = DownloadManager::builder(config(1), store)
        .start_paused(true)
        .start()
        .await
        .unwrap();

    for (name, priority) in [("low.pdf", 0), ("high.pdf", 10), ("mid.pdf", 5), ("low2.pdf", 0)] {
        manager
            .enqueue(
                EnqueueRequest::new(server.url(name), SOURCE, dest(&dir, name))
                    .with_priority(priority),
            )
            .await
            .unwrap();
    }
    manager.resume_queue().await.unwrap();
    settle(&manager).await;

    let order: Vec<_> = server.requests().into_iter().map(|r| r.path).collect();
    assert_eq!(order, vec!["/high.pdf", "/mid.pdf", "/low.pdf", "/low2.pdf"]);
}

#[tokio::test]
async fn cancel_active_keeps_partial_file() {
    let content = body(256 * 1024);
    let server = range_server::start_with_options(content, slow());
    let dir = tempdir().unwrap();
    let manager = start(config(1)).await;
    let mut events = manager.subscribe();

    let task = manager
        .enqueue(EnqueueRequest::new(server.url("big.pdf"), SOURCE, dest(&dir, "big.pdf")))
        .await
        .unwrap();
    wait_for_progress(&mut events, task.id).await;

    let cancelled = manager.cancel(task.id).await.unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);
    assert_eq!(cancelled.attempt_count, 0);
    assert!(cancelled.bytes_downloaded > 0);
    assert!(cancelled.partial_path().exists());
    assert!(!cancelled.destination_path.exists());
    manager.remove(task.id, false).await.unwrap();
    assert!(cancelled.partial_path().exists());
}

#[tokio::test]
async fn pause_active_then_resume_continues_from_partial() {
    let content = body(256 * 1024);
    let server = range_server::start_with_options(content.clone(), slow());
    let dir = tempdir().unwrap();
    let manager = start(config(1)).await;
    let mut events = manager.subscribe();

    let task = manager
        .enqueue(EnqueueRequest::new(server.url("big.pdf"), SOURCE, dest(&dir, "big.pdf")))
        .await
        .unwrap();
    wait_for_progress(&mut events, task.id).await;

    let paused = manager.pause(task.id).await.unwrap();
    assert_eq!(paused.status, TaskStatus::Paused);
    let offset = paused.bytes_downloaded;
    assert!(offset > 0);
    assert_eq!(
        std::fs::metadata(paused.partial_path()).unwrap().len(),
        offset
    );

    manager.resume(task.id).await.unwrap();
    settle(&manager).await;

    let requests = server.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(
        requests[1].header("range"),
        Some(format!("bytes={offset}-").as_str())
    );
    let task = reload(&manager, &task).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.attempt_count, 1);
    assert_eq!(std::fs::read(&task.destination_path).unwrap(), content);
}

#[tokio::test]
async fn shutdown_requeues_active_and_restart_finishes_it() {
    let content = body(256 * 1024);
    let server = range_server::start_with_options(content.clone(), slow());
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("state").join("tasks.db");
    let store = TaskStore::open_at(&db_path).await.unwrap();
    let manager = DownloadManager::builder(config(1), store.clone())
        .start()
        .await
        .unwrap();
    let mut events = manager.subscribe();

    let task = manager
        .enqueue(EnqueueRequest::new(server.url("big.pdf"), SOURCE, dest(&dir, "big.pdf")))
        .await
        .unwrap();
    wait_for_progress(&mut events, task.id).await;
    manager.shutdown().await.unwrap();

    let stopped = store.get(task.id).await.unwrap().unwrap();
    assert_eq!(stopped.status, TaskStatus::Queued);
    assert_eq!(stopped.attempt_count, 0);
    assert!(stopped.bytes_downloaded > 0);
    assert!(stopped.partial_path().exists());

    let restarted = DownloadManager::builder(config(1), store).start().await.unwrap();
    settle(&restarted).await;
    let done = reload(&restarted, &task).await;
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(std::fs::read(&done.destination_path).unwrap(), content);
    let second = &server.requests()[1];
    assert_eq!(
        second.header("range"),
        Some(format!("bytes={}-", stopped.bytes_downloaded).as_str())
    );
}

#[tokio::test]
async fn active_transfers_never_exceed_max_parallel() {
    let content = body(96 * 1024);
    let server = range_server::start_with_options(content.clone(), slow());
    let dir = tempdir().unwrap();
    let manager = start(config(2)).await;

    for i in 0..5 {
        let name = format!("p{i}.pdf");
        manager
            .enqueue(EnqueueRequest::new(server.url(&name), SOURCE, dest(&dir, &name)))
            .await
            .unwrap();
    }
    assert_eq!(peak_active(&manager).await, 2);

    let all = manager.list(&TaskQuery::default()).await.unwrap();
    assert_eq!(all.len(), 5);
    for task in all {
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(std::fs::read(&task.destination_path).unwrap(), content);
    }
}

#[tokio::test]
async fn tasks_sharing_a_destination_run_one_at_a_time() {
    let content = body(64 * 1024);
    let server = range_server::start_with_options(content.clone(), slow());
    let dir = tempdir().unwrap();
    let target = dest(&dir, "shared.pdf");
    let manager = start(config(2)).await;

    let first = manager
        .enqueue(EnqueueRequest::new(server.url("first.pdf"), SOURCE, &target))
        .await
        .unwrap();
    let second = manager
        .enqueue(EnqueueRequest::new(server.url("second.pdf"), SOURCE, &target))
        .await
        .unwrap();
    assert_eq!(peak_active(&manager).await, 1);

    for task in [&first, &second] {
        let task = reload(&manager, task).await;
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.attempt_count, 1);
    }
    let requests = server.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].path, "/first.pdf");
    assert!(requests.iter().all(|r| r.header("range").is_none()));
    assert_eq!(std::fs::read(&target).unwrap(), content);
    assert!(!first.partial_path().exists());
}

#[tokio::test]
async fn length_mismatch_discards_partial_and_restarts_from_zero() {
    let content = body(32 * 1024);
    let server = range_server::start_with_options(
        content.clone(),
        RangeServerOptions {
            misreport_total_first: 1,
            ..RangeServerOptions::default()
        },
    );
    let dir = tempdir().unwrap();
    let target = dest(&dir, "short.pdf");
    write_partial(&target, &content[..10_000]);

    let store = TaskStore::open_memory().await.unwrap();
    let mut task = store
        .insert(&EnqueueRequest::new(server.url("short.pdf"), SOURCE, &target))
        .await
        .unwrap();
    task.bytes_downloaded = 10_000;
    task.bytes_total = Some(content.len() as u64);
    task.resume_token = Some("\"v1\"".to_string());
    store.persist(&mut task).await.unwrap();

    let manager = DownloadManager::builder(config(1), store)
        .start_paused(true)
        .start()
        .await
        .unwrap();
    let mut events = manager.subscribe();
    manager.resume_queue().await.unwrap();
    settle(&manager).await;

    let requests = server.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].header("range"), Some("bytes=10000-"));
    assert_eq!(requests[0].header("if-range"), Some("\"v1\""));
    assert_eq!(requests[1].header("range"), None);
    assert_eq!(requests[1].header("if-range"), None);

    let requeued = std::iter::from_fn(|| events.try_recv())
        .find(|e| e.status == TaskStatus::Queued && e.error.is_some())
        .expect("failed attempt was re-queued");
    assert_eq!(requeued.bytes_downloaded, 0);
    assert_eq!(requeued.bytes_total, None);
    assert!(requeued.error.unwrap().contains("integrity mismatch"));

    let task = reload(&manager, &task).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.attempt_count, 2);
    assert_eq!(std::fs::read(&target).unwrap(), content);
}

#[tokio::test]
async fn unwritable_destination_fails_without_retry() {
    let server = range_server::start(body(4 * 1024));
    let dir = tempdir().unwrap();
    // A regular file where the destination directory should be.
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"not a directory").unwrap();
    let manager = start(config(1)).await;

    let task = manager
        .enqueue(EnqueueRequest::new(
            server.url("nowhere.pdf"),
            SOURCE,
            blocker.join("nowhere.pdf"),
        ))
        .await
        .unwrap();
    settle(&manager).await;

    let task = reload(&manager, &task).await;
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.attempt_count, 1);
    assert!(task.last_error.unwrap().starts_with("storage:"));
    assert_eq!(server.request_count(), 1);
}

#[tokio::test]
async fn request_timeout_is_retried() {
    let content = body(8 * 1024);
    let server = range_server::start_with_options(
        content.clone(),
        RangeServerOptions {
            stall_first: Some((1, Duration::from_secs(3))),
            ..RangeServerOptions::default()
        },
    );
    let dir = tempdir().unwrap();
    let mut cfg = config(1);
    cfg.timeout_secs = 1;
    let store = TaskStore::open_memory().await.unwrap();
    let manager = DownloadManager::builder(cfg, store)
        .start_paused(true)
        .start()
        .await
        .unwrap();
    let mut events = manager.subscribe();

    let task = manager
        .enqueue(EnqueueRequest::new(server.url("slow.pdf"), SOURCE, dest(&dir, "slow.pdf")))
        .await
        .unwrap();
    manager.resume_queue().await.unwrap();
    settle(&manager).await;

    assert!(std::iter::from_fn(|| events.try_recv())
        .any(|e| e.status == TaskStatus::Queued && e.error.is_some()));
    let task = reload(&manager, &task).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.attempt_count, 2);
    assert_eq!(task.last_error, None);
    assert_eq!(server.request_count(), 2);
    assert_eq!(std::fs::read(&task.destination_path).unwrap(), content);
}
