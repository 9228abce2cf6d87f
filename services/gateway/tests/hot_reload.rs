//! Hot reload: a code change under a watched directory recycles every worker.

use gateway::classify::SlowPolicy;
use gateway::supervisor::Supervisor;
use gateway::worker::WorkerConfig;
use std::sync::Arc;
use std::time::Duration;

fn supervisor() -> Arc<Supervisor> {
    let worker_cfg = WorkerConfig {
        command: env!("CARGO_BIN_EXE_worker-stub").to_owned(),
        entrypoint: "worker.php".to_owned(),
        marker: "composer.json".to_owned(),
        project_root: std::env::temp_dir(),
        max_requests: 100,
        request_timeout: Duration::from_secs(5),
    };
    Arc::new(Supervisor::new(worker_cfg, 2, 2, SlowPolicy::default()))
}

fn all_dead(supervisor: &Supervisor) -> bool {
    let health = supervisor.health();
    health.fast.dead == health.fast.total && health.slow.dead == health.slow.total
}

#[tokio::test]
async fn file_creation_under_watch_marks_every_worker_dead() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = supervisor();
    let _watcher = supervisor
        .enable_hot_reload(&[dir.path().to_path_buf()])
        .unwrap();
    assert!(!all_dead(&supervisor));

    // Let the watch arm before touching the tree.
    tokio::time::sleep(Duration::from_millis(200)).await;
    std::fs::write(dir.path().join("index.php"), "<?php ?>").unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !all_dead(&supervisor) && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert!(
        all_dead(&supervisor),
        "every worker in both pools must be flagged within the bounded wait"
    );
}

#[tokio::test]
async fn missing_watch_roots_never_prevent_startup() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = supervisor();
    let watcher = supervisor
        .enable_hot_reload(&[
            dir.path().join("does-not-exist"),
            dir.path().to_path_buf(),
        ])
        .expect("a missing watch root is skipped, not fatal");
    assert_eq!(watcher.watched(), 1);
}

#[tokio::test]
async fn dropped_supervisor_leaves_only_the_weak_action() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = supervisor();
    let watcher = supervisor
        .enable_hot_reload(&[dir.path().to_path_buf()])
        .unwrap();

    // The watcher must not keep the supervisor alive.
    let weak = Arc::downgrade(&supervisor);
    drop(supervisor);
    assert!(
        weak.upgrade().is_none(),
        "the watcher holds an action closure, never the supervisor"
    );
    drop(watcher);
}
