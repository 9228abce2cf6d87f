//! The two-pool dispatcher: fast pool, slow pool, classifier, recycling.
//!
//! Every request is classified and handed to one pool; the pools own the
//! workers.  The classifier (policy + route latency table) sits behind a
//! single lock so promotion writes serialize with classification reads.
//! The hot-reload watcher gets an action-only closure over a weak reference
//! — it can mass-mark workers dead but never keeps the supervisor alive.

use crate::classify::{Classify, SlowPolicy};
use crate::pool::{Pool, PoolStats};
use crate::reload::{ReloadError, ReloadWatcher};
use crate::worker::{StreamEvent, WorkerConfig, WorkerError};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tracing::info;
use wg_protocol::{WorkerRequest, WorkerResponse};

/// Health of both pools, as reported by the status surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthSummary {
    pub fast: PoolStats,
    pub slow: PoolStats,
}

pub struct Supervisor {
    fast: Pool,
    slow: Pool,
    classify: Mutex<Classify>,
}

impl Supervisor {
    pub fn new(
        worker_cfg: WorkerConfig,
        fast_size: usize,
        slow_size: usize,
        policy: SlowPolicy,
    ) -> Self {
        let worker_cfg = Arc::new(worker_cfg);
        Supervisor {
            fast: Pool::new(fast_size, worker_cfg.clone()),
            slow: Pool::new(slow_size, worker_cfg),
            classify: Mutex::new(Classify::new(policy)),
        }
    }

    /// Buffered dispatch: classify, pick a pool, hand off to a worker.
    pub async fn dispatch(
        &self,
        mut request: WorkerRequest,
    ) -> Result<WorkerResponse, WorkerError> {
        ensure_request_id(&mut request);
        let pool = self.pool_for(&request).await;
        pool.dispatch(&request).await
    }

    /// Streaming dispatch: same pool selection, then the worker's stream
    /// exchange feeds `events`.
    pub async fn dispatch_stream(
        &self,
        mut request: WorkerRequest,
        events: &mpsc::Sender<StreamEvent>,
    ) -> Result<(), WorkerError> {
        ensure_request_id(&mut request);
        let pool = self.pool_for(&request).await;
        pool.next_worker().stream(&request, events).await
    }

    /// Feed one observed latency into the adaptive classifier.
    pub async fn record_latency(&self, path: &str, latency: Duration) {
        self.classify.lock().await.record(path, latency);
    }

    /// Current classification of a request; exposed for the status surface
    /// and tests.
    pub async fn is_slow(&self, request: &WorkerRequest) -> bool {
        self.classify.lock().await.is_slow(request)
    }

    pub fn health(&self) -> HealthSummary {
        HealthSummary {
            fast: self.fast.stats(),
            slow: self.slow.stats(),
        }
    }

    /// Flag every worker in both pools; each respawns on its next request.
    pub fn force_recycle(&self) {
        self.fast.mark_all_dead();
        self.slow.mark_all_dead();
        info!("all workers flagged for recycle");
    }

    /// Start watching `dirs` for code changes; any qualifying event recycles
    /// every worker.  The watcher holds only a weak, action-only reference.
    pub fn enable_hot_reload(
        self: &Arc<Self>,
        dirs: &[PathBuf],
    ) -> Result<ReloadWatcher, ReloadError> {
        let supervisor = Arc::downgrade(self);
        ReloadWatcher::start(dirs, move || {
            if let Some(supervisor) = supervisor.upgrade() {
                supervisor.force_recycle();
            }
        })
    }

    async fn pool_for(&self, request: &WorkerRequest) -> &Pool {
        if self.classify.lock().await.is_slow(request) {
            &self.slow
        } else {
            &self.fast
        }
    }
}

fn ensure_request_id(request: &mut WorkerRequest) {
    if request.id.is_empty() {
        request.id = uuid::Uuid::new_v4().to_string();
    }
}
