//! Fixed-size worker pool with round-robin selection.
//!
//! The pool never grows or shrinks after construction.  Selection is a bare
//! atomic counter — every worker serializes its own requests, and the
//! fast/slow split upstream is the real load-shedding mechanism, so
//! queue-depth-aware routing would buy nothing here.

use crate::worker::{Worker, WorkerConfig, WorkerError};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use wg_protocol::{WorkerRequest, WorkerResponse};

/// Aggregated health of one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub total: usize,
    pub dead: usize,
}

pub struct Pool {
    workers: Vec<Arc<Worker>>,
    cursor: AtomicUsize,
}

impl Pool {
    pub fn new(size: usize, cfg: Arc<WorkerConfig>) -> Self {
        let workers = (0..size).map(|_| Arc::new(Worker::new(cfg.clone()))).collect();
        Pool {
            workers,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Round-robin selection; shared by buffered and streaming dispatch.
    pub fn next_worker(&self) -> Arc<Worker> {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        self.workers[index].clone()
    }

    pub async fn dispatch(&self, request: &WorkerRequest) -> Result<WorkerResponse, WorkerError> {
        self.next_worker().handle(request).await
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            total: self.workers.len(),
            dead: self.workers.iter().filter(|w| w.is_dead()).count(),
        }
    }

    pub fn mark_all_dead(&self) {
        for worker in &self.workers {
            worker.mark_dead();
        }
    }
}
