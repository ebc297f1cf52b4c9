//! Simulated worker state.
//!
//! Counters are atomics so completion signals can decrement a worker without
//! taking the router's cache lock.

use prefixsim_algorithms::{WorkerId, WorkerSnapshot};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// How queue depth feeds the load score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadScoreConfig {
    pub queue_depth_weight: f64,
}

impl Default for LoadScoreConfig {
    fn default() -> Self {
        Self {
            queue_depth_weight: 0.5,
        }
    }
}

#[derive(Debug, Default)]
struct WorkerState {
    active_requests: AtomicU32,
    queue_depth: AtomicU32,
    total_routed: AtomicU64,
    completed: AtomicU64,
}

/// Counters for one worker at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorkerCounters {
    pub id: WorkerId,
    pub active_requests: u32,
    pub queue_depth: u32,
    pub total_routed: u64,
    pub completed: u64,
    pub load_score: f64,
}

/// Fixed set of workers, numbered `0..len`.
#[derive(Debug)]
pub struct WorkerRegistry {
    workers: Vec<WorkerState>,
    config: LoadScoreConfig,
}

impl WorkerRegistry {
    pub fn new(count: usize, config: LoadScoreConfig) -> Self {
        Self {
            workers: (0..count).map(|_| WorkerState::default()).collect(),
            config,
        }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn contains(&self, id: WorkerId) -> bool {
        (id as usize) < self.workers.len()
    }

    fn get(&self, id: WorkerId) -> Option<&WorkerState> {
        self.workers.get(id as usize)
    }

    pub fn active_requests(&self, id: WorkerId) -> Option<u32> {
        self.get(id)
            .map(|w| w.active_requests.load(Ordering::Acquire))
    }

    /// Count a newly routed request. Returns false for an unknown worker.
    pub fn increment(&self, id: WorkerId) -> bool {
        let Some(worker) = self.get(id) else {
            return false;
        };
        worker.active_requests.fetch_add(1, Ordering::AcqRel);
        worker.total_routed.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Count a completed request. Saturates at zero; returns false for an
    /// unknown worker.
    pub fn decrement(&self, id: WorkerId) -> bool {
        let Some(worker) = self.get(id) else {
            return false;
        };
        let previous = worker
            .active_requests
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if previous.is_ok() {
            worker.completed.fetch_add(1, Ordering::Relaxed);
        }
        true
    }

    pub fn set_queue_depth(&self, id: WorkerId, depth: u32) -> bool {
        let Some(worker) = self.get(id) else {
            return false;
        };
        worker.queue_depth.store(depth, Ordering::Release);
        true
    }

    /// `active_requests + queue_depth_weight * queue_depth`, computed on demand.
    pub fn load_score(&self, id: WorkerId) -> Option<f64> {
        self.get(id).map(|w| self.score(w))
    }

    fn score(&self, worker: &WorkerState) -> f64 {
        worker.active_requests.load(Ordering::Acquire) as f64
            + self.config.queue_depth_weight * worker.queue_depth.load(Ordering::Acquire) as f64
    }

    pub fn counters(&self) -> Vec<WorkerCounters> {
        self.workers
            .iter()
            .enumerate()
            .map(|(i, w)| WorkerCounters {
                id: i as WorkerId,
                active_requests: w.active_requests.load(Ordering::Acquire),
                queue_depth: w.queue_depth.load(Ordering::Acquire),
                total_routed: w.total_routed.load(Ordering::Relaxed),
                completed: w.completed.load(Ordering::Relaxed),
                load_score: self.score(w),
            })
            .collect()
    }

    /// Algorithm-facing snapshots; cache fields are left for the caller.
    pub fn snapshot(&self) -> Vec<WorkerSnapshot> {
        self.counters()
            .into_iter()
            .map(|c| WorkerSnapshot {
                id: c.id,
                active_requests: c.active_requests,
                queue_depth: c.queue_depth,
                load_score: c.load_score,
                cached_blocks: 0,
                capacity_blocks: 0,
                overlap_blocks: 0,
            })
            .collect()
    }

    /// Zero every counter between benchmark runs.
    pub fn reset(&self) {
        for worker in &self.workers {
            worker.active_requests.store(0, Ordering::Release);
            worker.queue_depth.store(0, Ordering::Release);
            worker.total_routed.store(0, Ordering::Relaxed);
            worker.completed.store(0, Ordering::Relaxed);
        }
    }
}
