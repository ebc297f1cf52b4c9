//! Discrete-event replay engine.
//!
//! The engine maintains a priority queue of [`ReplayEvent`]s sorted by
//! timestamp. Each iteration pops the next event, advances the shared
//! virtual clock, and either routes an arrival through the [`SmartRouter`]
//! or delivers a completion signal. Because the cache manager reads the
//! same clock, block timestamps (and so TTL expiry) follow trace time.

use crate::clock::{Clock, SimClock};
use crate::config::{ConfigError, SimConfig};
use crate::metrics::BenchmarkReport;
use crate::request::TokenizedRequest;
use crate::router::SmartRouter;
use prefixsim_algorithms::{RoutingAlgorithm, WorkerId};
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Events in the replay.
#[derive(Debug, Clone)]
pub enum ReplayEvent {
    /// A request arrives at the router.
    Arrival(TokenizedRequest),
    /// A request's hold time elapsed; its worker is released.
    Complete { request_id: u64, worker_id: WorkerId },
}

impl ReplayEvent {
    /// Completions sort before arrivals at the same instant so a freed
    /// worker is visible to the next routing decision.
    fn rank(&self) -> u8 {
        match self {
            ReplayEvent::Complete { .. } => 0,
            ReplayEvent::Arrival(_) => 1,
        }
    }
}

/// A timestamped event for the priority queue.
#[derive(Debug, Clone)]
struct TimedEvent {
    time_ms: u64,
    rank: u8,
    sequence: u64,
    event: ReplayEvent,
}

impl PartialEq for TimedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.time_ms == other.time_ms && self.rank == other.rank && self.sequence == other.sequence
    }
}

impl Eq for TimedEvent {}

impl PartialOrd for TimedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimedEvent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap is a max-heap; we want min-heap
        other
            .time_ms
            .cmp(&self.time_ms)
            .then(other.rank.cmp(&self.rank))
            .then(other.sequence.cmp(&self.sequence))
    }
}

/// Replays a trace against a smart router.
pub struct ReplayEngine {
    /// Virtual clock shared with the router's cache manager.
    pub clock: Arc<SimClock>,
    router: SmartRouter,
    /// Event queue (min-heap by time).
    event_queue: BinaryHeap<TimedEvent>,
    /// Sequence counter for tie-breaking.
    sequence: u64,
    /// Requests in flight (request_id -> worker_id).
    in_flight: HashMap<u64, WorkerId>,
    first_arrival_ms: Option<u64>,
    routed: u64,
    completed: u64,
    failed: u64,
    /// Total events processed.
    pub events_processed: u64,
}

impl ReplayEngine {
    /// Wrap an existing router. `clock` must be the clock the router was built with.
    pub fn new(router: SmartRouter, clock: Arc<SimClock>) -> Self {
        Self {
            clock,
            router,
            event_queue: BinaryHeap::new(),
            sequence: 0,
            in_flight: HashMap::new(),
            first_arrival_ms: None,
            routed: 0,
            completed: 0,
            failed: 0,
            events_processed: 0,
        }
    }

    /// Build a router from `config` around `algorithm`, on a fresh virtual clock.
    pub fn from_config(
        config: &SimConfig,
        algorithm: Box<dyn RoutingAlgorithm>,
    ) -> Result<Self, ConfigError> {
        let clock = Arc::new(SimClock::new());
        let router = SmartRouter::with_algorithm(
            config.cluster.num_workers as usize,
            config.router_config()?,
            algorithm,
            clock.clone(),
        );
        Ok(Self::new(router, clock))
    }

    pub fn router(&self) -> &SmartRouter {
        &self.router
    }

    /// Schedule an event at a given time.
    pub fn schedule_event(&mut self, time_ms: u64, event: ReplayEvent) {
        self.event_queue.push(TimedEvent {
            time_ms,
            rank: event.rank(),
            sequence: self.sequence,
            event,
        });
        self.sequence += 1;
    }

    /// Load a trace (list of requests) into the event queue.
    pub fn load_trace(&mut self, requests: Vec<TokenizedRequest>) {
        for req in requests {
            let arrival = req.arrival_time_ms;
            self.schedule_event(arrival, ReplayEvent::Arrival(req));
        }
    }

    /// Run until the event queue is empty and report.
    pub fn run(&mut self) -> BenchmarkReport {
        while let Some(timed_event) = self.event_queue.pop() {
            self.clock.advance_to_ms(timed_event.time_ms);
            self.process_event(timed_event.event);
            self.events_processed += 1;
        }

        let report = self.report();
        info!(
            algorithm = %report.algorithm,
            routed = report.requests_routed,
            failed = report.requests_failed,
            window_hit_rate = report.metrics.window_hit_rate,
            "replay finished"
        );
        report
    }

    fn process_event(&mut self, event: ReplayEvent) {
        match event {
            ReplayEvent::Arrival(request) => self.handle_arrival(request),
            ReplayEvent::Complete {
                request_id,
                worker_id,
            } => self.handle_complete(request_id, worker_id),
        }
    }

    fn handle_arrival(&mut self, request: TokenizedRequest) {
        self.first_arrival_ms.get_or_insert(request.arrival_time_ms);

        let decision = match self.router.route_labeled(
            &request.tokens,
            request.id,
            request.endpoint.as_deref(),
        ) {
            Ok(decision) => decision,
            Err(e) => {
                warn!(request_id = request.id, error = %e, "request not routed");
                self.failed += 1;
                return;
            }
        };

        self.routed += 1;
        self.in_flight.insert(request.id, decision.worker_id);
        let done_at = self.clock.now_ms().saturating_add(request.hold_ms);
        self.schedule_event(
            done_at,
            ReplayEvent::Complete {
                request_id: request.id,
                worker_id: decision.worker_id,
            },
        );
    }

    fn handle_complete(&mut self, request_id: u64, worker_id: WorkerId) {
        if self.in_flight.remove(&request_id).is_none() {
            debug!(request_id, "completion for request not in flight");
        }
        match self.router.complete(worker_id) {
            Ok(()) => self.completed += 1,
            Err(e) => warn!(request_id, error = %e, "completion failed"),
        }
    }

    /// Number of events still queued.
    pub fn pending_events(&self) -> usize {
        self.event_queue.len()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn report(&self) -> BenchmarkReport {
        let duration_ms = self
            .first_arrival_ms
            .map(|first| self.clock.now_ms().saturating_sub(first))
            .unwrap_or(0);

        BenchmarkReport {
            algorithm: self.router.algorithm_name(),
            eviction_policy: self.router.config().cache.eviction.name().to_string(),
            requests_routed: self.routed,
            requests_completed: self.completed,
            requests_failed: self.failed,
            duration_ms,
            metrics: self.router.metrics(),
            cache: self.router.stats(),
            workers: self.router.worker_stats(),
            custom_metrics: self.router.custom_metrics(),
        }
    }
}
