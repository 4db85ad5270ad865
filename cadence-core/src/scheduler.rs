use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use tracing::debug;

use crate::kv_cache::PagePool;
use crate::request::RequestId;

/// Default cap on concurrently running requests
pub const DEFAULT_MAX_NUM_SEQS: usize = 32;

/// A request waiting for admission into the running batch
#[derive(Debug)]
struct WaitingRequest {
    id: RequestId,
    priority: i32,
    arrival: u64,
    pages_needed: usize,
}

// Max-heap order: lower priority value first, then earlier arrival
impl Ord for WaitingRequest {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.arrival.cmp(&self.arrival))
    }
}

impl PartialOrd for WaitingRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for WaitingRequest {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for WaitingRequest {}

/// A request holding pages in the running batch
#[derive(Debug)]
struct RunningRequest {
    id: RequestId,
    pages: Vec<usize>,
    is_prefill: bool,
}

/// Request scheduler with continuous batching.
///
/// Waiting requests are admitted in priority order whenever the batch has
/// room and the page pool can cover the request's full reservation. A request
/// that does not fit blocks the ones behind it.
pub struct Scheduler {
    /// Queue of requests waiting to be scheduled
    waiting: BinaryHeap<WaitingRequest>,
    /// Currently running requests, in admission order
    running: Vec<RunningRequest>,
    /// Page pool backing the running batch
    kv_cache: Arc<PagePool>,
    max_num_seqs: usize,
    next_arrival: u64,
}

impl Scheduler {
    pub fn new(kv_cache: Arc<PagePool>, max_num_seqs: usize) -> Self {
        Self {
            waiting: BinaryHeap::new(),
            running: Vec::new(),
            kv_cache,
            max_num_seqs: max_num_seqs.max(1),
            next_arrival: 0,
        }
    }

    /// Add a new request to the waiting queue
    pub fn add_request(&mut self, id: RequestId, priority: i32, pages_needed: usize) {
        debug!("Adding request {} to queue (priority {})", id, priority);
        let arrival = self.next_arrival;
        self.next_arrival += 1;
        self.waiting.push(WaitingRequest {
            id,
            priority,
            arrival,
            pages_needed,
        });
    }

    /// Admit what fits and return the batch to advance this step
    pub fn schedule(&mut self) -> ScheduledBatch {
        while self.running.len() < self.max_num_seqs {
            let Some(next) = self.waiting.peek() else {
                break;
            };
            let Some(pages) = self.kv_cache.allocate_pages(next.pages_needed) else {
                debug!(
                    "Request {} needs {} pages, {} free; holding admission",
                    next.id,
                    next.pages_needed,
                    self.kv_cache.num_free_pages()
                );
                break;
            };
            let Some(admitted) = self.waiting.pop() else {
                break;
            };
            debug!("Admitted request {} with {} pages", admitted.id, pages.len());
            self.running.push(RunningRequest {
                id: admitted.id,
                pages,
                is_prefill: true,
            });
        }

        let mut batch = ScheduledBatch::default();
        for req in self.running.iter_mut() {
            if req.is_prefill {
                batch.num_prefill += 1;
                req.is_prefill = false;
            } else {
                batch.num_decode += 1;
            }
            batch.request_ids.push(req.id.clone());
        }
        batch
    }

    /// Remove a finished request and free its pages
    pub fn finish(&mut self, id: &str) -> bool {
        let Some(pos) = self.running.iter().position(|req| req.id == id) else {
            return false;
        };
        let req = self.running.remove(pos);
        self.kv_cache.free_pages(&req.pages);
        debug!("Request {} finished, freed {} pages", req.id, req.pages.len());
        true
    }

    /// Whether there is nothing waiting or running
    pub fn is_idle(&self) -> bool {
        self.waiting.is_empty() && self.running.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.running.iter().any(|req| req.id == id) || self.waiting.iter().any(|req| req.id == id)
    }

    /// Get statistics
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            pending_requests: self.waiting.len(),
            running_requests: self.running.len(),
        }
    }
}

/// Requests advanced in one step, in running order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduledBatch {
    pub request_ids: Vec<RequestId>,
    /// Requests admitted this step
    pub num_prefill: usize,
    pub num_decode: usize,
}

impl ScheduledBatch {
    pub fn is_empty(&self) -> bool {
        self.request_ids.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub pending_requests: usize,
    pub running_requests: usize,
}
