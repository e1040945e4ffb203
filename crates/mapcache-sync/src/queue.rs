//! # Job Queue
//!
//! Unbounded priority queue shared by the scheduler (producer) and the
//! workers (consumers), with per-target deduplication.
//!
//! ## Job Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Job Lifecycle                                   │
//! │                                                                         │
//! │   enqueue(job)                                                         │
//! │       │                                                                 │
//! │       ├── target pending or in flight ──► Coalesced (dropped)          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │   PENDING  (heap, ordered by priority then arrival)                    │
//! │       │                                                                 │
//! │       │ try_dequeue / dequeue_timeout                                  │
//! │       ▼                                                                 │
//! │   IN FLIGHT  (held by a JobLease)                                      │
//! │       │                                                                 │
//! │       │ lease dropped (success, failure, or cancellation)              │
//! │       ▼                                                                 │
//! │   DONE  (target may be enqueued again)                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `len()` counts pending jobs only. A job a worker is still running is not
//! counted there; `in_flight()` reports those.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use mapcache_core::{Job, JobPriority, SyncTarget};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

/// Result of an [`JobQueue::enqueue`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// The job was added.
    Queued,
    /// The target was already pending or in flight; nothing was added.
    Coalesced,
}

#[derive(Debug)]
struct Entry {
    priority: JobPriority,
    seq: u64,
    job: Job,
}

// BinaryHeap is a max-heap: the entry that should be served first must
// compare greatest.
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Entry {}

#[derive(Debug, Default)]
struct QueueState {
    heap: BinaryHeap<Entry>,
    pending: HashSet<SyncTarget>,
    in_flight: HashSet<SyncTarget>,
    next_seq: u64,
}

/// Priority job queue with pending and in-flight deduplication.
#[derive(Debug, Default)]
pub struct JobQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a job unless its target is already pending or in flight.
    ///
    /// Never blocks and never fails.
    pub fn enqueue(&self, job: Job) -> Enqueued {
        {
            let mut state = self.lock();
            if state.pending.contains(&job.target) || state.in_flight.contains(&job.target) {
                debug!(job = %job.target, "Job coalesced with an outstanding one");
                return Enqueued::Coalesced;
            }

            let seq = state.next_seq;
            state.next_seq += 1;
            state.pending.insert(job.target.clone());
            state.heap.push(Entry {
                priority: job.priority,
                seq,
                job,
            });
        }

        self.notify.notify_one();
        Enqueued::Queued
    }

    /// Takes the highest-priority job without waiting.
    pub fn try_dequeue(self: &Arc<Self>) -> Option<JobLease> {
        let (job, more) = {
            let mut state = self.lock();
            let entry = state.heap.pop()?;
            state.pending.remove(&entry.job.target);
            state.in_flight.insert(entry.job.target.clone());
            (entry.job, !state.heap.is_empty())
        };

        // Pass the wakeup on so a second idle consumer sees the remainder.
        if more {
            self.notify.notify_one();
        }

        Some(JobLease {
            queue: Arc::clone(self),
            job,
        })
    }

    /// Waits up to `timeout` for a job.
    ///
    /// Returns `None` if the queue stayed empty for the whole window.
    pub async fn dequeue_timeout(self: &Arc<Self>, timeout: Duration) -> Option<JobLease> {
        let deadline = Instant::now() + timeout;

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so an enqueue between the check and
            // the await is not missed.
            notified.as_mut().enable();

            if let Some(lease) = self.try_dequeue() {
                return Some(lease);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_dequeue();
            }
        }
    }

    /// Number of jobs waiting to be dequeued.
    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of jobs dequeued whose lease has not been dropped yet.
    pub fn in_flight(&self) -> usize {
        self.lock().in_flight.len()
    }

    fn release(&self, target: &SyncTarget) {
        self.lock().in_flight.remove(target);
    }
}

// =============================================================================
// Job Lease
// =============================================================================

/// A dequeued job. Dropping it marks the job done.
#[derive(Debug)]
pub struct JobLease {
    queue: Arc<JobQueue>,
    job: Job,
}

impl JobLease {
    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn target(&self) -> &SyncTarget {
        &self.job.target
    }
}

impl Drop for JobLease {
    fn drop(&mut self) {
        self.queue.release(&self.job.target);
    }
}
