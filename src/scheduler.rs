//! Competition-aware scheduler
//!
//! Orders pending acquires by priority, then enqueue order, and hands freed
//! connections directly to the next live waiter. The queue is only ever
//! touched under the pool lock, so a hand-off can never race an acquire
//! timeout.

use crate::connection::ConnectionWrapper;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// Scheduler stats view for diagnostics and the pool's waiting gauge
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    pub pending_requests: usize,
    pub total_requests_served: u64,
    pub average_wait_time_ms: f64,
}

pub(crate) struct Waiter {
    pub id: u64,
    pub priority: u8,
    pub enqueued_at: Instant,
    pub deadline: Instant,
    tx: oneshot::Sender<Arc<ConnectionWrapper>>,
}

/// Priority queue of pending acquires. Higher priority first; within one
/// priority, strict FIFO by enqueue order.
pub(crate) struct WaiterQueue {
    entries: Vec<Waiter>,
    next_id: u64,
    served: u64,
    total_wait: Duration,
}

impl WaiterQueue {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 0,
            served: 0,
            total_wait: Duration::ZERO,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Enqueue a waiter, keeping the queue sorted on (priority desc, enqueue
    /// order asc). Returns the waiter id used for timeout removal.
    pub fn enqueue(
        &mut self,
        priority: u8,
        deadline: Instant,
        tx: oneshot::Sender<Arc<ConnectionWrapper>>,
    ) -> u64 {
        let id = self.next_id;
        self.next_id += 1;

        let waiter = Waiter {
            id,
            priority,
            enqueued_at: Instant::now(),
            deadline,
            tx,
        };

        // Existing entries of the same priority all have earlier enqueue
        // order, so inserting after them preserves FIFO within a level.
        let at = self.entries.partition_point(|w| w.priority >= priority);
        self.entries.insert(at, waiter);
        id
    }

    /// Remove a waiter by id. Returns false if it was already handed a
    /// connection (or never existed).
    pub fn remove(&mut self, id: u64) -> bool {
        match self.entries.iter().position(|w| w.id == id) {
            Some(at) => {
                self.entries.remove(at);
                true
            }
            None => false,
        }
    }

    /// Hand a freed connection to the next live waiter. Cancelled and
    /// expired entries are discarded along the way. Returns the connection
    /// back if no live waiter is left.
    pub fn assign(
        &mut self,
        wrapper: Arc<ConnectionWrapper>,
    ) -> std::result::Result<(), Arc<ConnectionWrapper>> {
        let mut wrapper = wrapper;
        let now = Instant::now();

        while !self.entries.is_empty() {
            let waiter = self.entries.remove(0);

            if now >= waiter.deadline {
                tracing::debug!(waiter = waiter.id, "discarding expired waiter");
                continue;
            }

            match waiter.tx.send(wrapper) {
                Ok(()) => {
                    self.served += 1;
                    self.total_wait += waiter.enqueued_at.elapsed();
                    return Ok(());
                }
                // Receiver dropped: the acquire was cancelled.
                Err(returned) => {
                    tracing::debug!(waiter = waiter.id, "discarding cancelled waiter");
                    wrapper = returned;
                }
            }
        }

        Err(wrapper)
    }

    /// Drop every pending waiter. Their receivers observe a closed channel.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> SchedulerStats {
        let average_wait_time_ms = if self.served > 0 {
            self.total_wait.as_secs_f64() * 1000.0 / self.served as f64
        } else {
            0.0
        };

        SchedulerStats {
            pending_requests: self.entries.len(),
            total_requests_served: self.served,
            average_wait_time_ms,
        }
    }
}
