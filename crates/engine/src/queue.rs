//! Processing queue with per-correlation FIFO ordering.
//!
//! Jobs sharing a correlation id never run concurrently and run in enqueue
//! order; jobs of distinct correlations are handed to the worker pool
//! freely. A correlation has at most one job in ready-or-running state;
//! its remaining jobs wait in a per-correlation backlog until the active
//! job completes.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use serde_json::{Map, Value};
use tokio::sync::{Notify, Semaphore};

use reflex_core::{Event, Fact, FactChangeKind, Timer};

/// What a processing job carries.
#[derive(Debug, Clone)]
pub enum JobPayload {
    /// A produced or forwarded event.
    Event(Event),
    /// A committed fact change.
    FactChange { fact: Fact, kind: FactChangeKind },
    /// Expiry of a named timer.
    TimerFired(Timer),
    /// A temporal pattern match with its alias bindings.
    TemporalMatch {
        rule_id: String,
        event: Event,
        bindings: Map<String, Value>,
    },
}

/// One unit of work for the worker pool.
#[derive(Debug, Clone)]
pub struct Job {
    pub payload: JobPayload,
    pub correlation_id: String,
    pub chain_depth: u32,
}

struct Inner {
    ready: VecDeque<Job>,
    /// Correlations with a job in ready-or-running state.
    active: HashSet<String>,
    /// Backlogged jobs per active correlation, in enqueue order.
    blocked: HashMap<String, VecDeque<Job>>,
    /// Queued plus running jobs.
    pending: usize,
    closed: bool,
}

pub struct JobQueue {
    inner: Mutex<Inner>,
    ready_permits: Semaphore,
    idle: Notify,
}

impl JobQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                ready: VecDeque::new(),
                active: HashSet::new(),
                blocked: HashMap::new(),
                pending: 0,
                closed: false,
            }),
            ready_permits: Semaphore::new(0),
            idle: Notify::new(),
        }
    }

    /// Enqueue a job. Returns `false` when the queue is closed.
    pub fn push(&self, job: Job) -> bool {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        if inner.closed {
            return false;
        }
        inner.pending += 1;
        let cid = job.correlation_id.clone();
        if inner.active.contains(&cid) {
            inner.blocked.entry(cid).or_default().push_back(job);
        } else {
            inner.active.insert(cid);
            inner.ready.push_back(job);
            self.ready_permits.add_permits(1);
        }
        true
    }

    /// Take the next ready job. Returns `None` once the queue is shut down.
    pub async fn pop(&self) -> Option<Job> {
        let permit = self.ready_permits.acquire().await.ok()?;
        permit.forget();
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        inner.ready.pop_front()
    }

    /// Mark a popped job finished. Releases the correlation's next
    /// backlogged job, if any. Returns `true` when the correlation has no
    /// further queued or running work.
    pub fn complete(&self, correlation_id: &str) -> bool {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        inner.pending -= 1;

        let mut drained = false;
        match inner.blocked.get_mut(correlation_id) {
            Some(backlog) => {
                let next = backlog.pop_front().expect("non-empty backlog");
                if backlog.is_empty() {
                    inner.blocked.remove(correlation_id);
                }
                inner.ready.push_back(next);
                self.ready_permits.add_permits(1);
            }
            None => {
                inner.active.remove(correlation_id);
                drained = true;
            }
        }

        if inner.pending == 0 {
            self.idle.notify_waiters();
        }
        drained
    }

    /// Queued plus running jobs.
    pub fn pending(&self) -> usize {
        self.inner.lock().expect("queue lock poisoned").pending
    }

    /// Resolve once the queue is empty and no worker is executing.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Stop accepting new jobs; already-queued jobs still drain.
    pub fn close(&self) {
        self.inner.lock().expect("queue lock poisoned").closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().expect("queue lock poisoned").closed
    }

    /// Wake all workers to exit. Queued jobs are discarded.
    pub fn shutdown(&self) {
        self.close();
        self.ready_permits.close();
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map as JsonMap;
    use std::sync::Arc;

    fn job(cid: &str, topic: &str) -> Job {
        Job {
            payload: JobPayload::Event(Event::new(topic, JsonMap::new(), "test")),
            correlation_id: cid.to_string(),
            chain_depth: 0,
        }
    }

    fn topic_of(job: &Job) -> String {
        match &job.payload {
            JobPayload::Event(e) => e.topic.clone(),
            _ => panic!("expected event payload"),
        }
    }

    #[tokio::test]
    async fn fifo_within_correlation() {
        let queue = JobQueue::new();
        queue.push(job("c1", "a"));
        queue.push(job("c1", "b"));
        queue.push(job("c1", "c"));

        let mut seen = Vec::new();
        for _ in 0..3 {
            let j = queue.pop().await.unwrap();
            seen.push(topic_of(&j));
            queue.complete(&j.correlation_id);
        }
        assert_eq!(seen, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn same_correlation_never_concurrent() {
        let queue = JobQueue::new();
        queue.push(job("c1", "a"));
        queue.push(job("c1", "b"));

        let first = queue.pop().await.unwrap();
        // The second job must not be handed out while the first runs.
        assert_eq!(queue.pending(), 2);
        let second_attempt =
            tokio::time::timeout(std::time::Duration::from_millis(50), queue.pop()).await;
        assert!(second_attempt.is_err(), "second job must wait for the first");

        queue.complete(&first.correlation_id);
        let second = queue.pop().await.unwrap();
        assert_eq!(topic_of(&second), "b");
        queue.complete(&second.correlation_id);
    }

    #[tokio::test]
    async fn distinct_correlations_run_freely() {
        let queue = JobQueue::new();
        queue.push(job("c1", "a"));
        queue.push(job("c2", "b"));

        let first = queue.pop().await.unwrap();
        let second = queue.pop().await.unwrap();
        assert_ne!(first.correlation_id, second.correlation_id);
        queue.complete(&first.correlation_id);
        queue.complete(&second.correlation_id);
    }

    #[tokio::test]
    async fn complete_reports_correlation_drained() {
        let queue = JobQueue::new();
        queue.push(job("c1", "a"));
        queue.push(job("c1", "b"));

        let a = queue.pop().await.unwrap();
        assert!(!queue.complete(&a.correlation_id), "backlog remains");
        let b = queue.pop().await.unwrap();
        assert!(queue.complete(&b.correlation_id), "correlation drained");
    }

    #[tokio::test]
    async fn wait_idle_resolves_after_drain() {
        let queue = Arc::new(JobQueue::new());
        queue.push(job("c1", "a"));

        let q = Arc::clone(&queue);
        let worker = tokio::spawn(async move {
            let j = q.pop().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            q.complete(&j.correlation_id);
        });

        queue.wait_idle().await;
        assert_eq!(queue.pending(), 0);
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn wait_idle_on_empty_queue_is_immediate() {
        let queue = JobQueue::new();
        queue.wait_idle().await;
    }

    #[tokio::test]
    async fn closed_queue_rejects_pushes() {
        let queue = JobQueue::new();
        queue.close();
        assert!(!queue.push(job("c1", "a")));
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn shutdown_wakes_poppers_with_none() {
        let queue = Arc::new(JobQueue::new());
        let q = Arc::clone(&queue);
        let popper = tokio::spawn(async move { q.pop().await });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        queue.shutdown();
        assert!(popper.await.unwrap().is_none());
    }
}
