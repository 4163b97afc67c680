//! Delay queue for time-deferred commands
//!
//! Backs transient-retry backoff and periodic polling: a min-heap keyed by
//! ready time, drained by a single loop that only re-submits expired items
//! to the main scheduler — it never executes business logic itself. Items
//! sharing a logical key coalesce; re-submitting a pending retry is a no-op.

use crate::command::Command;
use crate::scheduler::CommandScheduler;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Re-queue delay applied when the main scheduler rejects an expired item
const REQUEUE_BACKOFF: Duration = Duration::from_secs(1);

struct DelayedEntry {
    ready_at: Instant,
    seq: u64,
    cmd: Command,
}

impl PartialEq for DelayedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at && self.seq == other.seq
    }
}

impl Eq for DelayedEntry {}

impl PartialOrd for DelayedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ready_at
            .cmp(&other.ready_at)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

#[derive(Default)]
struct DelayState {
    heap: BinaryHeap<Reverse<DelayedEntry>>,
    keys: HashSet<String>,
    seq: u64,
}

struct DelayInner {
    state: Mutex<DelayState>,
    notify: Notify,
}

/// Min-heap of commands that must not run before a deadline
#[derive(Clone)]
pub struct DelayQueue {
    inner: Arc<DelayInner>,
}

impl Default for DelayQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl DelayQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DelayInner {
                state: Mutex::new(DelayState::default()),
                notify: Notify::new(),
            }),
        }
    }

    /// Schedule a command to become ready after `delay`
    ///
    /// Returns false when an item with the same key is already waiting.
    pub fn push(&self, cmd: Command, delay: Duration) -> bool {
        let ready_at = Instant::now() + delay;
        {
            let mut state = self.inner.state.lock().unwrap();
            if state.keys.contains(&cmd.key) {
                return false;
            }
            state.seq += 1;
            let seq = state.seq;
            state.keys.insert(cmd.key.clone());
            state.heap.push(Reverse(DelayedEntry { ready_at, seq, cmd }));
        }
        self.inner.notify.notify_one();
        true
    }

    /// Earliest deadline currently waiting
    fn next_ready_at(&self) -> Option<Instant> {
        let state = self.inner.state.lock().unwrap();
        state.heap.peek().map(|Reverse(e)| e.ready_at)
    }

    /// Pop every item whose deadline has passed
    fn pop_ready(&self) -> Vec<Command> {
        let now = Instant::now();
        let mut state = self.inner.state.lock().unwrap();
        let mut ready = Vec::new();
        while let Some(Reverse(entry)) = state.heap.peek() {
            if entry.ready_at > now {
                break;
            }
            let Reverse(entry) = state.heap.pop().unwrap();
            state.keys.remove(&entry.cmd.key);
            ready.push(entry.cmd);
        }
        ready
    }

    /// Number of waiting items
    pub fn len(&self) -> usize {
        self.inner.state.lock().unwrap().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain loop: re-submit expired items to the main scheduler
    ///
    /// Runs until the token is cancelled. Rejected submissions go back on
    /// the heap with a short backoff.
    pub async fn run_drain(self, scheduler: CommandScheduler, token: CancellationToken) {
        loop {
            let deadline = self.next_ready_at();
            tokio::select! {
                _ = token.cancelled() => break,
                _ = self.inner.notify.notified() => {
                    // New item; re-evaluate the earliest deadline
                }
                _ = async {
                    match deadline {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    for cmd in self.pop_ready() {
                        let key = cmd.key.clone();
                        match scheduler.queue_or_return(cmd) {
                            Ok(true) => debug!(key = %key, "delayed command re-submitted"),
                            Ok(false) => debug!(key = %key, "delayed command coalesced"),
                            Err(cmd) => {
                                warn!(key = %key, "scheduler full, re-delaying command");
                                self.push(cmd, REQUEUE_BACKOFF);
                            }
                        }
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for DelayQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelayQueue").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caddis_model::ActionId;

    fn id(name: &str) -> ActionId {
        ActionId::new("job-1", name)
    }

    #[tokio::test]
    async fn test_push_and_pop_ready() {
        let queue = DelayQueue::new();
        assert!(queue.push(Command::check(&id("a")), Duration::ZERO));
        assert!(queue.push(Command::check(&id("b")), Duration::from_secs(60)));

        tokio::time::sleep(Duration::from_millis(5)).await;
        let ready = queue.pop_ready();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].key, "check-job-1@a");
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_key_coalescing() {
        let queue = DelayQueue::new();
        assert!(queue.push(Command::start(&id("a")), Duration::from_secs(5)));
        assert!(!queue.push(Command::start(&id("a")), Duration::from_secs(1)));
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_ordering_by_deadline() {
        tokio::time::pause();
        let queue = DelayQueue::new();
        queue.push(Command::check(&id("later")), Duration::from_secs(30));
        queue.push(Command::check(&id("sooner")), Duration::from_secs(10));

        tokio::time::advance(Duration::from_secs(11)).await;
        let ready = queue.pop_ready();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].key, "check-job-1@sooner");

        tokio::time::advance(Duration::from_secs(30)).await;
        let ready = queue.pop_ready();
        assert_eq!(ready[0].key, "check-job-1@later");
    }

    #[tokio::test]
    async fn test_drain_resubmits_to_scheduler() {
        let queue = DelayQueue::new();
        let scheduler = CommandScheduler::new(10);
        let token = CancellationToken::new();

        let drain = tokio::spawn(
            queue
                .clone()
                .run_drain(scheduler.clone(), token.clone()),
        );

        queue.push(Command::check(&id("a")), Duration::from_millis(20));
        assert!(scheduler.is_empty());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(scheduler.len(), 1);
        assert!(queue.is_empty());

        token.cancel();
        drain.await.unwrap();
    }
}
