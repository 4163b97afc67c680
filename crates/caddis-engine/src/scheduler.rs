//! Priority command queue
//!
//! A bounded queue of ready commands ordered by (priority desc, FIFO).
//! Enqueue is non-blocking: callers must tolerate `QueueFull` — the
//! triggering event source is responsible for re-raising. Commands sharing
//! a logical key coalesce; re-submitting queued work is a no-op.
//!
//! The queue itself executes nothing. The engine spawns a fixed pool of
//! workers that drain it through `next()`.

use crate::command::Command;
use crate::error::{EngineError, Result};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

struct QueuedCommand {
    priority: u8,
    seq: u64,
    cmd: Command,
}

impl PartialEq for QueuedCommand {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedCommand {}

impl PartialOrd for QueuedCommand {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedCommand {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: highest priority first, then FIFO by sequence
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<QueuedCommand>,
    keys: HashSet<String>,
}

struct SchedulerInner {
    capacity: usize,
    state: Mutex<QueueState>,
    notify: Notify,
    seq: AtomicU64,
}

/// Bounded, priority- and key-aware command queue
#[derive(Clone)]
pub struct CommandScheduler {
    inner: Arc<SchedulerInner>,
}

impl CommandScheduler {
    /// Create a queue holding at most `capacity` ready commands
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                capacity,
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
                seq: AtomicU64::new(0),
            }),
        }
    }

    /// Enqueue a command
    ///
    /// Returns `Ok(false)` when a command with the same key is already
    /// queued (coalesced) and `Err(QueueFull)` at capacity.
    pub fn queue(&self, cmd: Command) -> Result<bool> {
        self.queue_or_return(cmd).map_err(|_| EngineError::QueueFull)
    }

    /// Enqueue, handing the command back when the queue is full so the
    /// caller can re-delay it instead of dropping it
    pub fn queue_or_return(&self, cmd: Command) -> std::result::Result<bool, Command> {
        {
            let mut state = self.inner.state.lock().unwrap();
            if state.keys.contains(&cmd.key) {
                return Ok(false);
            }
            if state.heap.len() >= self.inner.capacity {
                return Err(cmd);
            }
            let seq = self.inner.seq.fetch_add(1, AtomicOrdering::Relaxed);
            state.keys.insert(cmd.key.clone());
            state.heap.push(QueuedCommand {
                priority: cmd.priority,
                seq,
                cmd,
            });
        }
        self.inner.notify.notify_one();
        Ok(true)
    }

    /// Pop the highest-priority ready command, if any
    pub fn pop(&self) -> Option<Command> {
        let mut state = self.inner.state.lock().unwrap();
        let queued = state.heap.pop()?;
        state.keys.remove(&queued.cmd.key);
        Some(queued.cmd)
    }

    /// Wait for and pop the next ready command
    pub async fn next(&self) -> Command {
        loop {
            if let Some(cmd) = self.pop() {
                return cmd;
            }
            self.inner.notify.notified().await;
        }
    }

    /// Number of ready commands
    pub fn len(&self) -> usize {
        self.inner.state.lock().unwrap().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for CommandScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandScheduler")
            .field("capacity", &self.inner.capacity)
            .field("len", &self.len())
            .finish()
    }
}
