//! Priority queue of Queued tasks.
//!
//! Ordered by priority descending, then admission sequence ascending. Every
//! admission (first enqueue, retry requeue, resume) takes a fresh sequence
//! number, so a re-admitted task joins the back of its priority band.
//!
//! Only one transfer may write a destination at a time: a dispatch pass skips
//! entries whose destination is busy, without spending a source token.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::rate_limit::RateLimiter;
use crate::task::TaskId;

type QueueKey = (Reverse<i64>, u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub id: TaskId,
    pub source_id: String,
    pub destination: PathBuf,
    pub priority: i64,
    pub seq: u64,
    /// Backoff: not eligible for dispatch before this instant.
    pub not_before: Option<Instant>,
}

/// Result of one dispatch pass.
#[derive(Debug, PartialEq, Eq)]
pub enum Pick {
    /// Entry removed from the queue; its source token has been spent.
    Ready(QueueEntry),
    /// Entries exist but none may start yet; try again after `retry_in`.
    Blocked { retry_in: Duration },
    /// Every remaining entry targets a busy destination. Nothing becomes
    /// eligible until one of those transfers finishes.
    Busy,
    Empty,
}

#[derive(Debug, Default)]
pub struct TaskQueue {
    entries: BTreeMap<QueueKey, QueueEntry>,
    index: HashMap<TaskId, QueueKey>,
    next_seq: u64,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a task. A task already present is moved to the back of its band.
    pub fn admit(
        &mut self,
        id: TaskId,
        source_id: &str,
        destination: &Path,
        priority: i64,
        not_before: Option<Instant>,
    ) {
        self.remove(id);
        let seq = self.next_seq;
        self.next_seq += 1;
        let key = (Reverse(priority), seq);
        self.entries.insert(
            key,
            QueueEntry {
                id,
                source_id: source_id.to_string(),
                destination: destination.to_path_buf(),
                priority,
                seq,
                not_before,
            },
        );
        self.index.insert(id, key);
    }

    pub fn remove(&mut self, id: TaskId) -> Option<QueueEntry> {
        let key = self.index.remove(&id)?;
        self.entries.remove(&key)
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in dispatch order.
    pub fn iter(&self) -> impl Iterator<Item = &QueueEntry> {
        self.entries.values()
    }

    pub fn ids(&self) -> Vec<TaskId> {
        self.iter().map(|e| e.id).collect()
    }

    /// Walk the queue in order and take the first entry that is past its
    /// backoff, does not target a `busy` destination, and whose source grants
    /// a token. A source refused once is not asked again in the same pass.
    pub fn pick_at(
        &mut self,
        limiter: &mut RateLimiter,
        busy: &HashSet<&Path>,
        now: Instant,
    ) -> Pick {
        if self.entries.is_empty() {
            return Pick::Empty;
        }
        let mut denied: HashSet<&str> = HashSet::new();
        let mut wait: Option<Duration> = None;
        let mut chosen: Option<QueueKey> = None;

        for (key, entry) in &self.entries {
            if busy.contains(entry.destination.as_path()) {
                continue;
            }
            if let Some(not_before) = entry.not_before {
                if not_before > now {
                    let d = not_before - now;
                    wait = Some(wait.map_or(d, |w| w.min(d)));
                    continue;
                }
            }
            if denied.contains(entry.source_id.as_str()) {
                continue;
            }
            if limiter.try_acquire_at(&entry.source_id, now) {
                chosen = Some(*key);
                break;
            }
            let d = limiter.time_until_available_at(&entry.source_id, now);
            wait = Some(wait.map_or(d, |w| w.min(d)));
            denied.insert(entry.source_id.as_str());
        }

        match chosen.and_then(|key| self.entries.remove(&key)) {
            Some(entry) => {
                self.index.remove(&entry.id);
                Pick::Ready(entry)
            }
            None => match wait {
                Some(retry_in) => Pick::Blocked { retry_in },
                None => Pick::Busy,
            },
        }
    }

    pub fn pick(&mut self, limiter: &mut RateLimiter, busy: &HashSet<&Path>) -> Pick {
        self.pick_at(limiter, busy, Instant::now())
    }
}
