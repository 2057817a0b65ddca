//! Fan-out of progress events with bounded, per-subscriber buffers.
//!
//! Publishing never waits on a subscriber. A subscriber buffers at most
//! `capacity` events. When it is full the oldest event is dropped; if that
//! leaves no buffered event for the dropped task, the task id is marked stale
//! and the subscriber later receives a resync event carrying the latest
//! snapshot for that task, taken when the stream reads it.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::Notify;

use super::ProgressEvent;
use crate::task::TaskId;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct Buffer {
    events: VecDeque<ProgressEvent>,
    /// Tasks whose last buffered event was dropped, oldest first, each once.
    stale: VecDeque<TaskId>,
    closed: bool,
}

#[derive(Debug)]
struct Subscriber {
    capacity: usize,
    buffer: Mutex<Buffer>,
    notify: Notify,
    source: Weak<Inner>,
}

impl Subscriber {
    fn push(&self, event: &ProgressEvent) {
        let mut buf = lock(&self.buffer);
        if buf.closed {
            return;
        }
        buf.stale.retain(|id| *id != event.task_id);

        while buf.events.len() >= self.capacity {
            let Some(dropped) = buf.events.pop_front() else {
                break;
            };
            let superseded = dropped.task_id == event.task_id
                || buf.events.iter().any(|e| e.task_id == dropped.task_id)
                || buf.stale.contains(&dropped.task_id);
            if !superseded {
                buf.stale.push_back(dropped.task_id);
            }
        }
        buf.events.push_back(event.clone());
        drop(buf);
        self.notify.notify_one();
    }

    fn close(&self) {
        lock(&self.buffer).closed = true;
        self.notify.notify_one();
    }

    /// Current snapshot for a stale task, flagged as a resync.
    fn resync(&self, task_id: TaskId) -> Option<ProgressEvent> {
        let inner = self.source.upgrade()?;
        let mut event = lock(&inner.state).latest.get(&task_id)?.clone();
        event.resync = true;
        Some(event)
    }
}

#[derive(Debug, Default)]
struct State {
    latest: HashMap<TaskId, ProgressEvent>,
    subscribers: Vec<Weak<Subscriber>>,
    closed: bool,
}

#[derive(Debug)]
struct Inner {
    capacity: usize,
    state: Mutex<State>,
}

/// Cloneable publisher handle.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    inner: Arc<Inner>,
}

impl Broadcaster {
    /// `capacity` is the per-subscriber buffer length (at least 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                capacity: capacity.max(1),
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// New independent stream. It sees events published after this call.
    pub fn subscribe(&self) -> EventStream {
        let mut state = lock(&self.inner.state);
        let sub = Arc::new(Subscriber {
            capacity: self.inner.capacity,
            buffer: Mutex::new(Buffer {
                closed: state.closed,
                ..Buffer::default()
            }),
            notify: Notify::new(),
            source: Arc::downgrade(&self.inner),
        });
        state.subscribers.push(Arc::downgrade(&sub));
        EventStream { sub }
    }

    /// Deliver `event` to every live subscriber. Never blocks on a consumer.
    pub fn publish(&self, event: ProgressEvent) {
        let mut state = lock(&self.inner.state);
        if state.closed {
            return;
        }
        state.latest.insert(event.task_id, event.clone());
        state.subscribers.retain(|weak| match weak.upgrade() {
            Some(sub) => {
                sub.push(&event);
                true
            }
            None => false,
        });
    }

    /// Latest event seen for a task.
    pub fn latest(&self, task_id: TaskId) -> Option<ProgressEvent> {
        lock(&self.inner.state).latest.get(&task_id).cloned()
    }

    /// Drop the snapshot for a removed task.
    pub fn forget(&self, task_id: TaskId) {
        lock(&self.inner.state).latest.remove(&task_id);
    }

    pub fn subscriber_count(&self) -> usize {
        let mut state = lock(&self.inner.state);
        state.subscribers.retain(|w| w.strong_count() > 0);
        state.subscribers.len()
    }

    /// End every stream once it has drained. Later publishes are ignored.
    pub fn close(&self) {
        let mut state = lock(&self.inner.state);
        state.closed = true;
        for sub in state.subscribers.drain(..).filter_map(|w| w.upgrade()) {
            sub.close();
        }
    }
}

/// Receiving side of one subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct EventStream {
    sub: Arc<Subscriber>,
}

impl EventStream {
    /// Next event, or `None` once the broadcaster is closed and the buffer is empty.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        loop {
            match self.pop() {
                Ok(event) => return Some(event),
                Err(true) => return None,
                Err(false) => self.sub.notify.notified().await,
            }
        }
    }

    /// Non-blocking receive.
    pub fn try_recv(&mut self) -> Option<ProgressEvent> {
        self.pop().ok()
    }

    /// `Err(closed)` when nothing is buffered. Stale tasks come first.
    fn pop(&self) -> Result<ProgressEvent, bool> {
        loop {
            let mut buf = lock(&self.sub.buffer);
            let Some(task_id) = buf.stale.pop_front() else {
                return buf.events.pop_front().ok_or(buf.closed);
            };
            // The state lock is taken by publishers before buffer locks.
            drop(buf);
            if let Some(event) = self.sub.resync(task_id) {
                return Ok(event);
            }
        }
    }
}
