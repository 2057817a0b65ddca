//! Cooperative stop signals for active transfers.
//!
//! The scheduler registers a [`StopSignal`] for each transfer it starts. A
//! cancel, pause or shutdown request sets the reason; the executor checks the
//! signal between chunks and ends the attempt.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::task::TaskId;

/// Why an active transfer was asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Operator cancel: task ends Cancelled.
    Cancel,
    /// Operator pause: task ends Paused, partial file kept.
    Pause,
    /// Manager shutdown: task goes back to Queued for the next start.
    Shutdown,
}

impl StopReason {
    fn code(self) -> u8 {
        match self {
            StopReason::Cancel => 3,
            StopReason::Pause => 2,
            StopReason::Shutdown => 1,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            3 => Some(StopReason::Cancel),
            2 => Some(StopReason::Pause),
            1 => Some(StopReason::Shutdown),
            _ => None,
        }
    }
}

/// Shared stop flag. The strongest reason wins: cancel over pause over shutdown.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicU8>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self, reason: StopReason) {
        self.0.fetch_max(reason.code(), Ordering::AcqRel);
    }

    pub fn reason(&self) -> Option<StopReason> {
        StopReason::from_code(self.0.load(Ordering::Acquire))
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire) != 0
    }
}

/// Registry of active transfers, owned by the scheduler task.
#[derive(Debug, Default)]
pub struct ActiveTransfers {
    signals: HashMap<TaskId, StopSignal>,
}

impl ActiveTransfers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a starting transfer; returns the signal to hand to the executor.
    pub fn register(&mut self, id: TaskId) -> StopSignal {
        let signal = StopSignal::new();
        self.signals.insert(id, signal.clone());
        signal
    }

    pub fn unregister(&mut self, id: TaskId) -> Option<StopSignal> {
        self.signals.remove(&id)
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.signals.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    /// Ask one transfer to stop. Returns false if it is not active.
    pub fn request_stop(&self, id: TaskId, reason: StopReason) -> bool {
        match self.signals.get(&id) {
            Some(signal) => {
                signal.request(reason);
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&self, reason: StopReason) {
        for signal in self.signals.values() {
            signal.request(reason);
        }
    }
}

/// Default path for the control socket (same XDG state dir as the DB).
pub fn default_control_socket_path() -> std::io::Result<PathBuf> {
    xdg::BaseDirectories::with_prefix("docfetch")?.place_state_file("control.sock")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_overrides_pause() {
        let signal = StopSignal::new();
        assert_eq!(signal.reason(), None);
        signal.request(StopReason::Pause);
        assert_eq!(signal.reason(), Some(StopReason::Pause));
        signal.request(StopReason::Cancel);
        assert_eq!(signal.reason(), Some(StopReason::Cancel));
        signal.request(StopReason::Shutdown);
        assert_eq!(signal.reason(), Some(StopReason::Cancel));
    }

    #[test]
    fn registry_signals_only_registered_transfers() {
        let mut active = ActiveTransfers::new();
        let signal = active.register(7);
        assert!(active.request_stop(7, StopReason::Pause));
        assert!(!active.request_stop(8, StopReason::Pause));
        assert!(signal.is_stopped());
        active.unregister(7);
        assert!(active.is_empty());
    }
}
