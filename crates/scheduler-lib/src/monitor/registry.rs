//! Shared load state for the reactive monitor
//!
//! The arrival callback and the periodic evaluation touch the same rate
//! windows from different tasks, so all of it sits behind one lock.

use super::RateWindow;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct LoadState {
    windows: BTreeMap<String, RateWindow>,
    overflow_assigned: BTreeSet<String>,
}

/// Per-machine rate windows and the set of machines routed to overflow
#[derive(Debug)]
pub struct LoadRegistry {
    window: Duration,
    state: RwLock<LoadState>,
}

impl LoadRegistry {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: RwLock::new(LoadState::default()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, LoadState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, LoadState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a data message for `machine_id`
    pub fn record_arrival(&self, machine_id: &str, now: Instant) {
        let window = self.window;
        self.write()
            .windows
            .entry(machine_id.to_string())
            .or_insert_with(|| RateWindow::new(window))
            .record(now);
    }

    /// Current rate of one machine, zero when never seen
    pub fn rate(&self, machine_id: &str, now: Instant) -> usize {
        self.read()
            .windows
            .get(machine_id)
            .map(|w| w.rate(now))
            .unwrap_or(0)
    }

    /// Prune every window, forget idle machines, and return the remaining rates
    pub fn rates(&self, now: Instant) -> Vec<(String, usize)> {
        let mut state = self.write();
        state.windows.retain(|_, window| {
            window.prune(now);
            !window.is_empty()
        });
        state
            .windows
            .iter()
            .map(|(machine, w)| (machine.clone(), w.rate(now)))
            .collect()
    }

    pub fn tracked_machines(&self) -> usize {
        self.read().windows.len()
    }

    pub fn is_overflow_assigned(&self, machine_id: &str) -> bool {
        self.read().overflow_assigned.contains(machine_id)
    }

    /// Returns false when the machine was already recorded
    pub fn mark_overflow_assigned(&self, machine_id: &str) -> bool {
        self.write().overflow_assigned.insert(machine_id.to_string())
    }

    pub fn overflow_assigned(&self) -> Vec<String> {
        self.read().overflow_assigned.iter().cloned().collect()
    }
}
