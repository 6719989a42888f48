//! Bounded per-machine reading window

use crate::models::Reading;
use std::collections::VecDeque;

/// Default number of readings kept per machine
pub const DEFAULT_BUFFER_CAPACITY: usize = 50;

/// FIFO window that evicts the oldest reading once full
#[derive(Debug, Clone)]
pub struct SlidingBuffer {
    readings: VecDeque<Reading>,
    capacity: usize,
}

impl SlidingBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            readings: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a reading; returns true if an old one was evicted
    pub fn push(&mut self, reading: Reading) -> bool {
        let evicted = self.readings.len() == self.capacity;
        if evicted {
            self.readings.pop_front();
        }
        self.readings.push_back(reading);
        evicted
    }

    /// Seed from another processor's window, keeping the newest readings
    ///
    /// Hydrated readings are older than anything ingested locally, so they
    /// go in front of the current contents.
    pub fn hydrate(&mut self, older: &[Reading]) {
        let room = self.capacity - self.readings.len();
        let skip = older.len().saturating_sub(room);
        for reading in older[skip..].iter().rev() {
            self.readings.push_front(reading.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reading> {
        self.readings.iter()
    }

    pub fn to_vec(&self) -> Vec<Reading> {
        self.readings.iter().cloned().collect()
    }

    pub fn mean_temperature(&self) -> Option<f64> {
        if self.readings.is_empty() {
            return None;
        }
        Some(self.readings.iter().map(|r| r.temperature).sum::<f64>() / self.len() as f64)
    }
}

impl Default for SlidingBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}
