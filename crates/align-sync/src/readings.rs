use std::collections::VecDeque;
use std::time::SystemTime;

use crate::model::{Reading, ReadingTiming};

pub const DEFAULT_CAPACITY: usize = 20;

#[derive(Clone, Debug, PartialEq)]
pub struct LiveEntry {
    pub seq: u64,
    pub captured_at: SystemTime,
    pub reading: Reading,
    pub timing: Option<ReadingTiming>,
    pub completed: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LiveStats {
    pub average_duration_ms: Option<f64>,
    pub average_latency_ms: Option<f64>,
}

/// Bounded history of live measurements for the current manual session.
#[derive(Debug)]
pub struct LiveReadings {
    entries: VecDeque<LiveEntry>,
    capacity: usize,
    next_seq: u64,
}

impl Default for LiveReadings {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl LiveReadings {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            next_seq: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn append(&mut self, reading: Reading) -> u64 {
        self.append_at(reading, SystemTime::now())
    }

    pub fn append_at(&mut self, reading: Reading, captured_at: SystemTime) -> u64 {
        self.push(reading, captured_at, None, false)
    }

    /// Opens a pending entry with whatever timing the start of the measurement reported.
    pub fn append_timed(&mut self, reading: Reading, timing: Option<ReadingTiming>) -> u64 {
        self.push(reading, SystemTime::now(), timing, false)
    }

    /// Records a measurement whose start was never observed.
    pub fn append_completed(&mut self, reading: Reading, timing: Option<ReadingTiming>) -> u64 {
        self.push(reading, SystemTime::now(), timing, true)
    }

    fn push(
        &mut self,
        reading: Reading,
        captured_at: SystemTime,
        timing: Option<ReadingTiming>,
        completed: bool,
    ) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(LiveEntry {
            seq,
            captured_at,
            reading,
            timing,
            completed,
        });
        seq
    }

    /// Completes the entry with sequence `seq`. Completed or evicted entries are left alone.
    pub fn update(
        &mut self,
        seq: u64,
        timing: Option<ReadingTiming>,
        reading: Option<Reading>,
    ) -> bool {
        let Some(entry) = self
            .entries
            .iter_mut()
            .find(|entry| entry.seq == seq && !entry.completed)
        else {
            return false;
        };
        if let Some(reading) = reading {
            entry.reading = reading;
        }
        if let Some(timing) = timing {
            match &mut entry.timing {
                Some(current) => current.patch(timing),
                None => entry.timing = Some(timing),
            }
        }
        entry.completed = true;
        true
    }

    pub fn latest_pending(&self) -> Option<u64> {
        self.entries
            .iter()
            .rev()
            .find(|entry| !entry.completed)
            .map(|entry| entry.seq)
    }

    pub fn snapshot(&self) -> Vec<LiveEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn tail(&self, n: usize) -> Vec<LiveEntry> {
        self.entries.iter().rev().take(n).cloned().collect()
    }

    pub fn reset(&mut self) {
        self.entries.clear();
        self.next_seq = 1;
    }

    pub fn stats(&self) -> LiveStats {
        compute_stats(self.entries.iter())
    }
}

pub fn compute_stats<'a>(entries: impl IntoIterator<Item = &'a LiveEntry>) -> LiveStats {
    let entries: Vec<&LiveEntry> = entries.into_iter().collect();

    let durations: Vec<f64> = entries
        .iter()
        .filter_map(|entry| entry.timing.as_ref().and_then(|timing| timing.elapsed_ms))
        .collect();

    let latencies: Vec<f64> = entries
        .windows(2)
        .map(|pair| {
            match pair[1].captured_at.duration_since(pair[0].captured_at) {
                Ok(delta) => delta.as_secs_f64() * 1000.0,
                Err(err) => -(err.duration().as_secs_f64() * 1000.0),
            }
        })
        .collect();

    LiveStats {
        average_duration_ms: mean(&durations),
        average_latency_ms: mean(&latencies),
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}
