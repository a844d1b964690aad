use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::events::{ProgressEntry, ProgressSnapshot};

struct Counter {
    bytes: u64,
    /// Planned length; 0 when unknown (single mode without content-length).
    expected: u64,
    speed: f64,
    reference_bytes: u64,
    reference_time: Instant,
}

impl Counter {
    fn new(expected: u64, now: Instant) -> Self {
        Self {
            bytes: 0,
            expected,
            speed: 0.0,
            reference_bytes: 0,
            reference_time: now,
        }
    }

    fn refresh(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.reference_time).as_millis() as f64;
        if elapsed > 0.0 {
            self.speed = 1000.0 * (self.bytes - self.reference_bytes) as f64 / elapsed;
        }
        self.reference_bytes = self.bytes;
        self.reference_time = now;
    }

    fn entry(&self) -> ProgressEntry {
        let percentage = if self.expected > 0 {
            100.0 * self.bytes as f64 / self.expected as f64
        } else {
            0.0
        };
        ProgressEntry {
            bytes: self.bytes,
            percentage,
            speed: self.speed,
        }
    }
}

struct ReporterState {
    chunks: Vec<Counter>,
    total: Counter,
}

/// Per-chunk and aggregate byte counters with window-based speed
/// estimates. Emission is gated on the report interval so callers are not
/// flooded on every read.
pub struct Reporter {
    state: Mutex<ReporterState>,
    interval: Duration,
}

impl Reporter {
    pub fn new(chunk_sizes: &[u64], total_size: u64, interval: Duration) -> Self {
        let now = Instant::now();
        let chunks = chunk_sizes
            .iter()
            .map(|size| Counter::new(*size, now))
            .collect();
        Self {
            state: Mutex::new(ReporterState {
                chunks,
                total: Counter::new(total_size, now),
            }),
            interval,
        }
    }

    /// Credit a chunk completed in an earlier session.
    pub fn credit_resumed(&self, id: u32) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        let Some(chunk) = state.chunks.get_mut(id as usize) else {
            return;
        };
        let len = chunk.expected;
        chunk.bytes = len;
        chunk.reference_bytes = len;
        state.total.bytes += len;
        state.total.reference_bytes += len;
    }

    /// Record the body length learned after the fact (whole-file chunk).
    pub fn set_expected(&self, id: u32, expected: u64) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if let Some(chunk) = state.chunks.get_mut(id as usize) {
            chunk.expected = expected;
        }
        if state.total.expected == 0 {
            state.total.expected = expected;
        }
    }

    /// Add bytes written for a chunk. Returns a snapshot when the report
    /// window elapsed, which the caller should emit.
    pub fn add(&self, id: u32, bytes: u64) -> Option<ProgressSnapshot> {
        let Ok(mut state) = self.state.lock() else {
            return None;
        };
        let now = Instant::now();
        if let Some(chunk) = state.chunks.get_mut(id as usize) {
            chunk.bytes += bytes;
            if now.duration_since(chunk.reference_time) > self.interval {
                chunk.refresh(now);
            }
        }
        state.total.bytes += bytes;
        if now.duration_since(state.total.reference_time) > self.interval {
            state.total.refresh(now);
            return Some(snapshot_of(&state));
        }
        None
    }

    /// Wind a chunk's counters back to zero before a fresh attempt.
    pub fn reset(&self, id: u32) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        let Some(chunk) = state.chunks.get_mut(id as usize) else {
            return;
        };
        let written = chunk.bytes;
        chunk.bytes = 0;
        chunk.reference_bytes = 0;
        chunk.speed = 0.0;
        state.total.bytes = state.total.bytes.saturating_sub(written);
        state.total.reference_bytes = state.total.reference_bytes.saturating_sub(written);
    }

    /// Forced flush on chunk completion; the finished chunk's speed is
    /// zeroed.
    pub fn flush_chunk(&self, id: u32) -> Option<ProgressSnapshot> {
        let Ok(mut state) = self.state.lock() else {
            return None;
        };
        let now = Instant::now();
        if let Some(chunk) = state.chunks.get_mut(id as usize) {
            chunk.refresh(now);
            chunk.speed = 0.0;
        }
        state.total.refresh(now);
        Some(snapshot_of(&state))
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.state
            .lock()
            .map(|state| snapshot_of(&state))
            .unwrap_or_default()
    }

    pub fn total_bytes(&self) -> u64 {
        self.state.lock().map(|state| state.total.bytes).unwrap_or(0)
    }
}

fn snapshot_of(state: &ReporterState) -> ProgressSnapshot {
    ProgressSnapshot {
        total: state.total.entry(),
        details: state.chunks.iter().map(Counter::entry).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resumed_chunks_report_complete() {
        let reporter = Reporter::new(&[250, 250, 250, 250], 1000, Duration::from_millis(2500));
        reporter.credit_resumed(0);
        reporter.credit_resumed(2);

        let snapshot = reporter.snapshot();
        assert_eq!(snapshot.total.bytes, 500);
        assert_eq!(snapshot.total.percentage, 50.0);
        assert_eq!(snapshot.details[0].percentage, 100.0);
        assert_eq!(snapshot.details[1].percentage, 0.0);
        assert_eq!(snapshot.details[2].percentage, 100.0);
    }

    #[test]
    fn interval_gates_emission() {
        let reporter = Reporter::new(&[1000], 1000, Duration::from_secs(3600));
        assert!(reporter.add(0, 100).is_none());
        assert!(reporter.add(0, 100).is_none());
        // the forced flush always reports, with the chunk speed zeroed
        let snapshot = reporter.flush_chunk(0).unwrap();
        assert_eq!(snapshot.total.bytes, 200);
        assert_eq!(snapshot.details[0].speed, 0.0);
    }

    #[test]
    fn zero_interval_reports_every_write() {
        let reporter = Reporter::new(&[1000], 1000, Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        let snapshot = reporter.add(0, 400).expect("window elapsed");
        assert_eq!(snapshot.total.bytes, 400);
        assert_eq!(snapshot.details[0].bytes, 400);
        assert!(snapshot.total.percentage > 39.0 && snapshot.total.percentage < 41.0);
    }

    #[test]
    fn reset_rolls_back_the_attempt() {
        let reporter = Reporter::new(&[500, 500], 1000, Duration::from_secs(3600));
        reporter.add(0, 300);
        reporter.add(1, 200);
        reporter.reset(0);

        let snapshot = reporter.snapshot();
        assert_eq!(snapshot.details[0].bytes, 0);
        assert_eq!(snapshot.details[1].bytes, 200);
        assert_eq!(snapshot.total.bytes, 200);
    }

    #[test]
    fn unknown_length_reports_zero_percentage() {
        let reporter = Reporter::new(&[0], 0, Duration::from_secs(3600));
        reporter.add(0, 123);
        let snapshot = reporter.snapshot();
        assert_eq!(snapshot.details[0].bytes, 123);
        assert_eq!(snapshot.details[0].percentage, 0.0);

        reporter.set_expected(0, 246);
        let snapshot = reporter.snapshot();
        assert_eq!(snapshot.details[0].percentage, 50.0);
        assert_eq!(snapshot.total.percentage, 50.0);
    }
}
