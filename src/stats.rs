//! Run statistics, per worker and combined.

use serde::Serialize;
use std::fmt::Write;
use std::time::Duration;

/// Seconds spent in each phase.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct Timings {
    pub input: f64,
    pub histogram: f64,
    pub effective: f64,
    pub construct: f64,
    pub merge: f64,
    pub save: f64,
}

impl Timings {
    pub fn total(&self) -> f64 {
        self.input + self.histogram + self.effective + self.construct + self.merge + self.save
    }

    /// Phase-wise maximum, the time the slowest worker needed.
    fn max(self, other: Self) -> Self {
        Self {
            input: self.input.max(other.input),
            histogram: self.histogram.max(other.histogram),
            effective: self.effective.max(other.effective),
            construct: self.construct.max(other.construct),
            merge: self.merge.max(other.merge),
            save: self.save.max(other.save),
        }
    }
}

pub fn secs(d: Duration) -> f64 {
    d.as_secs_f64()
}

/// What one worker measured.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct WorkerStats {
    pub rank: usize,
    pub local_symbols: usize,
    pub sigma: usize,
    pub height: usize,
    pub timings: Timings,
    pub peak_memory: usize,
    pub bytes_sent: usize,
    pub messages_sent: usize,
    pub bits_written: usize,
    pub bytes_written: usize,
}

/// Statistics of a whole run.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RunStats {
    pub workers: usize,
    pub threads_per_worker: usize,
    pub symbols: usize,
    pub sigma: usize,
    pub height: usize,
    /// Slowest worker per phase.
    pub timings: Timings,
    /// Sum of the workers' peaks.
    pub peak_memory: usize,
    pub traffic_bytes: usize,
    pub messages: usize,
    pub bits_written: usize,
    pub bytes_written: usize,
}

impl RunStats {
    /// Every worker agrees on the alphabet, so it is taken from the first.
    pub fn combine(workers: &[WorkerStats], threads_per_worker: usize) -> Self {
        let mut stats = Self {
            workers: workers.len(),
            threads_per_worker,
            sigma: workers.first().map_or(0, |w| w.sigma),
            height: workers.first().map_or(0, |w| w.height),
            ..Self::default()
        };
        for w in workers {
            stats.symbols += w.local_symbols;
            stats.timings = stats.timings.max(w.timings);
            stats.peak_memory += w.peak_memory;
            stats.traffic_bytes += w.bytes_sent;
            stats.messages += w.messages_sent;
            stats.bits_written += w.bits_written;
            stats.bytes_written += w.bytes_written;
        }
        stats
    }

    pub fn readable(&self) -> String {
        let t = &self.timings;
        let mut s = String::new();
        let _ = writeln!(s, "workers:            {} x {} threads", self.workers, self.threads_per_worker);
        let _ = writeln!(s, "symbols:            {}", self.symbols);
        let _ = writeln!(s, "alphabet size:      {} (height {})", self.sigma, self.height);
        let _ = writeln!(s, "input time:         {:.3}s", t.input);
        let _ = writeln!(s, "histogram time:     {:.3}s", t.histogram);
        let _ = writeln!(s, "effective time:     {:.3}s", t.effective);
        let _ = writeln!(s, "construction time:  {:.3}s", t.construct);
        let _ = writeln!(s, "merge time:         {:.3}s", t.merge);
        let _ = writeln!(s, "save time:          {:.3}s", t.save);
        let _ = writeln!(s, "peak memory:        {} bytes", self.peak_memory);
        let _ = writeln!(s, "traffic:            {} bytes in {} messages", self.traffic_bytes, self.messages);
        let _ = write!(s, "written:            {} bits, {} bytes", self.bits_written, self.bytes_written);
        s
    }

    /// Single-line JSON record.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine() {
        let a = WorkerStats {
            rank: 0,
            local_symbols: 7,
            sigma: 5,
            height: 3,
            timings: Timings { merge: 2.0, input: 1.0, ..Timings::default() },
            peak_memory: 100,
            bytes_sent: 48,
            messages_sent: 2,
            ..WorkerStats::default()
        };
        let b = WorkerStats {
            rank: 1,
            local_symbols: 6,
            sigma: 5,
            height: 3,
            timings: Timings { merge: 1.0, input: 3.0, ..Timings::default() },
            peak_memory: 50,
            bytes_sent: 24,
            messages_sent: 1,
            ..WorkerStats::default()
        };
        let stats = RunStats::combine(&[a, b], 4);
        assert_eq!(stats.symbols, 13);
        assert_eq!(stats.timings.merge, 2.0);
        assert_eq!(stats.timings.input, 3.0);
        assert_eq!(stats.timings.total(), 5.0);
        assert_eq!(stats.peak_memory, 150);
        assert_eq!(stats.traffic_bytes, 72);
        assert_eq!(stats.messages, 3);

        let json = stats.to_json().unwrap();
        assert!(!json.contains('\n'));
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["sigma"], 5);
        assert_eq!(value["timings"]["merge"], 2.0);
        assert!(stats.readable().contains("alphabet size:      5 (height 3)"));
    }
}
