// Report: Performance counters for one operation or an aggregate of many
//
// A connector keeps one report per phase: construction, the last lowering,
// all lowerings, the last inverse lowering, all inverse lowerings. Reports
// are observational only; nothing reads them back into the numerics.

use std::fmt;
use std::time::{Duration, Instant};

/// Elapsed time and data volume of one or more calls.
#[derive(Debug, Clone, Default)]
pub struct Report {
    /// Number of calls folded into this report.
    pub n_calls: u64,
    /// Wall-clock time across all calls.
    pub elapsed: Duration,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub flops: u64,
    started: Option<Instant>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the start of a timed call.
    pub fn start(&mut self) {
        self.started = Some(Instant::now());
    }

    /// Close the call opened by [`Report::start`] and record its volume.
    ///
    /// Overwrites the previous contents: a report holds the most recent call
    /// until it is [`aggregate`](Report::aggregate)d elsewhere.
    pub fn end(&mut self, bytes_read: u64, bytes_written: u64, flops: u64) {
        let elapsed = self.started.take().map(|t| t.elapsed()).unwrap_or_default();
        self.n_calls = 1;
        self.elapsed = elapsed;
        self.bytes_read = bytes_read;
        self.bytes_written = bytes_written;
        self.flops = flops;
    }

    /// Fold another report into this one.
    pub fn aggregate(&mut self, other: &Report) {
        self.n_calls += other.n_calls;
        self.elapsed += other.elapsed;
        self.bytes_read += other.bytes_read;
        self.bytes_written += other.bytes_written;
        self.flops += other.flops;
    }

    pub fn reset(&mut self) {
        *self = Report::default();
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }

    /// Bytes moved (read + written) per second, in GB/s.
    pub fn throughput_gbps(&self) -> f64 {
        let secs = self.elapsed_secs();
        if secs == 0.0 {
            return 0.0;
        }
        (self.bytes_read + self.bytes_written) as f64 / secs / 1e9
    }

    pub fn gflops(&self) -> f64 {
        let secs = self.elapsed_secs();
        if secs == 0.0 {
            return 0.0;
        }
        self.flops as f64 / secs / 1e9
    }

    /// Mean wall-clock time per call.
    pub fn avg(&self) -> Duration {
        if self.n_calls == 0 {
            return Duration::ZERO;
        }
        self.elapsed.div_f64(self.n_calls as f64)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "calls={} time={:.3?} avg={:.3?} read={}B written={}B flops={} ({:.3} GB/s, {:.3} GFLOP/s)",
            self.n_calls,
            self.elapsed,
            self.avg(),
            self.bytes_read,
            self.bytes_written,
            self.flops,
            self.throughput_gbps(),
            self.gflops(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_end_records_last_call() {
        let mut r = Report::new();
        r.start();
        r.end(100, 200, 10);
        assert_eq!(r.n_calls, 1);
        assert_eq!(r.bytes_read, 100);
        r.start();
        r.end(1, 2, 3);
        assert_eq!(r.n_calls, 1);
        assert_eq!((r.bytes_read, r.bytes_written, r.flops), (1, 2, 3));
    }

    #[test]
    fn test_aggregate() {
        let mut last = Report::new();
        let mut history = Report::new();
        for _ in 0..3 {
            last.start();
            last.end(8, 16, 4);
            history.aggregate(&last);
        }
        assert_eq!(history.n_calls, 3);
        assert_eq!(history.bytes_read, 24);
        assert_eq!(history.bytes_written, 48);
        assert_eq!(history.flops, 12);
        assert!(history.elapsed >= last.elapsed);
    }

    #[test]
    fn test_zero_time_rates() {
        let r = Report::new();
        assert_eq!(r.throughput_gbps(), 0.0);
        assert_eq!(r.gflops(), 0.0);
        assert_eq!(r.avg(), Duration::ZERO);
        assert!(r.to_string().starts_with("calls=0"));
    }

    #[test]
    fn test_avg_with_call_count_past_u32() {
        let mut r = Report::new();
        r.n_calls = 1 << 32;
        r.elapsed = Duration::from_secs(1 << 32);
        assert_eq!(r.avg(), Duration::from_secs(1));
    }
}
