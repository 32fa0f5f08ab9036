//! Throughput and process statistics.
//!
//! - Messages per second
//! - Bytes per second
//! - CPU usage
//! - Memory usage (resident set size)

use std::time::{Duration, Instant};

use sysinfo::{Pid, System};

const REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// Interval-sampled throughput plus process statistics.
pub struct Statistics {
    system: System,
    pid: Pid,

    update_timer: Instant,
    uptime: Instant,

    total_messages: u64,
    total_bytes: u64,
    messages_prev: u64,
    bytes_prev: u64,

    mps: f64,
    bps: f64,
    cpu: f32,
    rss_mib: f64,
}

impl Statistics {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            pid: Pid::from_u32(std::process::id()),
            update_timer: Instant::now(),
            uptime: Instant::now(),
            total_messages: 0,
            total_bytes: 0,
            messages_prev: 0,
            bytes_prev: 0,
            mps: 0.0,
            bps: 0.0,
            cpu: 0.0,
            rss_mib: 0.0,
        }
    }

    /// Record `n` messages totalling `size` bytes each observation.
    ///
    /// Rates and process statistics refresh once per second. Returns true
    /// when the interval rolled over; use it to drive periodic logging.
    pub fn observe(&mut self, size: usize, n: u64) -> bool {
        self.total_messages += n;
        self.total_bytes += size as u64;

        let elapsed = self.update_timer.elapsed();
        if elapsed <= REFRESH_INTERVAL {
            return false;
        }

        self.system.refresh_process(self.pid);
        if let Some(process) = self.system.process(self.pid) {
            self.cpu = process.cpu_usage();
            self.rss_mib = process.memory() as f64 / (1024.0 * 1024.0);
        }

        let seconds = elapsed.as_secs_f64();
        self.mps = (self.total_messages - self.messages_prev) as f64 / seconds;
        self.bps = (self.total_bytes - self.bytes_prev) as f64 / seconds;
        self.messages_prev = self.total_messages;
        self.bytes_prev = self.total_bytes;
        self.update_timer = Instant::now();

        true
    }

    pub fn n_messages(&self) -> u64 {
        self.total_messages
    }

    pub fn n_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn reset_uptime(&mut self) {
        self.uptime = Instant::now();
    }

    /// One-line summary.
    ///
    /// Example: `0.000 MBps  0.00k MPS  over 0.01 seconds (total: 200000 bytes, 1000 messages)  CPU:   0.0%  RSS: 0.0 MB`
    pub fn summary(&self) -> String {
        format!(
            "{:.3} MBps  {:.2}k MPS  over {:.2} seconds (total: {} bytes, {} messages)  CPU: {:>5.1}%  RSS: {:.1} MB",
            self.bps / 1_000_000.0,
            self.mps / 1_000.0,
            self.uptime.elapsed().as_secs_f64(),
            self.total_bytes,
            self.total_messages,
            self.cpu,
            self.rss_mib,
        )
    }
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_totals_accumulate() {
        let mut stats = Statistics::new();
        stats.observe(100, 1);
        stats.observe(100, 1);
        stats.observe(50, 2);

        assert_eq!(stats.n_messages(), 4);
        assert_eq!(stats.n_bytes(), 250);
    }

    #[test]
    fn test_observe_reports_interval_rollover() {
        let mut stats = Statistics::new();
        assert!(!stats.observe(10, 1), "interval has not passed yet");

        std::thread::sleep(Duration::from_millis(1100));
        assert!(stats.observe(10, 1), "interval rolled over");
        assert!(!stats.observe(10, 1));
    }

    #[test]
    fn test_summary_contains_totals() {
        let mut stats = Statistics::new();
        stats.observe(200, 1000);

        let summary = stats.summary();
        assert!(summary.contains("200 bytes"));
        assert!(summary.contains("1000 messages"));
        assert!(summary.contains("CPU"));
        assert!(summary.contains("RSS"));
    }
}
