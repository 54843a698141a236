//! Communication statistics
//!
//! Transaction counters and response-time extrema for one device. The
//! snapshot type is plain data; [`StatisticsTracker`] wraps it in a lock so
//! foreground operations and the background task can update it concurrently.

use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// Accumulated communication statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommunicationStatistics {
    pub total_transactions: u64,
    pub successful_transactions: u64,
    pub failed_transactions: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// `Duration::MAX` until the first sample
    pub min_response_time: Duration,
    pub max_response_time: Duration,
    pub total_response_time: Duration,
    pub response_samples: u64,
    pub last_reset: DateTime<Utc>,
}

impl Default for CommunicationStatistics {
    fn default() -> Self {
        Self {
            total_transactions: 0,
            successful_transactions: 0,
            failed_transactions: 0,
            bytes_sent: 0,
            bytes_received: 0,
            min_response_time: Duration::MAX,
            max_response_time: Duration::ZERO,
            total_response_time: Duration::ZERO,
            response_samples: 0,
            last_reset: Utc::now(),
        }
    }
}

impl CommunicationStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero every counter and re-arm the minimum sentinel
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Percentage of successful transactions, 0 when nothing was sent
    pub fn success_rate(&self) -> f64 {
        if self.total_transactions == 0 {
            return 0.0;
        }
        self.successful_transactions as f64 / self.total_transactions as f64 * 100.0
    }

    pub fn update_response_time(&mut self, elapsed: Duration) {
        self.total_response_time = self.total_response_time.saturating_add(elapsed);
        self.response_samples += 1;
        if elapsed < self.min_response_time {
            self.min_response_time = elapsed;
        }
        if elapsed > self.max_response_time {
            self.max_response_time = elapsed;
        }
    }

    pub fn record_success(&mut self, bytes_sent: usize, bytes_received: usize, elapsed: Duration) {
        self.total_transactions += 1;
        self.successful_transactions += 1;
        self.bytes_sent += bytes_sent as u64;
        self.bytes_received += bytes_received as u64;
        self.update_response_time(elapsed);
    }

    pub fn record_failure(&mut self) {
        self.total_transactions += 1;
        self.failed_transactions += 1;
    }

    /// Mean response time over successful transactions
    pub fn average_response_time(&self) -> Duration {
        if self.response_samples == 0 {
            return Duration::ZERO;
        }
        let nanos = self.total_response_time.as_nanos() / self.response_samples as u128;
        Duration::from_nanos(nanos as u64)
    }

    /// Smallest observed response time, `None` before the first sample
    pub fn min_response_time(&self) -> Option<Duration> {
        (self.min_response_time != Duration::MAX).then_some(self.min_response_time)
    }
}

impl std::fmt::Display for CommunicationStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "tx={} ok={} err={} rate={:.1}% sent={}B recv={}B",
            self.total_transactions,
            self.successful_transactions,
            self.failed_transactions,
            self.success_rate(),
            self.bytes_sent,
            self.bytes_received
        )?;
        if let Some(min) = self.min_response_time() {
            write!(
                f,
                " rt(min/avg/max)={:?}/{:?}/{:?}",
                min,
                self.average_response_time(),
                self.max_response_time
            )?;
        }
        Ok(())
    }
}

/// Lock-protected statistics shared across tasks
#[derive(Debug, Default)]
pub struct StatisticsTracker {
    inner: Mutex<CommunicationStatistics>,
}

impl StatisticsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CommunicationStatistics {
        self.inner.lock().clone()
    }

    pub fn record_success(&self, bytes_sent: usize, bytes_received: usize, elapsed: Duration) {
        self.inner
            .lock()
            .record_success(bytes_sent, bytes_received, elapsed);
    }

    pub fn record_failure(&self) {
        self.inner.lock().record_failure();
    }

    pub fn reset(&self) {
        self.inner.lock().reset();
    }
}
