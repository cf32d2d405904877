//! Link statistics collection

use serde::Serialize;

/// Link statistics
///
/// Updated by the protocol engines on every exchange and exposed through
/// the scheduler as a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkStatistics {
    /// Requests executed (successful or not)
    pub exchanges: u64,
    /// Requests that failed after all retries
    pub failed_exchanges: u64,
    /// Telegrams or KW requests written to the link
    pub telegrams_sent: u64,
    /// Telegrams or KW payloads received
    pub telegrams_received: u64,
    /// Single reads that ran into the timeout
    pub timeouts: u64,
    pub checksum_errors: u64,
    /// NACK bytes or error telegrams received
    pub nacks: u64,
    /// Exchanges restarted from `Idle`
    pub resyncs: u64,
    /// Stale bytes discarded before an exchange
    pub discarded_bytes: u64,
}

impl LinkStatistics {
    /// Create new statistics with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all statistics counters
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn increment_exchanges(&mut self) {
        self.exchanges += 1;
    }

    pub fn increment_failed_exchanges(&mut self) {
        self.failed_exchanges += 1;
    }

    pub fn increment_telegrams_sent(&mut self) {
        self.telegrams_sent += 1;
    }

    pub fn increment_telegrams_received(&mut self) {
        self.telegrams_received += 1;
    }

    pub fn increment_timeouts(&mut self) {
        self.timeouts += 1;
    }

    pub fn increment_checksum_errors(&mut self) {
        self.checksum_errors += 1;
    }

    pub fn increment_nacks(&mut self) {
        self.nacks += 1;
    }

    pub fn increment_resyncs(&mut self) {
        self.resyncs += 1;
    }

    pub fn add_discarded_bytes(&mut self, count: usize) {
        self.discarded_bytes += count as u64;
    }

    /// Get the failure rate as a percentage
    ///
    /// Returns 0.0 if no exchange has been made.
    pub fn error_rate(&self) -> f64 {
        if self.exchanges == 0 {
            0.0
        } else {
            (self.failed_exchanges as f64 / self.exchanges as f64) * 100.0
        }
    }
}
