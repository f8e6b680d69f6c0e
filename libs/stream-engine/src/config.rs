use std::time::Duration;

use serde::Deserialize;

use crate::error::StreamError;

/// Tunables shared by producers, consumers, groups and reporters.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Approximate upper bound on entries kept per topic.
    #[serde(default = "default_max_len")]
    pub max_len: usize,
    /// Messages per log entry.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// How long the first message of a batch waits for company.
    #[serde(default = "default_linger_ms")]
    pub linger_ms: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Stats write period; also the producer's availability refresh period.
    #[serde(default = "default_report_interval_ms")]
    pub report_interval_ms: u64,
    /// Stats rows older than this are stale and get deleted.
    #[serde(default = "default_stat_alive_secs")]
    pub stat_alive_secs: u64,
    /// Max lag, in milliseconds of entry-id time, for a tag to stay available.
    #[serde(default = "default_latency_tolerance")]
    pub latency_tolerance: i64,
    /// Max entries per read.
    #[serde(default = "default_read_count")]
    pub read_count: usize,
    #[serde(default = "default_block_ms")]
    pub block_ms: u64,
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,
}

fn default_max_len() -> usize {
    10_000
}
fn default_batch_size() -> usize {
    32
}
fn default_linger_ms() -> u64 {
    10
}
fn default_queue_capacity() -> usize {
    20_480
}
fn default_report_interval_ms() -> u64 {
    1_000
}
fn default_stat_alive_secs() -> u64 {
    60
}
fn default_latency_tolerance() -> i64 {
    5_000
}
fn default_read_count() -> usize {
    10_000
}
fn default_block_ms() -> u64 {
    1_000
}
fn default_error_backoff_ms() -> u64 {
    1_000
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_len: default_max_len(),
            batch_size: default_batch_size(),
            linger_ms: default_linger_ms(),
            queue_capacity: default_queue_capacity(),
            report_interval_ms: default_report_interval_ms(),
            stat_alive_secs: default_stat_alive_secs(),
            latency_tolerance: default_latency_tolerance(),
            read_count: default_read_count(),
            block_ms: default_block_ms(),
            error_backoff_ms: default_error_backoff_ms(),
        }
    }
}

impl StreamConfig {
    pub fn validate(&self) -> Result<(), StreamError> {
        let nonzero = [
            ("batch_size", self.batch_size as u64),
            ("queue_capacity", self.queue_capacity as u64),
            ("report_interval_ms", self.report_interval_ms),
            ("read_count", self.read_count as u64),
            ("block_ms", self.block_ms),
            ("error_backoff_ms", self.error_backoff_ms),
        ];
        for (field, value) in nonzero {
            if value == 0 {
                return Err(StreamError::Config(format!("{field} must be greater than 0")));
            }
        }
        if self.latency_tolerance < 0 {
            return Err(StreamError::Config("latency_tolerance must not be negative".into()));
        }
        Ok(())
    }

    pub fn linger(&self) -> Duration {
        Duration::from_millis(self.linger_ms)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }

    pub fn stat_alive(&self) -> Duration {
        Duration::from_secs(self.stat_alive_secs)
    }

    pub fn block(&self) -> Duration {
        Duration::from_millis(self.block_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = StreamConfig::default();
        assert_eq!(cfg.max_len, 10_000);
        assert_eq!(cfg.batch_size, 32);
        assert_eq!(cfg.linger(), Duration::from_millis(10));
        assert_eq!(cfg.queue_capacity, 20_480);
        assert_eq!(cfg.report_interval(), Duration::from_secs(1));
        assert_eq!(cfg.stat_alive(), Duration::from_secs(60));
        assert_eq!(cfg.latency_tolerance, 5_000);
        assert_eq!(cfg.read_count, 10_000);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_config_fills_defaults() {
        let cfg: StreamConfig = serde_json::from_str(r#"{"batch_size": 8}"#).expect("parse");
        assert_eq!(cfg.batch_size, 8);
        assert_eq!(cfg.block_ms, 1_000);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let cfg = StreamConfig {
            batch_size: 0,
            ..StreamConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(StreamError::Config(_))));
    }
}
