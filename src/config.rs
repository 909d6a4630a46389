// src/config.rs

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::errors::FatalError;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_13_2) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/63.0.3239.84 Safari/537.36";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    Fixed,
    Exponential,
}

/// Tunables for a scan run. Durations are in milliseconds so the JSON config
/// file stays flat.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub concurrency: usize,
    pub connect_timeout_ms: u64,
    pub port_retries: u32,
    pub retry_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff: Backoff,
    pub http_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    pub dns_timeout_ms: u64,
    pub whois_timeout_ms: u64,
    pub whois_enabled: bool,
    pub user_agent: String,
    pub max_body_bytes: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            connect_timeout_ms: 3_000,
            port_retries: 2,
            retry_backoff_ms: 500,
            max_backoff_ms: 4_000,
            backoff: Backoff::Exponential,
            http_timeout_ms: 10_000,
            handshake_timeout_ms: 5_000,
            dns_timeout_ms: 3_000,
            whois_timeout_ms: 5_000,
            whois_enabled: true,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_body_bytes: 1024 * 1024,
        }
    }
}

impl ScanConfig {
    /// Reads a JSON config file. Missing keys fall back to the defaults.
    pub fn from_file(path: &Path) -> Result<Self, FatalError> {
        let raw = std::fs::read_to_string(path).map_err(|source| FatalError::UnreadableConfig {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| FatalError::MalformedConfig {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), FatalError> {
        if self.concurrency == 0 {
            return Err(FatalError::InvalidConfig("concurrency must be at least 1".into()));
        }
        let timeouts = [
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("http_timeout_ms", self.http_timeout_ms),
            ("handshake_timeout_ms", self.handshake_timeout_ms),
            ("dns_timeout_ms", self.dns_timeout_ms),
            ("whois_timeout_ms", self.whois_timeout_ms),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, value)| *value == 0) {
            return Err(FatalError::InvalidConfig(format!("{name} must be greater than zero")));
        }
        if self.max_backoff_ms < self.retry_backoff_ms {
            return Err(FatalError::InvalidConfig(
                "max_backoff_ms must not be smaller than retry_backoff_ms".into(),
            ));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn dns_timeout(&self) -> Duration {
        Duration::from_millis(self.dns_timeout_ms)
    }

    pub fn whois_timeout(&self) -> Duration {
        Duration::from_millis(self.whois_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.port_retries,
            backoff: self.backoff,
            base_delay: Duration::from_millis(self.retry_backoff_ms),
            max_delay: Duration::from_millis(self.max_backoff_ms),
        }
    }
}

/// Bounded retry schedule for the port prober.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub backoff: Backoff,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based), never above `max_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let delay = match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Exponential => {
                let factor = 2u32.saturating_pow(retry.saturating_sub(1));
                self.base_delay.saturating_mul(factor)
            }
        };
        delay.min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_is_capped() {
        let policy = RetryPolicy {
            retries: 6,
            backoff: Backoff::Exponential,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(3_000),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(2_000));
        assert_eq!(policy.delay_for(4), Duration::from_millis(3_000));
        assert_eq!(policy.delay_for(40), Duration::from_millis(3_000));
    }

    #[test]
    fn fixed_backoff_stays_flat() {
        let policy = RetryPolicy {
            retries: 3,
            backoff: Backoff::Fixed,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_millis(1_000),
        };
        assert_eq!(policy.delay_for(1), policy.delay_for(3));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: ScanConfig =
            serde_json::from_str(r#"{"concurrency": 32, "backoff": "fixed"}"#).unwrap();
        assert_eq!(config.concurrency, 32);
        assert_eq!(config.backoff, Backoff::Fixed);
        assert_eq!(config.http_timeout_ms, ScanConfig::default().http_timeout_ms);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let config = ScanConfig { concurrency: 0, ..Default::default() };
        assert!(matches!(config.validate(), Err(FatalError::InvalidConfig(_))));

        let config = ScanConfig { http_timeout_ms: 0, ..Default::default() };
        assert!(config.validate().is_err());
    }
}
