use std::path::PathBuf;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::transport::RetryPolicy;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UsbConfig {
    /// Restrict the device search to this vendor id.
    pub vid: Option<u16>,
    /// Restrict the device search to this product id.
    pub pid: Option<u16>,
    /// Per-transfer bulk timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for UsbConfig {
    fn default() -> Self {
        Self {
            vid: None,
            pid: None,
            timeout_ms: 5000,
        }
    }
}

impl UsbConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub interval_ms: u64,
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.interval_ms))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShutterCountConfig {
    pub usb: UsbConfig,
    /// Empty-read tolerance while waiting for a container.
    pub header_wait: RetryConfig,
    /// Bounds on draining queued vendor events.
    pub event_drain: RetryConfig,
    /// Bounds on polling for a requested property change.
    pub prop_poll: RetryConfig,
}

impl Default for ShutterCountConfig {
    fn default() -> Self {
        Self {
            usb: UsbConfig::default(),
            header_wait: RetryConfig {
                max_attempts: 3,
                interval_ms: 10,
            },
            event_drain: RetryConfig {
                max_attempts: 5,
                interval_ms: 0,
            },
            prop_poll: RetryConfig {
                max_attempts: 5,
                interval_ms: 200,
            },
        }
    }
}

impl ShutterCountConfig {
    pub fn read() -> Result<Self, ConfigError> {
        let mut c = Config::new();

        c.merge(Environment::with_prefix("SHUTTER_COUNT"))?;

        c.try_into()
    }

    pub fn read_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let mut c = Config::new();

        c.merge(File::from(path))?;
        c.merge(Environment::with_prefix("SHUTTER_COUNT"))?;

        c.try_into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_protocol_bounds() {
        let config = ShutterCountConfig::default();

        assert_eq!(config.header_wait.max_attempts, 3);
        assert_eq!(
            config.header_wait.policy().interval,
            Duration::from_millis(10)
        );
        assert_eq!(config.event_drain.max_attempts, 5);
        assert_eq!(
            config.prop_poll.policy().interval,
            Duration::from_millis(200)
        );
        assert_eq!(config.usb.timeout(), Duration::from_secs(5));
    }
}
