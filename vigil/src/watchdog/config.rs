//! Timing configuration for the circuit watchdogs.
//!
//! # Tuning Guidelines
//!
//! - `period` bounds how long a silent server goes unnoticed before the first
//!   echo probe; total detection time is `period + echo_timeout`.
//! - `echo_timeout` must cover a full round trip plus the server's scheduling
//!   latency under load. Too short and busy servers get disconnected.
//! - `send_period` bounds how long a send may block without any progress before
//!   the receive side is asked to probe.
//!
//! The defaults suit a control-system LAN where servers beacon every few
//! seconds and circuits idle for long stretches.

use std::time::Duration;

/// Environment variable overriding [`WatchdogConfig::period`], in seconds.
pub const ENV_CONN_TMO: &str = "VIGIL_CONN_TMO";

/// Environment variable overriding [`WatchdogConfig::echo_timeout`], in seconds.
pub const ENV_ECHO_TMO: &str = "VIGIL_ECHO_TMO";

/// Longest accepted duration; deadlines are computed as `now + duration`.
pub const MAX_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Invalid watchdog configuration.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A duration that must be positive was zero.
    #[error("{name} must be > 0")]
    NonPositive {
        /// Field name.
        name: &'static str,
    },
    /// A duration exceeded [`MAX_DURATION`].
    #[error("{name} must be <= {max:?}")]
    TooLarge {
        /// Field name.
        name: &'static str,
        /// Upper bound.
        max: Duration,
    },
    /// An environment override did not parse as a positive number of seconds
    /// within [`MAX_DURATION`].
    #[error("invalid value {value:?} for {var}: expected positive seconds up to one day")]
    InvalidEnv {
        /// Variable name.
        var: &'static str,
        /// Raw value.
        value: String,
    },
}

/// Timing configuration shared by the receive and send watchdogs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchdogConfig {
    /// Idle time without inbound traffic before an echo probe is sent.
    ///
    /// **Default**: 30s
    pub period: Duration,

    /// How long an outstanding echo probe may go unanswered.
    ///
    /// **Default**: 5s
    pub echo_timeout: Duration,

    /// How long a send may block without progress before the stall is reported.
    ///
    /// **Default**: 30s
    pub send_period: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(30),
            echo_timeout: Duration::from_secs(5),
            send_period: Duration::from_secs(30),
        }
    }
}

impl WatchdogConfig {
    /// Configuration for a quiet local network with fast servers.
    #[must_use]
    pub fn lan() -> Self {
        Self {
            period: Duration::from_secs(10),
            echo_timeout: Duration::from_secs(2),
            send_period: Duration::from_secs(10),
        }
    }

    /// Configuration for high-latency or congested links.
    #[must_use]
    pub fn wan() -> Self {
        Self {
            period: Duration::from_secs(60),
            echo_timeout: Duration::from_secs(15),
            send_period: Duration::from_secs(60),
        }
    }

    /// Defaults overridden by [`ENV_CONN_TMO`] and [`ENV_ECHO_TMO`] when set.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but not a positive, finite number
    /// of seconds.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(value) = lookup(ENV_CONN_TMO) {
            config.period = parse_seconds(ENV_CONN_TMO, &value)?;
        }
        if let Some(value) = lookup(ENV_ECHO_TMO) {
            config.echo_timeout = parse_seconds(ENV_ECHO_TMO, &value)?;
        }
        Ok(config)
    }

    /// Checks that every duration is positive and at most [`MAX_DURATION`].
    ///
    /// # Errors
    ///
    /// Returns the first out-of-range duration found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("period", self.period),
            ("echo_timeout", self.echo_timeout),
            ("send_period", self.send_period),
        ] {
            if value.is_zero() {
                return Err(ConfigError::NonPositive { name });
            }
            if value > MAX_DURATION {
                return Err(ConfigError::TooLarge {
                    name,
                    max: MAX_DURATION,
                });
            }
        }
        Ok(())
    }

    /// Builder-style setter for the idle period.
    #[must_use]
    pub const fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Builder-style setter for the echo timeout.
    #[must_use]
    pub const fn with_echo_timeout(mut self, timeout: Duration) -> Self {
        self.echo_timeout = timeout;
        self
    }

    /// Builder-style setter for the send stall period.
    #[must_use]
    pub const fn with_send_period(mut self, period: Duration) -> Self {
        self.send_period = period;
        self
    }
}

fn parse_seconds(var: &'static str, value: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidEnv {
        var,
        value: value.to_owned(),
    };
    let secs: f64 = value.trim().parse().map_err(|_| invalid())?;
    if !(secs.is_finite() && secs > 0.0) {
        return Err(invalid());
    }
    Duration::try_from_secs_f64(secs)
        .ok()
        .filter(|d| *d <= MAX_DURATION)
        .ok_or_else(invalid)
}
