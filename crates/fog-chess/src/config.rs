use std::time::Duration;

use crate::error::ConfigError;
use crate::types::GameMode;

/// Configuration for the Session Engine.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Initial clock for Standard games, in whole seconds. Default: 600.
    pub standard_clock_secs: u32,
    /// Initial clock for Blitz games, in whole seconds. Default: 180.
    pub blitz_clock_secs: u32,
    /// How often the per-match clock task fires. Default: 1s.
    pub tick_interval: Duration,
    /// How long a finished session stays in the in-memory table before it
    /// is evicted. The persisted copy is unaffected. Default: 5 minutes.
    pub retention: Duration,
    /// Upper bound on a single Chess Rules Oracle call. Elapsing maps to
    /// `OracleUnavailable`. Default: 5s.
    pub oracle_timeout: Duration,
    /// Randomly assign colors on creation. When false the first player is
    /// white. Default: true.
    pub randomize_colors: bool,
}

impl SessionConfig {
    /// Initial clock for the given mode.
    #[must_use]
    pub const fn initial_clock_secs(&self, mode: GameMode) -> u32 {
        match mode {
            GameMode::Standard => self.standard_clock_secs,
            GameMode::Blitz => self.blitz_clock_secs,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            standard_clock_secs: 600,
            blitz_clock_secs: 180,
            tick_interval: Duration::from_secs(1),
            retention: Duration::from_secs(300),
            oracle_timeout: Duration::from_secs(5),
            randomize_colors: true,
        }
    }
}

/// Configuration for the matchmaking queues.
#[derive(Debug, Clone)]
pub struct MatchmakingConfig {
    /// Interval between pairing passes. Default: 5s.
    pub pairing_interval: Duration,
    /// Rating difference accepted with no wait. Default: 200.
    pub base_threshold: u32,
    /// Each full interval waited widens the threshold by `relax_step`.
    /// Default: 10s.
    pub relax_interval: Duration,
    /// Default: 50.
    pub relax_step: u32,
}

impl Default for MatchmakingConfig {
    fn default() -> Self {
        Self {
            pairing_interval: Duration::from_secs(5),
            base_threshold: 200,
            relax_interval: Duration::from_secs(10),
            relax_step: 50,
        }
    }
}

/// Bounded retry policy for writes to external ports (persistence and
/// rating updates).
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts after the first failure before giving up. Default: 5.
    pub max_retries: u32,
    /// Backoff before the first retry; doubles on each attempt. Default: 100ms.
    pub initial_backoff: Duration,
    /// Backoff cap. Default: 5s.
    pub max_backoff: Duration,
}

impl RetryConfig {
    /// Backoff to wait before retry number `attempt` (1-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}

/// Complete server configuration.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    pub session: SessionConfig,
    pub matchmaking: MatchmakingConfig,
    pub retry: RetryConfig,
}

impl ServerConfig {
    /// Validate configuration values.
    ///
    /// Checks:
    /// - both initial clocks are non-zero
    /// - every interval and timeout is non-zero
    /// - `initial_backoff <= max_backoff`
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| {
            Err(ConfigError::Invalid {
                reason: reason.to_string(),
            })
        };
        if self.session.standard_clock_secs == 0 {
            return invalid("standard_clock_secs must be >= 1");
        }
        if self.session.blitz_clock_secs == 0 {
            return invalid("blitz_clock_secs must be >= 1");
        }
        if self.session.tick_interval.is_zero() {
            return invalid("tick_interval must be > 0");
        }
        if self.session.retention.is_zero() {
            return invalid("retention must be > 0");
        }
        if self.session.oracle_timeout.is_zero() {
            return invalid("oracle_timeout must be > 0");
        }
        if self.matchmaking.pairing_interval.is_zero() {
            return invalid("pairing_interval must be > 0");
        }
        if self.matchmaking.relax_interval.is_zero() {
            return invalid("relax_interval must be > 0");
        }
        if self.retry.initial_backoff.is_zero() {
            return invalid("initial_backoff must be > 0");
        }
        if self.retry.initial_backoff > self.retry.max_backoff {
            return Err(ConfigError::Invalid {
                reason: format!(
                    "initial_backoff ({:?}) must not exceed max_backoff ({:?})",
                    self.retry.initial_backoff, self.retry.max_backoff
                ),
            });
        }
        Ok(())
    }
}
