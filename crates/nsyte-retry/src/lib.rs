//! Retry backoff and jitter calculation.
//!
//! Pure, runtime-agnostic math: this crate returns a [`std::time::Duration`]
//! to wait, it never sleeps itself. That keeps it usable from the async
//! fan-out executor without pulling tokio into every call site that only
//! wants the numbers.
//!
//! # Example
//!
//! ```
//! use nsyte_retry::{RetryPolicy, calculate_delay};
//!
//! let config = RetryPolicy::Default.to_config();
//! let delay = calculate_delay(&config, 2);
//! assert!(delay <= config.max_delay);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Strategy for calculating delay between retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategyType {
    Immediate,
    #[default]
    Exponential,
    Linear,
    Constant,
}

/// Predefined retry policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicy {
    #[default]
    Default,
    Aggressive,
    Conservative,
    Custom,
}

impl RetryPolicy {
    pub fn to_config(&self) -> RetryStrategyConfig {
        match self {
            RetryPolicy::Default => RetryStrategyConfig {
                strategy: RetryStrategyType::Exponential,
                max_attempts: 3,
                base_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(30),
                jitter: 0.3,
            },
            RetryPolicy::Aggressive => RetryStrategyConfig {
                strategy: RetryStrategyType::Exponential,
                max_attempts: 6,
                base_delay: Duration::from_millis(200),
                max_delay: Duration::from_secs(15),
                jitter: 0.2,
            },
            RetryPolicy::Conservative => RetryStrategyConfig {
                strategy: RetryStrategyType::Linear,
                max_attempts: 3,
                base_delay: Duration::from_secs(2),
                max_delay: Duration::from_secs(60),
                jitter: 0.1,
            },
            RetryPolicy::Custom => RetryStrategyConfig::default(),
        }
    }
}

/// Configuration for a retry strategy. Matches the fan-out executor's
/// `retry_attempts` / `retry_backoff_ms` options (default policy:
/// 3 attempts, 500ms initial backoff, doubling, capped at 30s).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryStrategyConfig {
    #[serde(default)]
    pub strategy: RetryStrategyType,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay")]
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    #[serde(default = "default_max_delay")]
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_jitter() -> f64 {
    0.3
}

impl Default for RetryStrategyConfig {
    fn default() -> Self {
        Self {
            strategy: RetryStrategyType::Exponential,
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            jitter: default_jitter(),
        }
    }
}

/// Calculate the delay before retry attempt `attempt` (1-indexed).
pub fn calculate_delay(config: &RetryStrategyConfig, attempt: u32) -> Duration {
    let delay = match config.strategy {
        RetryStrategyType::Immediate => Duration::ZERO,
        RetryStrategyType::Exponential => {
            let pow = attempt.saturating_sub(1).min(16);
            config.base_delay.saturating_mul(2_u32.saturating_pow(pow))
        }
        RetryStrategyType::Linear => config.base_delay.saturating_mul(attempt),
        RetryStrategyType::Constant => config.base_delay,
    };

    let capped = delay.min(config.max_delay);

    if config.jitter > 0.0 {
        apply_jitter(capped, config.jitter)
    } else {
        capped
    }
}

/// Jitter factor of 0.5 means delay * (0.5 .. 1.5).
fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    use rand::Rng;

    let jitter_range = 2.0 * jitter;
    let mut rng = rand::rng();
    let random_value: f64 = rng.random();
    let random_factor = 1.0 - jitter + (random_value * jitter_range);
    let millis = (delay.as_millis() as f64 * random_factor).round() as u64;
    Duration::from_millis(millis)
}

/// True if a transient error should still be retried
/// given attempts already made.
pub fn should_retry(config: &RetryStrategyConfig, attempts_made: u32) -> bool {
    attempts_made < config.max_attempts
}

#[cfg(feature = "cancellable-sleep")]
mod cancellable {
    use super::*;
    use tokio_util::sync::CancellationToken;

    /// Sleeps for `delay`, returning early if `cancel` fires. Used by
    /// the fan-out executor between retry attempts so a cancelled run
    /// does not block on a long backoff.
    pub async fn sleep_cancellable(delay: Duration, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = cancel.cancelled() => false,
        }
    }
}

#[cfg(feature = "cancellable-sleep")]
pub use cancellable::sleep_cancellable;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_matches_documented_presets() {
        let cfg = RetryPolicy::Default.to_config();
        assert_eq!(cfg.strategy, RetryStrategyType::Exponential);
        assert_eq!(cfg.max_attempts, 3);
        assert_eq!(cfg.base_delay, Duration::from_millis(500));
        assert_eq!(cfg.max_delay, Duration::from_secs(30));
    }

    #[test]
    fn exponential_delay_doubles_without_jitter() {
        let cfg = RetryStrategyConfig {
            strategy: RetryStrategyType::Exponential,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: 0.0,
            max_attempts: 10,
        };
        assert_eq!(calculate_delay(&cfg, 1), Duration::from_secs(1));
        assert_eq!(calculate_delay(&cfg, 2), Duration::from_secs(2));
        assert_eq!(calculate_delay(&cfg, 3), Duration::from_secs(4));
    }

    #[test]
    fn exponential_delay_caps_at_max_delay() {
        let cfg = RetryStrategyConfig {
            strategy: RetryStrategyType::Exponential,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            jitter: 0.0,
            max_attempts: 10,
        };
        assert_eq!(calculate_delay(&cfg, 10), Duration::from_secs(5));
    }

    #[test]
    fn linear_delay_scales_with_attempt() {
        let cfg = RetryStrategyConfig {
            strategy: RetryStrategyType::Linear,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            jitter: 0.0,
            max_attempts: 10,
        };
        assert_eq!(calculate_delay(&cfg, 3), Duration::from_secs(6));
    }

    #[test]
    fn constant_delay_is_fixed() {
        let cfg = RetryStrategyConfig {
            strategy: RetryStrategyType::Constant,
            base_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(60),
            jitter: 0.0,
            max_attempts: 10,
        };
        assert_eq!(calculate_delay(&cfg, 1), Duration::from_secs(3));
        assert_eq!(calculate_delay(&cfg, 5), Duration::from_secs(3));
    }

    #[test]
    fn immediate_strategy_has_zero_delay() {
        let cfg = RetryStrategyConfig {
            strategy: RetryStrategyType::Immediate,
            base_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(60),
            jitter: 0.0,
            max_attempts: 10,
        };
        assert_eq!(calculate_delay(&cfg, 1), Duration::ZERO);
    }

    #[test]
    fn jitter_stays_within_expected_range() {
        let cfg = RetryStrategyConfig {
            strategy: RetryStrategyType::Constant,
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(60),
            jitter: 0.5,
            max_attempts: 10,
        };
        for _ in 0..100 {
            let delay = calculate_delay(&cfg, 1);
            assert!(delay >= Duration::from_secs(5));
            assert!(delay <= Duration::from_secs(15));
        }
    }

    #[test]
    fn should_retry_respects_max_attempts() {
        let cfg = RetryPolicy::Default.to_config();
        assert!(should_retry(&cfg, 0));
        assert!(should_retry(&cfg, 2));
        assert!(!should_retry(&cfg, 3));
    }

    #[tokio::test]
    async fn sleep_cancellable_returns_false_on_cancel() {
        use tokio_util::sync::CancellationToken;

        let token = CancellationToken::new();
        let token2 = token.clone();
        token.cancel();
        let completed = sleep_cancellable(Duration::from_secs(60), &token2).await;
        assert!(!completed);
    }

    #[tokio::test]
    async fn sleep_cancellable_returns_true_when_not_cancelled() {
        use tokio_util::sync::CancellationToken;

        let token = CancellationToken::new();
        let completed = sleep_cancellable(Duration::from_millis(1), &token).await;
        assert!(completed);
    }
}
