//! Kernel configuration.

use std::time::Duration;

use rand::Rng;

/// Back-off of the lock retry protocol.
///
/// When a thread that already holds a model lock cannot take another one
/// without blocking, its outermost lock frame releases everything, pauses and
/// retries. The pause grows exponentially from `min_pause` up to `max_pause`
/// with jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct LockConfig {
    /// Pause before the first retry.
    pub min_pause: Duration,
    /// Upper bound of any single pause.
    pub max_pause: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            min_pause: Duration::from_millis(1),
            max_pause: Duration::from_millis(100),
        }
    }
}

impl LockConfig {
    /// Pause before retry number `attempt` (starting at 1).
    pub fn pause(&self, attempt: u32) -> Duration {
        let base = self
            .min_pause
            .saturating_mul(1 << attempt.saturating_sub(1).min(16))
            .min(self.max_pause);
        // up to 50% jitter so contending threads drift apart
        let jitter = base.mul_f64(rand::thread_rng().gen_range(0.0..0.5));
        base.saturating_sub(jitter)
    }
}

/// Configuration of a [`Manager`](crate::Manager).
///
/// # Example
///
/// ```rust
/// use fedfs_kernel::ManagerConfig;
///
/// let config = ManagerConfig::default();
/// assert!(config.lock.min_pause <= config.lock.max_pause);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ManagerConfig {
    /// Lock retry back-off.
    pub lock: LockConfig,
}

#[cfg(feature = "serde")]
impl ManagerConfig {
    /// Parse a configuration from JSON; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// The `serde_json` error if the input is not a valid configuration.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pause_is_bounded() {
        let config = LockConfig::default();
        for attempt in 1..40 {
            let pause = config.pause(attempt);
            assert!(pause <= config.max_pause);
        }
    }

    #[test]
    fn pause_grows() {
        let config = LockConfig {
            min_pause: Duration::from_millis(2),
            max_pause: Duration::from_secs(10),
        };
        // jitter removes at most half, so attempt 4 (base 16ms) beats attempt 1 (base 2ms)
        assert!(config.pause(4) > config.pause(1));
    }

    #[test]
    fn jitter_removes_at_most_half() {
        let config = LockConfig {
            min_pause: Duration::from_millis(10),
            max_pause: Duration::from_millis(10),
        };
        for attempt in 1..200 {
            let pause = config.pause(attempt);
            assert!(pause >= Duration::from_millis(5), "{pause:?}");
            assert!(pause <= Duration::from_millis(10), "{pause:?}");
        }
    }

    #[cfg(feature = "serde")]
    #[test]
    fn config_from_json_fills_defaults() {
        let config = ManagerConfig::from_json("{}").unwrap();
        assert_eq!(config, ManagerConfig::default());
    }
}
