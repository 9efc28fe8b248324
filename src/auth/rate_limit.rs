use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use chrono::{DateTime, Utc, Duration};

use crate::config::AuthConfig;

#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    pub window_size: Duration,
    pub max_failures: u32,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            window_size: Duration::minutes(15),
            max_failures: 5,
        }
    }
}

impl From<&AuthConfig> for ThrottleConfig {
    fn from(auth: &AuthConfig) -> Self {
        Self {
            window_size: Duration::seconds(auth.failed_login_window_secs),
            max_failures: auth.max_failed_logins,
        }
    }
}

#[derive(Debug, Default)]
struct FailureWindow {
    timestamps: Vec<DateTime<Utc>>,
}

impl FailureWindow {
    fn cleanup_old_failures(&mut self, window_size: Duration) {
        let cutoff = Utc::now() - window_size;
        self.timestamps.retain(|ts| *ts > cutoff);
    }
}

/// Sliding-window count of failed logins per key.
///
/// The session manager keys by account id once the account is known and by
/// the normalized identifier otherwise, so attempts against an unknown handle
/// are throttled exactly like attempts against a real one.
#[derive(Clone)]
pub struct LoginThrottle {
    windows: Arc<RwLock<HashMap<String, FailureWindow>>>,
    config: ThrottleConfig,
}

impl LoginThrottle {
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            windows: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// False once `max_failures` failures fall inside the window.
    pub async fn is_allowed(&self, identifier: &str) -> bool {
        let mut windows = self.windows.write().await;
        match windows.get_mut(identifier) {
            Some(window) => {
                window.cleanup_old_failures(self.config.window_size);
                window.timestamps.len() < self.config.max_failures as usize
            }
            None => true,
        }
    }

    pub async fn record_failure(&self, identifier: &str) {
        let mut windows = self.windows.write().await;
        let window = windows.entry(identifier.to_string()).or_default();
        window.cleanup_old_failures(self.config.window_size);
        window.timestamps.push(Utc::now());
    }

    pub async fn reset(&self, identifier: &str) {
        self.windows.write().await.remove(identifier);
    }

    pub async fn cleanup(&self) {
        let mut windows = self.windows.write().await;

        windows.retain(|_, window| {
            window.cleanup_old_failures(self.config.window_size);
            !window.timestamps.is_empty()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, Duration as TokioDuration};

    #[tokio::test]
    async fn test_blocks_after_max_failures() {
        let throttle = LoginThrottle::new(ThrottleConfig {
            window_size: Duration::seconds(1),
            max_failures: 3,
        });

        for _ in 0..3 {
            assert!(throttle.is_allowed("alice").await);
            throttle.record_failure("alice").await;
        }
        assert!(!throttle.is_allowed("alice").await);
        assert!(throttle.is_allowed("bob").await);

        sleep(TokioDuration::from_millis(1100)).await;

        assert!(throttle.is_allowed("alice").await);
    }

    #[test]
    fn test_keys_are_independent() {
        let throttle = LoginThrottle::new(ThrottleConfig {
            window_size: Duration::minutes(1),
            max_failures: 1,
        });

        tokio_test::block_on(async {
            throttle.record_failure("alice").await;
            assert!(!throttle.is_allowed("alice").await);
            assert!(throttle.is_allowed("Alice").await);
            assert!(throttle.is_allowed("alice@example.com").await);
        });
    }

    #[tokio::test]
    async fn test_reset_and_cleanup() {
        let throttle = LoginThrottle::new(ThrottleConfig {
            window_size: Duration::milliseconds(50),
            max_failures: 1,
        });

        throttle.record_failure("alice").await;
        assert!(!throttle.is_allowed("alice").await);
        throttle.reset("alice").await;
        assert!(throttle.is_allowed("alice").await);

        throttle.record_failure("carol").await;
        sleep(TokioDuration::from_millis(80)).await;
        throttle.cleanup().await;
        assert!(throttle.windows.read().await.is_empty());
    }
}
