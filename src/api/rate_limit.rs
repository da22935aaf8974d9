use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use log::debug;

/// Spaces requests per provider key by a minimum interval.
#[derive(Debug, Default)]
pub struct RateLimiter {
    limits: HashMap<String, (Duration, Instant)>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            limits: HashMap::new(),
        }
    }

    pub fn check(&mut self, key: &str, limit: Duration) -> bool {
        if let Some((duration, last_call)) = self.limits.get(key) {
            if last_call.elapsed() < *duration {
                return false;
            }
        }

        self.limits.insert(key.to_string(), (limit, Instant::now()));
        true
    }

    /// How long until `key` may call again.
    pub fn remaining(&self, key: &str) -> Duration {
        match self.limits.get(key) {
            Some((duration, last_call)) => duration.saturating_sub(last_call.elapsed()),
            None => Duration::ZERO,
        }
    }
}

/// Waits for `key`'s turn on a shared limiter. The lock is only held to check,
/// so a wait on one key never delays another.
pub async fn wait_turn(limiter: &Mutex<RateLimiter>, key: &str, limit: Duration) {
    loop {
        let wait = {
            let mut limiter = limiter.lock().await;
            if limiter.check(key, limit) {
                return;
            }
            limiter.remaining(key).max(Duration::from_millis(10))
        };
        debug!("Rate limit wait for {}: {}ms", key, wait.as_millis());
        tokio::time::sleep(wait).await;
    }
}
