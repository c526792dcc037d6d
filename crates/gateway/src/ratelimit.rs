use foliolink_core::GatewayError;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::warn;

/// Decides how long a resource stays cold after a rate-limit response.
/// The concrete policy is pluggable; this core only enforces the cooldown.
pub trait BackoffPolicy: Send + Sync {
    /// Cooldown to apply after the nth consecutive rate-limit hit.
    fn cooldown(&self, hits: u32) -> Duration;
}

/// Flat cooldown regardless of how many hits a resource has taken.
#[derive(Debug, Clone)]
pub struct FixedBackoff {
    pub cooldown: Duration,
}

impl Default for FixedBackoff {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy for FixedBackoff {
    fn cooldown(&self, _hits: u32) -> Duration {
        self.cooldown
    }
}

#[derive(Debug)]
struct CooldownEntry {
    until: Instant,
    hits: u32,
}

/// Per-resource-key cooldown tracking for upstream rate limits.
///
/// A key is a logical resource (e.g. `"balances:acct-42"`), not an endpoint,
/// so one throttled account does not cool the whole gateway.
pub struct CooldownTracker {
    policy: Box<dyn BackoffPolicy>,
    entries: Mutex<HashMap<String, CooldownEntry>>,
}

impl CooldownTracker {
    pub fn new(policy: Box<dyn BackoffPolicy>) -> Self {
        Self {
            policy,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Fail fast with `RateLimited` while the resource is still cooling.
    pub fn check(&self, resource: &str) -> Result<(), GatewayError> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.get(resource) {
            if Instant::now() < entry.until {
                return Err(GatewayError::RateLimited {
                    resource: resource.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Arm or extend the cooldown after an upstream 429.
    pub fn record_rate_limit(&self, resource: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let hits = entries.get(resource).map(|e| e.hits + 1).unwrap_or(1);
        let cooldown = self.policy.cooldown(hits);
        warn!(resource = %resource, hits, cooldown_ms = cooldown.as_millis() as u64, "Rate limited, arming cooldown");
        entries.insert(
            resource.to_string(),
            CooldownEntry {
                until: Instant::now() + cooldown,
                hits,
            },
        );
    }

    /// Clear the hit counter once the resource answers normally again.
    pub fn record_success(&self, resource: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(resource);
    }
}

impl Default for CooldownTracker {
    fn default() -> Self {
        Self::new(Box::new(FixedBackoff::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cooldown_blocks_after_rate_limit() {
        let tracker = CooldownTracker::new(Box::new(FixedBackoff {
            cooldown: Duration::from_secs(60),
        }));
        assert!(tracker.check("balances:a1").is_ok());

        tracker.record_rate_limit("balances:a1");
        match tracker.check("balances:a1") {
            Err(GatewayError::RateLimited { resource }) => assert_eq!(resource, "balances:a1"),
            other => panic!("Expected RateLimited, got {:?}", other),
        }

        // Other resources are unaffected.
        assert!(tracker.check("balances:a2").is_ok());
    }

    #[test]
    fn test_success_clears_cooldown() {
        let tracker = CooldownTracker::new(Box::new(FixedBackoff {
            cooldown: Duration::from_secs(60),
        }));
        tracker.record_rate_limit("orders:a1");
        tracker.record_success("orders:a1");
        assert!(tracker.check("orders:a1").is_ok());
    }

    #[test]
    fn test_zero_cooldown_policy_never_blocks() {
        let tracker = CooldownTracker::new(Box::new(FixedBackoff {
            cooldown: Duration::ZERO,
        }));
        tracker.record_rate_limit("quotes:a1");
        assert!(tracker.check("quotes:a1").is_ok());
    }
}
