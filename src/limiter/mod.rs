//! Write-path abuse limiter.
//!
//! Two independent gates guard comment submission:
//!
//! 1. **Global flood gate**: sliding window over every accepted write,
//!    regardless of who made it.
//! 2. **Cooldown gate**: minimum spacing between accepted writes from one
//!    client identity.
//!
//! Both gates are checked and, on approval, recorded under one critical
//! section. Rejections never change state.

mod identity;

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use metrics::counter;
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::cache::lock::mutex_lock;
use crate::clock::SharedClock;

pub use identity::{FORWARDED_HEADERS, IdentityKey, UNKNOWN_ADDR, is_public, resolve_client_ip};

const SOURCE: &str = "limiter";

const METRIC_ALLOWED: &str = "contentgate_rate_limit_allowed_total";
const METRIC_REJECTED: &str = "contentgate_rate_limit_rejected_total";

/// Identity count above which accepted writes also prune idle identities.
const PRUNE_SOFT_BOUND: usize = 10_000;

/// Limits applied to one check, taken from the runtime settings snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitPolicy {
    pub cooldown: Duration,
    pub flood_threshold: u32,
    pub flood_window: Duration,
}

/// Which gate rejected a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    GlobalFlood,
    Cooldown,
}

impl Gate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GlobalFlood => "global_flood",
            Self::Cooldown => "cooldown",
        }
    }
}

/// Outcome of [`RateLimiter::check_and_record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    GlobalFloodRejected,
    CooldownRejected {
        /// Remaining wait, rounded up to whole minutes, in seconds.
        retry_after_secs: u64,
        /// Configured cooldown, for client-facing messages.
        cooldown_minutes: u64,
    },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    pub fn gate(&self) -> Option<Gate> {
        match self {
            Self::Allowed => None,
            Self::GlobalFloodRejected => Some(Gate::GlobalFlood),
            Self::CooldownRejected { .. } => Some(Gate::Cooldown),
        }
    }
}

/// Process-wide limiter state.
pub struct RateLimiter {
    // Accepted write times, oldest first.
    recent: Mutex<VecDeque<OffsetDateTime>>,
    last_action: DashMap<IdentityKey, OffsetDateTime>,
    clock: SharedClock,
}

impl RateLimiter {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            recent: Mutex::new(VecDeque::new()),
            last_action: DashMap::new(),
            clock,
        }
    }

    /// Runs both gates for `identity` and records the write if both pass.
    pub fn check_and_record(&self, identity: &IdentityKey, policy: &LimitPolicy) -> Decision {
        let now = self.clock.now();
        let decision = self.decide(identity, policy, now);

        match decision.gate() {
            None => {
                counter!(METRIC_ALLOWED).increment(1);
                debug!(identity = %identity, "write allowed");
                if self.last_action.len() > PRUNE_SOFT_BOUND {
                    self.prune_at(now, policy.cooldown);
                }
            }
            Some(gate) => {
                counter!(METRIC_REJECTED, "gate" => gate.as_str()).increment(1);
                info!(identity = %identity, gate = gate.as_str(), "write rejected");
            }
        }
        decision
    }

    fn decide(&self, identity: &IdentityKey, policy: &LimitPolicy, now: OffsetDateTime) -> Decision {
        // Lock order: global window, then the identity's shard.
        let mut recent = mutex_lock(&self.recent, SOURCE, "check_and_record");
        let window_start = now - policy.flood_window;
        while recent.front().is_some_and(|at| *at < window_start) {
            recent.pop_front();
        }
        if recent.len() >= policy.flood_threshold as usize {
            return Decision::GlobalFloodRejected;
        }

        match self.last_action.entry(identity.clone()) {
            Entry::Occupied(mut entry) => {
                let elapsed = now - *entry.get();
                if elapsed < policy.cooldown {
                    return Decision::CooldownRejected {
                        retry_after_secs: retry_after(policy.cooldown, elapsed),
                        cooldown_minutes: policy.cooldown.as_secs().div_ceil(60),
                    };
                }
                entry.insert(now);
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
            }
        }

        recent.push_back(now);
        Decision::Allowed
    }

    /// Forgets identities whose cooldown has elapsed. Returns how many.
    pub fn prune(&self, cooldown: Duration) -> usize {
        self.prune_at(self.clock.now(), cooldown)
    }

    fn prune_at(&self, now: OffsetDateTime, cooldown: Duration) -> usize {
        let before = self.last_action.len();
        self.last_action.retain(|_, last| now - *last < cooldown);
        let removed = before.saturating_sub(self.last_action.len());
        if removed > 0 {
            debug!(removed, "idle identities pruned");
        }
        removed
    }

    /// Identities currently tracked.
    pub fn tracked_identities(&self) -> usize {
        self.last_action.len()
    }

    /// Accepted writes still inside the last `window`.
    pub fn recent_writes(&self, window: Duration) -> usize {
        let window_start = self.clock.now() - window;
        mutex_lock(&self.recent, SOURCE, "recent_writes")
            .iter()
            .filter(|at| **at >= window_start)
            .count()
    }
}

fn retry_after(cooldown: Duration, elapsed: time::Duration) -> u64 {
    let elapsed = Duration::try_from(elapsed).unwrap_or_default();
    let remaining = cooldown.saturating_sub(elapsed);
    let whole_secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
    whole_secs.div_ceil(60) * 60
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::clock::ManualClock;

    fn policy(cooldown_minutes: u64) -> LimitPolicy {
        LimitPolicy {
            cooldown: Duration::from_secs(cooldown_minutes * 60),
            flood_threshold: 10,
            flood_window: Duration::from_secs(60),
        }
    }

    fn identity(n: u8) -> IdentityKey {
        IdentityKey::from_ip(std::net::IpAddr::from([8, 8, 8, n]))
    }

    fn limiter() -> (ManualClock, RateLimiter) {
        let clock = ManualClock::at_epoch();
        let limiter = RateLimiter::new(Arc::new(clock.clone()));
        (clock, limiter)
    }

    #[test]
    fn eleventh_write_in_window_is_rejected() {
        let (clock, limiter) = limiter();
        let policy = policy(5);

        for n in 0..10 {
            assert!(limiter.check_and_record(&identity(n), &policy).is_allowed());
            clock.advance(time::Duration::seconds(1));
        }
        assert_eq!(
            limiter.check_and_record(&identity(100), &policy),
            Decision::GlobalFloodRejected
        );
    }

    #[test]
    fn flood_window_slides() {
        let (clock, limiter) = limiter();
        let policy = policy(5);

        for n in 0..10 {
            assert!(limiter.check_and_record(&identity(n), &policy).is_allowed());
        }
        clock.advance(time::Duration::seconds(61));
        assert!(limiter.check_and_record(&identity(50), &policy).is_allowed());
    }

    #[test]
    fn cooldown_boundaries() {
        let (clock, limiter) = limiter();
        let policy = policy(5);
        let client = identity(1);

        assert!(limiter.check_and_record(&client, &policy).is_allowed());

        clock.advance(time::Duration::seconds(4 * 60 + 59));
        assert_eq!(
            limiter.check_and_record(&client, &policy),
            Decision::CooldownRejected {
                retry_after_secs: 60,
                cooldown_minutes: 5
            }
        );

        clock.advance(time::Duration::seconds(1));
        assert!(limiter.check_and_record(&client, &policy).is_allowed());
    }

    #[test]
    fn rejection_records_nothing() {
        let (clock, limiter) = limiter();
        let policy = policy(5);
        let client = identity(1);

        assert!(limiter.check_and_record(&client, &policy).is_allowed());
        clock.advance(time::Duration::seconds(60));
        for _ in 0..5 {
            assert!(!limiter.check_and_record(&client, &policy).is_allowed());
        }
        assert_eq!(limiter.recent_writes(Duration::from_secs(3600)), 1);

        // Cooldown still counts from the accepted write, not the rejections.
        clock.advance(time::Duration::seconds(4 * 60));
        assert!(limiter.check_and_record(&client, &policy).is_allowed());
    }

    #[test]
    fn flood_rejection_does_not_touch_identity() {
        let (_clock, limiter) = limiter();
        let policy = LimitPolicy {
            flood_threshold: 1,
            ..policy(5)
        };

        assert!(limiter.check_and_record(&identity(1), &policy).is_allowed());
        assert_eq!(
            limiter.check_and_record(&identity(2), &policy),
            Decision::GlobalFloodRejected
        );
        assert_eq!(limiter.tracked_identities(), 1);
    }

    #[test]
    fn zero_cooldown_only_floods() {
        let (_clock, limiter) = limiter();
        let policy = policy(0);
        let client = identity(1);

        for _ in 0..10 {
            assert!(limiter.check_and_record(&client, &policy).is_allowed());
        }
        assert_eq!(
            limiter.check_and_record(&client, &policy),
            Decision::GlobalFloodRejected
        );
    }

    #[test]
    fn prune_drops_idle_identities() {
        let (clock, limiter) = limiter();
        let policy = policy(5);

        limiter.check_and_record(&identity(1), &policy);
        clock.advance(time::Duration::minutes(3));
        limiter.check_and_record(&identity(2), &policy);
        clock.advance(time::Duration::minutes(3));

        assert_eq!(limiter.prune(policy.cooldown), 1);
        assert_eq!(limiter.tracked_identities(), 1);
    }

    #[test]
    fn retry_after_rounds_up_to_minutes() {
        let cooldown = Duration::from_secs(300);
        assert_eq!(retry_after(cooldown, time::Duration::seconds(299)), 60);
        assert_eq!(retry_after(cooldown, time::Duration::seconds(239)), 120);
        assert_eq!(retry_after(cooldown, time::Duration::ZERO), 300);
        assert_eq!(retry_after(cooldown, time::Duration::milliseconds(299_500)), 60);
    }
}
