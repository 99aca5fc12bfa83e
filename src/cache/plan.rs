//! Invalidation plan generation.
//!
//! Merges the targets of one or more events into a deduplicated set of
//! evictions.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use super::events::CacheEvent;
use super::keys::{CacheKey, KeyPrefix};
use super::rules::{self, InvalidationTarget};

/// Evictions to execute for a batch of events.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct InvalidationPlan {
    /// Exact keys, minus those already covered by a prefix.
    pub keys: BTreeSet<CacheKey>,
    /// Prefixes, minus those nested in a shorter prefix.
    pub prefixes: BTreeSet<KeyPrefix>,
}

impl fmt::Display for InvalidationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "InvalidationPlan {{ keys: {}, prefixes: {} }}",
            self.keys.len(),
            self.prefixes.len()
        )
    }
}

impl InvalidationPlan {
    /// Merge events into a plan.
    ///
    /// - Deduplicates by event ID
    /// - Drops prefixes nested inside another prefix
    /// - Drops keys that a prefix already covers
    pub fn from_events(events: &[CacheEvent]) -> Self {
        let mut seen_ids = HashSet::new();
        let targets = events
            .iter()
            .filter(|event| seen_ids.insert(event.id))
            .flat_map(|event| rules::resolve(&event.kind));

        Self::from_targets(targets)
    }

    pub fn from_targets(targets: impl IntoIterator<Item = InvalidationTarget>) -> Self {
        let mut keys = BTreeSet::new();
        let mut prefixes: BTreeSet<KeyPrefix> = BTreeSet::new();

        for target in targets {
            match target {
                InvalidationTarget::Key(key) => {
                    keys.insert(key);
                }
                InvalidationTarget::Prefix(prefix) => {
                    prefixes.insert(prefix);
                }
            }
        }

        // Sorted order puts a prefix before everything it covers.
        let mut kept: BTreeSet<KeyPrefix> = BTreeSet::new();
        for prefix in prefixes {
            let nested = kept
                .iter()
                .any(|outer| prefix.as_str().starts_with(outer.as_str()));
            if !nested {
                kept.insert(prefix);
            }
        }
        keys.retain(|key| !kept.iter().any(|prefix| prefix.matches(key)));

        Self {
            keys,
            prefixes: kept,
        }
    }

    /// Check if the plan evicts anything.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.prefixes.is_empty()
    }
}
