//! Synchronous invalidation on content mutations.
//!
//! Write paths call [`InvalidationIndex::on_event`] (or one of its typed
//! shortcuts) after their mutation commits and before they answer their own
//! caller. Evictions are applied to the store before `on_event` returns, so
//! the next read observes them.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use metrics::histogram;
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::SharedClock;

use super::events::{CacheEvent, Epoch, EventKind, SiteOption};
use super::plan::InvalidationPlan;
use super::store::CacheStore;

const METRIC_INVALIDATE_MS: &str = "contentgate_cache_invalidate_ms";

/// What one event evicted.
#[derive(Debug, Clone)]
pub struct InvalidationReport {
    pub event_id: Uuid,
    pub epoch: Epoch,
    /// Exact keys that were present and removed.
    pub keys_removed: usize,
    /// Entries removed through prefix matches.
    pub prefix_removed: usize,
}

impl InvalidationReport {
    pub fn removed(&self) -> usize {
        self.keys_removed + self.prefix_removed
    }
}

/// Resolves mutation events against the rule table and evicts from the store.
pub struct InvalidationIndex {
    store: Arc<CacheStore>,
    clock: SharedClock,
    epoch_counter: AtomicU64,
}

impl InvalidationIndex {
    pub fn new(store: Arc<CacheStore>, clock: SharedClock) -> Self {
        Self {
            store,
            clock,
            epoch_counter: AtomicU64::new(0),
        }
    }

    fn next_epoch(&self) -> Epoch {
        self.epoch_counter.fetch_add(1, Ordering::SeqCst)
    }

    /// Evict everything `kind` makes stale.
    pub fn on_event(&self, kind: EventKind) -> InvalidationReport {
        let started_at = Instant::now();
        let event = CacheEvent::new(kind, self.next_epoch(), self.clock.now());
        let plan = InvalidationPlan::from_events(std::slice::from_ref(&event));

        let report = self.apply(&event, &plan);
        histogram!(METRIC_INVALIDATE_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);

        info!(
            event_id = %event.id,
            event_epoch = event.epoch,
            event_kind = event.kind.label(),
            plan = %plan,
            removed = report.removed(),
            "Cache invalidation applied"
        );
        report
    }

    fn apply(&self, event: &CacheEvent, plan: &InvalidationPlan) -> InvalidationReport {
        let keys_removed = plan
            .keys
            .iter()
            .filter(|key| self.store.invalidate(key))
            .count();

        let prefix_removed = plan
            .prefixes
            .iter()
            .map(|prefix| {
                let removed = self.store.invalidate_by_prefix(prefix);
                debug!(prefix = %prefix, removed, "prefix evicted");
                removed
            })
            .sum();

        InvalidationReport {
            event_id: event.id,
            epoch: event.epoch,
            keys_removed,
            prefix_removed,
        }
    }

    /// A post was created or updated.
    pub fn post_saved(&self, post_id: u64, categories: &[u64]) -> InvalidationReport {
        self.on_event(EventKind::PostSaved {
            post_id,
            categories: categories.to_vec(),
        })
    }

    pub fn post_deleted(&self, post_id: u64, categories: &[u64]) -> InvalidationReport {
        self.on_event(EventKind::PostDeleted {
            post_id,
            categories: categories.to_vec(),
        })
    }

    pub fn comment_inserted(&self, post_id: u64) -> InvalidationReport {
        self.on_event(EventKind::CommentInserted { post_id })
    }

    pub fn comment_edited(&self, post_id: u64) -> InvalidationReport {
        self.on_event(EventKind::CommentEdited { post_id })
    }

    pub fn comment_deleted(&self, post_id: u64) -> InvalidationReport {
        self.on_event(EventKind::CommentDeleted { post_id })
    }

    pub fn category_created(&self, category_id: u64) -> InvalidationReport {
        self.on_event(EventKind::CategoryCreated { category_id })
    }

    pub fn category_edited(&self, category_id: u64) -> InvalidationReport {
        self.on_event(EventKind::CategoryEdited { category_id })
    }

    pub fn category_deleted(&self, category_id: u64) -> InvalidationReport {
        self.on_event(EventKind::CategoryDeleted { category_id })
    }

    pub fn page_saved(&self, page_id: u64) -> InvalidationReport {
        self.on_event(EventKind::PageSaved { page_id })
    }

    pub fn page_deleted(&self, page_id: u64) -> InvalidationReport {
        self.on_event(EventKind::PageDeleted { page_id })
    }

    pub fn option_changed(&self, option: SiteOption) -> InvalidationReport {
        self.on_event(EventKind::OptionChanged { option })
    }

    /// Evict every entry in the namespace.
    pub fn clear_all(&self) -> InvalidationReport {
        self.on_event(EventKind::ClearAll)
    }
}
