//! Tag-aware response cache.
//!
//! - **Store**: TTL entries with an LRU bound and single-flight fills
//! - **Keys**: deterministic keys derived from query family + parameters
//! - **Invalidation**: mutation events resolved through a static rule table
//!
//! ## Configuration
//!
//! Store sizing comes from the `[cache]` section:
//!
//! ```toml
//! [cache]
//! enabled = true
//! ttl_seconds = 300
//! max_entries = 1000
//! sweep_interval_seconds = 60
//! ```
//!
//! `enabled` and `ttl_seconds` are read per request from the runtime
//! settings; the store itself only sees a TTL, where zero means pass-through.

mod config;
mod events;
mod invalidation;
mod keys;
pub(crate) mod lock;
mod plan;
mod rules;
mod store;

pub use config::CacheConfig;
pub use events::{CacheEvent, Epoch, EventKind, SiteOption};
pub use invalidation::{InvalidationIndex, InvalidationReport};
pub use keys::{CacheKey, CommentScope, KEY_NAMESPACE, KeyPrefix, ParamSet, QueryFamily};
pub use plan::InvalidationPlan;
pub use rules::{InvalidationRule, InvalidationTarget, RULES, Trigger};
pub use store::{CacheEntry, CacheStatus, CacheStore, Lookup};
