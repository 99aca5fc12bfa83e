//! Runtime options.
//!
//! Requests take one [`Configuration`] snapshot up front and use it
//! throughout, so a concurrent settings update never produces a torn read.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::application::error::AppError;
use crate::cache::lock::{rw_read, rw_write};
use crate::cache::{InvalidationIndex, SiteOption};
use crate::config::Settings;
use crate::limiter::LimitPolicy;

const SOURCE: &str = "application::settings";

pub const DEFAULT_CACHE_ENABLED: bool = true;
pub const DEFAULT_CACHE_TTL_SECONDS: u64 = 300;
pub const DEFAULT_ALLOW_COMMENTS: bool = true;
pub const DEFAULT_COMMENT_COOLDOWN_MINUTES: u64 = 5;
pub const DEFAULT_FLOOD_THRESHOLD: u32 = 10;
pub const DEFAULT_FLOOD_WINDOW_SECONDS: u64 = 60;
pub const DEFAULT_POSTS_PER_PAGE: u32 = 10;

/// Options read per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    pub cache_enabled: bool,
    pub cache_ttl_seconds: u64,
    pub comment_cooldown_minutes: u64,
    pub global_flood_threshold: u32,
    pub global_flood_window_seconds: u64,
    pub allow_comments: bool,
    pub posts_per_page: u32,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            cache_enabled: DEFAULT_CACHE_ENABLED,
            cache_ttl_seconds: DEFAULT_CACHE_TTL_SECONDS,
            comment_cooldown_minutes: DEFAULT_COMMENT_COOLDOWN_MINUTES,
            global_flood_threshold: DEFAULT_FLOOD_THRESHOLD,
            global_flood_window_seconds: DEFAULT_FLOOD_WINDOW_SECONDS,
            allow_comments: DEFAULT_ALLOW_COMMENTS,
            posts_per_page: DEFAULT_POSTS_PER_PAGE,
        }
    }
}

impl From<&Settings> for Configuration {
    fn from(settings: &Settings) -> Self {
        Self {
            cache_enabled: settings.cache.enabled,
            cache_ttl_seconds: settings.cache.ttl.as_secs(),
            comment_cooldown_minutes: settings.comments.cooldown_minutes,
            global_flood_threshold: settings.comments.flood_threshold.get(),
            global_flood_window_seconds: settings.comments.flood_window.as_secs(),
            allow_comments: settings.comments.allow,
            posts_per_page: settings.content.posts_per_page.get(),
        }
    }
}

impl Configuration {
    /// TTL handed to the store. Zero when caching is off.
    pub fn effective_ttl(&self) -> Duration {
        if self.cache_enabled {
            Duration::from_secs(self.cache_ttl_seconds)
        } else {
            Duration::ZERO
        }
    }

    pub fn limit_policy(&self) -> LimitPolicy {
        LimitPolicy {
            cooldown: Duration::from_secs(self.comment_cooldown_minutes.saturating_mul(60)),
            flood_threshold: self.global_flood_threshold,
            flood_window: Duration::from_secs(self.global_flood_window_seconds),
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.global_flood_threshold == 0 {
            return Err(AppError::validation(
                "global flood threshold must be greater than zero",
            ));
        }
        if self.global_flood_window_seconds == 0 {
            return Err(AppError::validation(
                "global flood window must be greater than zero",
            ));
        }
        if self.posts_per_page == 0 {
            return Err(AppError::validation(
                "posts per page must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Options whose values differ between `self` and `next`.
    pub fn changed_options(&self, next: &Configuration) -> Vec<SiteOption> {
        let mut changed = Vec::new();
        if self.cache_enabled != next.cache_enabled {
            changed.push(SiteOption::CacheEnabled);
        }
        if self.cache_ttl_seconds != next.cache_ttl_seconds {
            changed.push(SiteOption::CacheDuration);
        }
        if self.allow_comments != next.allow_comments {
            changed.push(SiteOption::AllowComments);
        }
        if self.comment_cooldown_minutes != next.comment_cooldown_minutes {
            changed.push(SiteOption::CommentCooldown);
        }
        if self.global_flood_threshold != next.global_flood_threshold {
            changed.push(SiteOption::FloodThreshold);
        }
        if self.global_flood_window_seconds != next.global_flood_window_seconds {
            changed.push(SiteOption::FloodWindow);
        }
        if self.posts_per_page != next.posts_per_page {
            changed.push(SiteOption::PostsPerPage);
        }
        changed
    }
}

/// Read-only access to the current options.
pub trait ConfigProvider: Send + Sync {
    fn snapshot(&self) -> Configuration;
}

/// Swappable in-process option store.
#[derive(Debug, Default)]
pub struct RuntimeSettings {
    current: RwLock<Configuration>,
}

impl RuntimeSettings {
    pub fn new(initial: Configuration) -> Self {
        Self {
            current: RwLock::new(initial),
        }
    }

    /// Installs `next` and returns the options that changed.
    pub fn replace(&self, next: Configuration) -> Vec<SiteOption> {
        let mut current = rw_write(&self.current, SOURCE, "replace");
        let changed = current.changed_options(&next);
        *current = next;
        changed
    }
}

impl ConfigProvider for RuntimeSettings {
    fn snapshot(&self) -> Configuration {
        rw_read(&self.current, SOURCE, "snapshot").clone()
    }
}

/// Applies option updates and announces them to the cache.
pub struct SettingsService {
    settings: Arc<RuntimeSettings>,
    invalidation: Arc<InvalidationIndex>,
}

impl SettingsService {
    pub fn new(settings: Arc<RuntimeSettings>, invalidation: Arc<InvalidationIndex>) -> Self {
        Self {
            settings,
            invalidation,
        }
    }

    pub fn current(&self) -> Configuration {
        self.settings.snapshot()
    }

    /// Replaces the options, firing one `OptionChanged` event per change.
    pub fn update(&self, next: Configuration) -> Result<Vec<SiteOption>, AppError> {
        next.validate()?;
        let changed = self.settings.replace(next);
        for option in &changed {
            self.invalidation.option_changed(*option);
        }
        if !changed.is_empty() {
            info!(
                changed = ?changed.iter().map(SiteOption::as_str).collect::<Vec<_>>(),
                "Runtime settings updated"
            );
        }
        Ok(changed)
    }
}
