//! Content mutation events.
//!
//! Write paths describe what changed with an [`EventKind`]; the invalidation
//! index wraps it in a [`CacheEvent`] and resolves it against the rule table.

use std::fmt;

use time::OffsetDateTime;
use uuid::Uuid;

/// Monotonic epoch for ordering events.
///
/// Each event gets a unique, increasing epoch within this process.
pub type Epoch = u64;

/// Cache event envelope.
#[derive(Debug, Clone)]
pub struct CacheEvent {
    /// Unique identifier (UUIDv4), used to correlate log lines.
    pub id: Uuid,
    /// Monotonic epoch for ordering within this process.
    pub epoch: Epoch,
    pub kind: EventKind,
    /// When the event was raised.
    pub timestamp: OffsetDateTime,
}

impl CacheEvent {
    pub fn new(kind: EventKind, epoch: Epoch, timestamp: OffsetDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            epoch,
            kind,
            timestamp,
        }
    }
}

/// Runtime options whose changes are announced as events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SiteOption {
    CacheEnabled,
    CacheDuration,
    AllowComments,
    CommentCooldown,
    FloodThreshold,
    FloodWindow,
    PostsPerPage,
}

impl SiteOption {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CacheEnabled => "cache_enabled",
            Self::CacheDuration => "cache_duration",
            Self::AllowComments => "allow_comments",
            Self::CommentCooldown => "comment_cooldown",
            Self::FloodThreshold => "flood_threshold",
            Self::FloodWindow => "flood_window",
            Self::PostsPerPage => "posts_per_page",
        }
    }
}

impl fmt::Display for SiteOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A content mutation that may make cached reads stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    // Posts
    /// A post was created or updated. `categories` lists every category the
    /// post belongs to; a post moved between categories lists old and new.
    PostSaved { post_id: u64, categories: Vec<u64> },
    PostDeleted { post_id: u64, categories: Vec<u64> },

    // Comments
    CommentInserted { post_id: u64 },
    CommentEdited { post_id: u64 },
    CommentDeleted { post_id: u64 },

    // Categories
    CategoryCreated { category_id: u64 },
    CategoryEdited { category_id: u64 },
    CategoryDeleted { category_id: u64 },

    // Pages
    PageSaved { page_id: u64 },
    PageDeleted { page_id: u64 },

    // Settings
    OptionChanged { option: SiteOption },

    /// Manual purge of everything this crate cached.
    ClearAll,
}

impl EventKind {
    /// Short label used in logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::PostSaved { .. } => "post_saved",
            Self::PostDeleted { .. } => "post_deleted",
            Self::CommentInserted { .. } => "comment_inserted",
            Self::CommentEdited { .. } => "comment_edited",
            Self::CommentDeleted { .. } => "comment_deleted",
            Self::CategoryCreated { .. } => "category_created",
            Self::CategoryEdited { .. } => "category_edited",
            Self::CategoryDeleted { .. } => "category_deleted",
            Self::PageSaved { .. } => "page_saved",
            Self::PageDeleted { .. } => "page_deleted",
            Self::OptionChanged { .. } => "option_changed",
            Self::ClearAll => "clear_all",
        }
    }
}
