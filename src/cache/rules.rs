//! Static invalidation rule table.
//!
//! Each rule pairs a trigger with a generator that turns the event payload
//! into the keys and prefixes to evict. List queries are parameterised, so
//! their keys cannot be enumerated; list families are always evicted by
//! prefix.

use super::events::{EventKind, SiteOption};
use super::keys::{CacheKey, CommentScope, KeyPrefix, QueryFamily};

/// One thing to evict.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InvalidationTarget {
    Key(CacheKey),
    Prefix(KeyPrefix),
}

/// Which events a rule reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    PostChanged,
    CommentChanged,
    CategoryChanged,
    PageChanged,
    OptionChanged,
    ClearAll,
}

impl Trigger {
    pub fn of(kind: &EventKind) -> Self {
        match kind {
            EventKind::PostSaved { .. } | EventKind::PostDeleted { .. } => Self::PostChanged,
            EventKind::CommentInserted { .. }
            | EventKind::CommentEdited { .. }
            | EventKind::CommentDeleted { .. } => Self::CommentChanged,
            EventKind::CategoryCreated { .. }
            | EventKind::CategoryEdited { .. }
            | EventKind::CategoryDeleted { .. } => Self::CategoryChanged,
            EventKind::PageSaved { .. } | EventKind::PageDeleted { .. } => Self::PageChanged,
            EventKind::OptionChanged { .. } => Self::OptionChanged,
            EventKind::ClearAll => Self::ClearAll,
        }
    }
}

/// A trigger and the targets it resolves to.
pub struct InvalidationRule {
    pub trigger: Trigger,
    pub targets: fn(&EventKind) -> Vec<InvalidationTarget>,
}

/// Process-wide rule table.
pub static RULES: &[InvalidationRule] = &[
    InvalidationRule {
        trigger: Trigger::PostChanged,
        targets: post_targets,
    },
    InvalidationRule {
        trigger: Trigger::CommentChanged,
        targets: comment_targets,
    },
    InvalidationRule {
        trigger: Trigger::CategoryChanged,
        targets: category_targets,
    },
    InvalidationRule {
        trigger: Trigger::PageChanged,
        targets: page_targets,
    },
    InvalidationRule {
        trigger: Trigger::OptionChanged,
        targets: option_targets,
    },
    InvalidationRule {
        trigger: Trigger::ClearAll,
        targets: clear_all_targets,
    },
];

/// Targets of every rule matching `kind`.
pub fn resolve(kind: &EventKind) -> Vec<InvalidationTarget> {
    let trigger = Trigger::of(kind);
    RULES
        .iter()
        .filter(|rule| rule.trigger == trigger)
        .flat_map(|rule| (rule.targets)(kind))
        .collect()
}

fn post_targets(kind: &EventKind) -> Vec<InvalidationTarget> {
    let (EventKind::PostSaved {
        post_id,
        categories,
    }
    | EventKind::PostDeleted {
        post_id,
        categories,
    }) = kind
    else {
        return Vec::new();
    };

    let mut targets = vec![
        InvalidationTarget::Key(CacheKey::post(*post_id)),
        InvalidationTarget::Prefix(KeyPrefix::family(QueryFamily::Posts)),
    ];
    targets.extend(
        categories
            .iter()
            .map(|category| InvalidationTarget::Prefix(KeyPrefix::category_posts(*category))),
    );
    targets
}

fn comment_targets(kind: &EventKind) -> Vec<InvalidationTarget> {
    let (EventKind::CommentInserted { post_id }
    | EventKind::CommentEdited { post_id }
    | EventKind::CommentDeleted { post_id }) = kind
    else {
        return Vec::new();
    };

    vec![
        InvalidationTarget::Prefix(KeyPrefix::comments(CommentScope::from_post(Some(*post_id)))),
        // Unfiltered comment lists include this post's comments too.
        InvalidationTarget::Prefix(KeyPrefix::comments(CommentScope::All)),
    ]
}

fn category_targets(kind: &EventKind) -> Vec<InvalidationTarget> {
    let (EventKind::CategoryCreated { category_id }
    | EventKind::CategoryEdited { category_id }
    | EventKind::CategoryDeleted { category_id }) = kind
    else {
        return Vec::new();
    };

    vec![
        InvalidationTarget::Prefix(KeyPrefix::family(QueryFamily::Categories)),
        InvalidationTarget::Prefix(KeyPrefix::category_posts(*category_id)),
    ]
}

fn page_targets(kind: &EventKind) -> Vec<InvalidationTarget> {
    let (EventKind::PageSaved { page_id } | EventKind::PageDeleted { page_id }) = kind else {
        return Vec::new();
    };

    vec![
        InvalidationTarget::Key(CacheKey::page(*page_id)),
        InvalidationTarget::Prefix(KeyPrefix::family(QueryFamily::Pages)),
    ]
}

fn option_targets(kind: &EventKind) -> Vec<InvalidationTarget> {
    match kind {
        EventKind::OptionChanged {
            option: SiteOption::CacheEnabled | SiteOption::CacheDuration,
        } => vec![InvalidationTarget::Key(CacheKey::site_info())],
        _ => Vec::new(),
    }
}

fn clear_all_targets(_kind: &EventKind) -> Vec<InvalidationTarget> {
    vec![InvalidationTarget::Prefix(KeyPrefix::namespace())]
}
