//! Domain records served by the content API.
//!
//! Read records round-trip through serde because cached payloads are stored
//! as JSON bytes and decoded on a hit.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::domain::error::DomainError;
use crate::domain::types::{CommentStatus, ModerationStatus, PublishStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: u64,
    pub slug: String,
    pub title: String,
    pub content: String,
    pub excerpt: String,
    pub author: u64,
    pub status: PublishStatus,
    pub comment_status: CommentStatus,
    pub categories: Vec<u64>,
    pub sticky: bool,
    pub comment_count: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub date: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub modified: OffsetDateTime,
}

impl Post {
    pub fn accepts_comments(&self) -> bool {
        self.status.is_public() && self.comment_status == CommentStatus::Open
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub id: u64,
    pub slug: String,
    pub title: String,
    pub content: String,
    pub excerpt: String,
    pub author: u64,
    pub status: PublishStatus,
    pub parent: u64,
    pub menu_order: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub date: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub modified: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: u64,
    pub name: String,
    pub slug: String,
    pub description: String,
    pub parent: u64,
    /// Published posts in the category.
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: u64,
    pub post: u64,
    pub parent: u64,
    pub author_name: String,
    pub author_email: String,
    pub author_url: String,
    pub content: String,
    pub status: ModerationStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub date: OffsetDateTime,
}

/// Static site identity, as stored by the content repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteProfile {
    pub name: String,
    pub description: String,
    pub url: String,
    pub admin_email: String,
}

/// Site identity plus the cache options clients may want to know about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteInfo {
    pub name: String,
    pub description: String,
    pub url: String,
    pub admin_email: String,
    pub cache_enabled: bool,
    pub cache_ttl_seconds: u64,
}

impl SiteInfo {
    pub fn from_profile(profile: SiteProfile, cache_enabled: bool, cache_ttl_seconds: u64) -> Self {
        Self {
            name: if profile.name.trim().is_empty() {
                "Unknown Site".to_string()
            } else {
                profile.name
            },
            description: profile.description,
            url: profile.url,
            admin_email: profile.admin_email,
            cache_enabled,
            cache_ttl_seconds,
        }
    }
}

/// One page of a list query together with its totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing<T> {
    pub items: Vec<T>,
    /// Matching records across all pages.
    pub total: u64,
    pub total_pages: u64,
}

impl<T> Listing<T> {
    pub fn new(items: Vec<T>, total: u64, per_page: u32) -> Self {
        let per_page = u64::from(per_page.max(1));
        Self {
            items,
            total,
            total_pages: total.div_ceil(per_page),
        }
    }

    /// Slices page `page` (1-based) out of the full result set.
    pub fn paginate(all: Vec<T>, page: u32, per_page: u32) -> Self {
        let total = all.len() as u64;
        let per_page = per_page.max(1);
        let skip = (page.max(1) as usize - 1).saturating_mul(per_page as usize);
        let items = all.into_iter().skip(skip).take(per_page as usize).collect();
        Self::new(items, total, per_page)
    }
}

/// Comment submission as received from a client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewComment {
    pub post: Option<u64>,
    pub parent: Option<u64>,
    pub author_name: Option<String>,
    pub author_email: Option<String>,
    pub author_url: Option<String>,
    pub content: Option<String>,
}

impl NewComment {
    /// Checks required fields and produces a draft ready for the repository.
    pub fn validate(self) -> Result<CommentDraft, DomainError> {
        let post = self
            .post
            .filter(|id| *id > 0)
            .ok_or_else(|| DomainError::validation("missing required field `post`"))?;
        let content = non_blank(self.content)
            .ok_or_else(|| DomainError::validation("missing required field `content`"))?;
        let author_name = non_blank(self.author_name)
            .ok_or_else(|| DomainError::validation("missing required field `author_name`"))?;

        Ok(CommentDraft {
            post,
            parent: self.parent.unwrap_or(0),
            author_name,
            author_email: self.author_email.unwrap_or_default().trim().to_string(),
            author_url: self.author_url.unwrap_or_default().trim().to_string(),
            content,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Validated comment awaiting insertion. New comments start pending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentDraft {
    pub post: u64,
    pub parent: u64,
    pub author_name: String,
    pub author_email: String,
    pub author_url: String,
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission() -> NewComment {
        NewComment {
            post: Some(7),
            author_name: Some(" Ada ".to_string()),
            content: Some("Nice post".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn valid_submission_is_trimmed() {
        let draft = submission().validate().expect("valid submission");
        assert_eq!(draft.post, 7);
        assert_eq!(draft.author_name, "Ada");
        assert_eq!(draft.parent, 0);
        assert_eq!(draft.author_url, "");
    }

    #[test]
    fn missing_fields_are_rejected() {
        let no_post = NewComment {
            post: None,
            ..submission()
        };
        assert!(matches!(no_post.validate(), Err(DomainError::Validation { .. })));

        let zero_post = NewComment {
            post: Some(0),
            ..submission()
        };
        assert!(zero_post.validate().is_err());

        let blank_content = NewComment {
            content: Some("   ".to_string()),
            ..submission()
        };
        assert!(blank_content.validate().is_err());

        let no_author = NewComment {
            author_name: None,
            ..submission()
        };
        assert!(no_author.validate().is_err());
    }

    #[test]
    fn listing_totals() {
        let listing = Listing::paginate((1..=25).collect::<Vec<u32>>(), 3, 10);
        assert_eq!(listing.items, vec![21, 22, 23, 24, 25]);
        assert_eq!(listing.total, 25);
        assert_eq!(listing.total_pages, 3);

        let empty: Listing<u32> = Listing::paginate(Vec::new(), 1, 10);
        assert_eq!(empty.total_pages, 0);
    }

    #[test]
    fn site_name_falls_back() {
        let profile = SiteProfile {
            name: String::new(),
            description: String::new(),
            url: String::new(),
            admin_email: String::new(),
        };
        let info = SiteInfo::from_profile(profile, true, 300);
        assert_eq!(info.name, "Unknown Site");
        assert_eq!(info.cache_ttl_seconds, 300);
    }
}
