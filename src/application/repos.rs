//! Repository traits describing content adapters.

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;

use crate::domain::entities::{
    Category, Comment, CommentDraft, Listing, Page, Post, SiteProfile,
};
use crate::domain::types::ModerationStatus;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Normalised post list query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostQuery {
    pub page: u32,
    pub per_page: u32,
    pub category: Option<u64>,
    pub search: Option<String>,
}

/// Normalised comment list query. Only approved comments are listed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentQuery {
    pub post: Option<u64>,
    pub page: u32,
    pub per_page: u32,
}

/// Read side of the content store.
#[async_trait]
pub trait ContentRepository: Send + Sync {
    /// Published posts matching `query`, newest first.
    async fn list_posts(&self, query: &PostQuery) -> Result<Listing<Post>, RepoError>;

    async fn find_post(&self, id: u64) -> Result<Option<Post>, RepoError>;

    /// Published pages ordered by menu order.
    async fn list_pages(&self) -> Result<Vec<Page>, RepoError>;

    async fn find_page(&self, id: u64) -> Result<Option<Page>, RepoError>;

    async fn list_categories(&self) -> Result<Vec<Category>, RepoError>;

    async fn find_category(&self, id: u64) -> Result<Option<Category>, RepoError>;

    async fn list_comments(&self, query: &CommentQuery) -> Result<Listing<Comment>, RepoError>;

    async fn find_comment(&self, id: u64) -> Result<Option<Comment>, RepoError>;

    async fn site_profile(&self) -> Result<SiteProfile, RepoError>;
}

/// Write side of the content store.
///
/// Callers are responsible for announcing each committed mutation to the
/// invalidation index; see [`crate::application::publishing`].
#[async_trait]
pub trait ContentWriteRepo: Send + Sync {
    /// Inserts or replaces a post. Returns the previous version, if any.
    async fn upsert_post(&self, post: Post) -> Result<Option<Post>, RepoError>;

    async fn delete_post(&self, id: u64) -> Result<Post, RepoError>;

    async fn upsert_page(&self, page: Page) -> Result<Option<Page>, RepoError>;

    async fn delete_page(&self, id: u64) -> Result<Page, RepoError>;

    async fn upsert_category(&self, category: Category) -> Result<Option<Category>, RepoError>;

    async fn delete_category(&self, id: u64) -> Result<Category, RepoError>;

    /// Stores a new comment in [`ModerationStatus::Pending`].
    async fn insert_comment(
        &self,
        draft: CommentDraft,
        at: OffsetDateTime,
    ) -> Result<Comment, RepoError>;

    async fn set_comment_status(
        &self,
        id: u64,
        status: ModerationStatus,
    ) -> Result<Comment, RepoError>;

    async fn update_comment_content(&self, id: u64, content: String)
    -> Result<Comment, RepoError>;

    async fn delete_comment(&self, id: u64) -> Result<Comment, RepoError>;
}
