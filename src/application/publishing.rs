//! Content mutations with synchronous cache invalidation.
//!
//! Each operation commits through the write repository and then announces
//! the change to the invalidation index before returning, so the caller's
//! next read never sees the pre-mutation payload from the cache.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::instrument;

use crate::application::error::AppError;
use crate::application::repos::ContentWriteRepo;
use crate::cache::InvalidationIndex;
use crate::domain::entities::{Category, Comment, Page, Post};
use crate::domain::types::ModerationStatus;

pub struct PublishingService {
    writer: Arc<dyn ContentWriteRepo>,
    invalidation: Arc<InvalidationIndex>,
}

impl PublishingService {
    pub fn new(writer: Arc<dyn ContentWriteRepo>, invalidation: Arc<InvalidationIndex>) -> Self {
        Self {
            writer,
            invalidation,
        }
    }

    /// Creates or updates a post.
    ///
    /// Category lists of both the previous and the new categories are
    /// evicted, so a post moved between categories leaves neither stale.
    #[instrument(skip(self, post), fields(post_id = post.id))]
    pub async fn save_post(&self, post: Post) -> Result<(), AppError> {
        let mut categories: BTreeSet<u64> = post.categories.iter().copied().collect();
        let post_id = post.id;

        if let Some(previous) = self.writer.upsert_post(post).await? {
            categories.extend(previous.categories);
        }

        let categories: Vec<u64> = categories.into_iter().collect();
        self.invalidation.post_saved(post_id, &categories);
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn delete_post(&self, id: u64) -> Result<(), AppError> {
        let removed = self.writer.delete_post(id).await?;
        self.invalidation.post_deleted(id, &removed.categories);
        // The post's comments go with it.
        self.invalidation.comment_deleted(id);
        Ok(())
    }

    #[instrument(skip(self, page), fields(page_id = page.id))]
    pub async fn save_page(&self, page: Page) -> Result<(), AppError> {
        let page_id = page.id;
        self.writer.upsert_page(page).await?;
        self.invalidation.page_saved(page_id);
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn delete_page(&self, id: u64) -> Result<(), AppError> {
        self.writer.delete_page(id).await?;
        self.invalidation.page_deleted(id);
        Ok(())
    }

    #[instrument(skip(self, category), fields(category_id = category.id))]
    pub async fn save_category(&self, category: Category) -> Result<(), AppError> {
        let category_id = category.id;
        match self.writer.upsert_category(category).await? {
            Some(_) => self.invalidation.category_edited(category_id),
            None => self.invalidation.category_created(category_id),
        };
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn delete_category(&self, id: u64) -> Result<(), AppError> {
        self.writer.delete_category(id).await?;
        self.invalidation.category_deleted(id);
        Ok(())
    }

    /// Changes a comment's moderation state (approve, hold, mark as spam).
    #[instrument(skip(self))]
    pub async fn moderate_comment(
        &self,
        id: u64,
        status: ModerationStatus,
    ) -> Result<Comment, AppError> {
        let comment = self.writer.set_comment_status(id, status).await?;
        self.invalidation.comment_edited(comment.post);
        Ok(comment)
    }

    #[instrument(skip(self, content))]
    pub async fn edit_comment(&self, id: u64, content: String) -> Result<Comment, AppError> {
        if content.trim().is_empty() {
            return Err(AppError::validation("comment content must not be blank"));
        }
        let comment = self.writer.update_comment_content(id, content).await?;
        self.invalidation.comment_edited(comment.post);
        Ok(comment)
    }

    #[instrument(skip(self))]
    pub async fn delete_comment(&self, id: u64) -> Result<(), AppError> {
        let removed = self.writer.delete_comment(id).await?;
        self.invalidation.comment_deleted(removed.post);
        Ok(())
    }
}
