//! Comment write path.
//!
//! Check order: comments enabled, required fields, target post published,
//! post open for comments, global flood gate, client cooldown. Only then is
//! the comment stored (pending moderation) and the post's comment lists
//! evicted.

use std::net::IpAddr;
use std::sync::Arc;

use tracing::{info, instrument};

use crate::application::error::{AppError, Rejection};
use crate::application::repos::{ContentRepository, ContentWriteRepo};
use crate::application::settings::ConfigProvider;
use crate::cache::InvalidationIndex;
use crate::clock::SharedClock;
use crate::domain::entities::{Comment, NewComment};
use crate::domain::types::ModerationStatus;
use crate::limiter::{IdentityKey, RateLimiter};

pub struct CommentService {
    reader: Arc<dyn ContentRepository>,
    writer: Arc<dyn ContentWriteRepo>,
    limiter: Arc<RateLimiter>,
    invalidation: Arc<InvalidationIndex>,
    settings: Arc<dyn ConfigProvider>,
    clock: SharedClock,
}

impl CommentService {
    pub fn new(
        reader: Arc<dyn ContentRepository>,
        writer: Arc<dyn ContentWriteRepo>,
        limiter: Arc<RateLimiter>,
        invalidation: Arc<InvalidationIndex>,
        settings: Arc<dyn ConfigProvider>,
        clock: SharedClock,
    ) -> Self {
        Self {
            reader,
            writer,
            limiter,
            invalidation,
            settings,
            clock,
        }
    }

    /// Submits a comment from `client`.
    #[instrument(skip(self, submission), fields(post = ?submission.post))]
    pub async fn create(&self, submission: NewComment, client: IpAddr) -> Result<Comment, AppError> {
        let config = self.settings.snapshot();
        if !config.allow_comments {
            return Err(AppError::disabled("comments are disabled"));
        }

        let draft = submission.validate()?;

        let post = self
            .reader
            .find_post(draft.post)
            .await?
            .filter(|post| post.status.is_public())
            .ok_or_else(|| AppError::not_found("post"))?;
        if !post.accepts_comments() {
            return Err(AppError::disabled("comments are closed for this post"));
        }

        let identity = IdentityKey::from_ip(client);
        let decision = self
            .limiter
            .check_and_record(&identity, &config.limit_policy());
        if let Some(rejection) = Rejection::from_decision(decision) {
            return Err(AppError::RateLimited(rejection));
        }

        let comment = self
            .writer
            .insert_comment(draft, self.clock.now())
            .await?;
        self.invalidation.comment_inserted(comment.post);

        info!(
            comment_id = comment.id,
            post_id = comment.post,
            identity = %identity,
            "Comment accepted for moderation"
        );
        Ok(comment)
    }

    /// An approved comment by id. Pending and spam comments are not visible.
    #[instrument(skip(self))]
    pub async fn get(&self, id: u64) -> Result<Comment, AppError> {
        self.reader
            .find_comment(id)
            .await?
            .filter(|comment| comment.status == ModerationStatus::Approved)
            .ok_or_else(|| AppError::not_found("comment"))
    }
}
