//! In-process content repository.
//!
//! Backs the server when no external store is configured and doubles as the
//! repository in tests. Records live behind one `RwLock`; reads clone out of
//! it so no guard is held across an await point.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use time::OffsetDateTime;
use tracing::info;

use crate::application::repos::{
    CommentQuery, ContentRepository, ContentWriteRepo, PostQuery, RepoError,
};
use crate::cache::lock::{rw_read, rw_write};
use crate::domain::entities::{
    Category, Comment, CommentDraft, Listing, Page, Post, SiteProfile,
};
use crate::domain::types::ModerationStatus;
use crate::infra::error::InfraError;

const SOURCE: &str = "infra::memory::InMemoryRepository";

/// Initial repository contents, typically read from a JSON file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Seed {
    pub site: SiteProfile,
    pub posts: Vec<Post>,
    pub pages: Vec<Page>,
    pub categories: Vec<Category>,
    pub comments: Vec<Comment>,
}

impl Seed {
    pub fn from_json(raw: &str) -> Result<Self, InfraError> {
        serde_json::from_str(raw).map_err(|err| InfraError::seed(err.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, InfraError> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            InfraError::seed(format!("failed to read `{}`: {err}", path.display()))
        })?;
        Self::from_json(&raw)
    }
}

#[derive(Debug, Default)]
struct State {
    site: SiteProfile,
    posts: BTreeMap<u64, Post>,
    pages: BTreeMap<u64, Page>,
    categories: BTreeMap<u64, Category>,
    comments: BTreeMap<u64, Comment>,
}

#[derive(Debug, Default)]
pub struct InMemoryRepository {
    state: RwLock<State>,
    next_comment_id: AtomicU64,
    reads: AtomicUsize,
    failing: AtomicBool,
    read_delay_ms: AtomicU64,
}

impl InMemoryRepository {
    pub fn new(site: SiteProfile) -> Self {
        Self::from_seed(Seed {
            site,
            ..Seed::default()
        })
    }

    pub fn from_seed(seed: Seed) -> Self {
        let next_comment_id = seed.comments.iter().map(|c| c.id).max().unwrap_or(0) + 1;
        let state = State {
            site: seed.site,
            posts: seed.posts.into_iter().map(|p| (p.id, p)).collect(),
            pages: seed.pages.into_iter().map(|p| (p.id, p)).collect(),
            categories: seed.categories.into_iter().map(|c| (c.id, c)).collect(),
            comments: seed.comments.into_iter().map(|c| (c.id, c)).collect(),
        };

        info!(
            posts = state.posts.len(),
            pages = state.pages.len(),
            categories = state.categories.len(),
            comments = state.comments.len(),
            "Content repository seeded"
        );

        Self {
            state: RwLock::new(state),
            next_comment_id: AtomicU64::new(next_comment_id),
            ..Self::default()
        }
    }

    pub fn load_seed(path: &Path) -> Result<Self, InfraError> {
        Seed::load(path).map(Self::from_seed)
    }

    /// Read calls served so far, failed ones included.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Makes every subsequent read fail with a persistence error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Delays every read, to widen race windows in tests.
    pub fn set_read_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.read_delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Writes a post without going through a publishing flow.
    pub fn put_post(&self, post: Post) {
        rw_write(&self.state, SOURCE, "put_post")
            .posts
            .insert(post.id, post);
    }

    pub fn put_page(&self, page: Page) {
        rw_write(&self.state, SOURCE, "put_page")
            .pages
            .insert(page.id, page);
    }

    pub fn put_category(&self, category: Category) {
        rw_write(&self.state, SOURCE, "put_category")
            .categories
            .insert(category.id, category);
    }

    pub fn put_comment(&self, comment: Comment) {
        self.next_comment_id
            .fetch_max(comment.id + 1, Ordering::SeqCst);
        rw_write(&self.state, SOURCE, "put_comment")
            .comments
            .insert(comment.id, comment);
    }

    fn begin_read(&self) -> Result<(), RepoError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(RepoError::from_persistence("content store unavailable"));
        }
        Ok(())
    }

    /// Applies the configured read delay after the snapshot was taken, so a
    /// slow read returns data as of its start.
    async fn finish_read<T>(&self, snapshot: T) -> Result<T, RepoError> {
        let delay = self.read_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(snapshot)
    }
}

fn matches_search(post: &Post, needle: &str) -> bool {
    let needle = needle.to_lowercase();
    post.title.to_lowercase().contains(&needle) || post.content.to_lowercase().contains(&needle)
}

fn published_in(state: &State, category_id: u64) -> u64 {
    state
        .posts
        .values()
        .filter(|post| post.status.is_public() && post.categories.contains(&category_id))
        .count() as u64
}

#[async_trait]
impl ContentRepository for InMemoryRepository {
    async fn list_posts(&self, query: &PostQuery) -> Result<Listing<Post>, RepoError> {
        self.begin_read()?;
        let mut posts: Vec<Post> = {
            let state = rw_read(&self.state, SOURCE, "list_posts");
            state
                .posts
                .values()
                .filter(|post| post.status.is_public())
                .filter(|post| {
                    query
                        .category
                        .is_none_or(|category| post.categories.contains(&category))
                })
                .filter(|post| {
                    query
                        .search
                        .as_deref()
                        .is_none_or(|needle| matches_search(post, needle))
                })
                .cloned()
                .collect()
        };
        posts.sort_by(|a, b| b.date.cmp(&a.date).then(b.id.cmp(&a.id)));
        self.finish_read(Listing::paginate(posts, query.page, query.per_page))
            .await
    }

    async fn find_post(&self, id: u64) -> Result<Option<Post>, RepoError> {
        self.begin_read()?;
        let post = rw_read(&self.state, SOURCE, "find_post")
            .posts
            .get(&id)
            .cloned();
        self.finish_read(post).await
    }

    async fn list_pages(&self) -> Result<Vec<Page>, RepoError> {
        self.begin_read()?;
        let mut pages: Vec<Page> = rw_read(&self.state, SOURCE, "list_pages")
            .pages
            .values()
            .filter(|page| page.status.is_public())
            .cloned()
            .collect();
        pages.sort_by(|a, b| a.menu_order.cmp(&b.menu_order).then(a.id.cmp(&b.id)));
        self.finish_read(pages).await
    }

    async fn find_page(&self, id: u64) -> Result<Option<Page>, RepoError> {
        self.begin_read()?;
        let page = rw_read(&self.state, SOURCE, "find_page")
            .pages
            .get(&id)
            .cloned();
        self.finish_read(page).await
    }

    async fn list_categories(&self) -> Result<Vec<Category>, RepoError> {
        self.begin_read()?;
        let categories: Vec<Category> = {
            let state = rw_read(&self.state, SOURCE, "list_categories");
            state
                .categories
                .values()
                .map(|category| Category {
                    count: published_in(&state, category.id),
                    ..category.clone()
                })
                .collect()
        };
        self.finish_read(categories).await
    }

    async fn find_category(&self, id: u64) -> Result<Option<Category>, RepoError> {
        self.begin_read()?;
        let category = {
            let state = rw_read(&self.state, SOURCE, "find_category");
            state.categories.get(&id).map(|category| Category {
                count: published_in(&state, category.id),
                ..category.clone()
            })
        };
        self.finish_read(category).await
    }

    async fn list_comments(&self, query: &CommentQuery) -> Result<Listing<Comment>, RepoError> {
        self.begin_read()?;
        let mut comments: Vec<Comment> = rw_read(&self.state, SOURCE, "list_comments")
            .comments
            .values()
            .filter(|comment| comment.status == ModerationStatus::Approved)
            .filter(|comment| query.post.is_none_or(|post| comment.post == post))
            .cloned()
            .collect();
        comments.sort_by(|a, b| b.date.cmp(&a.date).then(b.id.cmp(&a.id)));
        self.finish_read(Listing::paginate(comments, query.page, query.per_page))
            .await
    }

    async fn find_comment(&self, id: u64) -> Result<Option<Comment>, RepoError> {
        self.begin_read()?;
        let comment = rw_read(&self.state, SOURCE, "find_comment")
            .comments
            .get(&id)
            .cloned();
        self.finish_read(comment).await
    }

    async fn site_profile(&self) -> Result<SiteProfile, RepoError> {
        self.begin_read()?;
        let site = rw_read(&self.state, SOURCE, "site_profile").site.clone();
        self.finish_read(site).await
    }
}

#[async_trait]
impl ContentWriteRepo for InMemoryRepository {
    async fn upsert_post(&self, post: Post) -> Result<Option<Post>, RepoError> {
        if post.id == 0 {
            return Err(RepoError::InvalidInput {
                message: "post id must be positive".to_string(),
            });
        }
        Ok(rw_write(&self.state, SOURCE, "upsert_post")
            .posts
            .insert(post.id, post))
    }

    async fn delete_post(&self, id: u64) -> Result<Post, RepoError> {
        let mut state = rw_write(&self.state, SOURCE, "delete_post");
        let removed = state.posts.remove(&id).ok_or(RepoError::NotFound)?;
        state.comments.retain(|_, comment| comment.post != id);
        Ok(removed)
    }

    async fn upsert_page(&self, page: Page) -> Result<Option<Page>, RepoError> {
        if page.id == 0 {
            return Err(RepoError::InvalidInput {
                message: "page id must be positive".to_string(),
            });
        }
        Ok(rw_write(&self.state, SOURCE, "upsert_page")
            .pages
            .insert(page.id, page))
    }

    async fn delete_page(&self, id: u64) -> Result<Page, RepoError> {
        rw_write(&self.state, SOURCE, "delete_page")
            .pages
            .remove(&id)
            .ok_or(RepoError::NotFound)
    }

    async fn upsert_category(&self, category: Category) -> Result<Option<Category>, RepoError> {
        if category.id == 0 {
            return Err(RepoError::InvalidInput {
                message: "category id must be positive".to_string(),
            });
        }
        Ok(rw_write(&self.state, SOURCE, "upsert_category")
            .categories
            .insert(category.id, category))
    }

    async fn delete_category(&self, id: u64) -> Result<Category, RepoError> {
        let mut state = rw_write(&self.state, SOURCE, "delete_category");
        let removed = state.categories.remove(&id).ok_or(RepoError::NotFound)?;
        for post in state.posts.values_mut() {
            post.categories.retain(|category| *category != id);
        }
        Ok(removed)
    }

    async fn insert_comment(
        &self,
        draft: CommentDraft,
        at: OffsetDateTime,
    ) -> Result<Comment, RepoError> {
        let mut state = rw_write(&self.state, SOURCE, "insert_comment");
        if !state.posts.contains_key(&draft.post) {
            return Err(RepoError::NotFound);
        }

        let id = self.next_comment_id.fetch_add(1, Ordering::SeqCst);
        let comment = Comment {
            id,
            post: draft.post,
            parent: draft.parent,
            author_name: draft.author_name,
            author_email: draft.author_email,
            author_url: draft.author_url,
            content: draft.content,
            status: ModerationStatus::Pending,
            date: at,
        };
        state.comments.insert(id, comment.clone());
        Ok(comment)
    }

    async fn set_comment_status(
        &self,
        id: u64,
        status: ModerationStatus,
    ) -> Result<Comment, RepoError> {
        let mut state = rw_write(&self.state, SOURCE, "set_comment_status");
        let comment = state.comments.get_mut(&id).ok_or(RepoError::NotFound)?;
        let was_approved = comment.status == ModerationStatus::Approved;
        comment.status = status;
        let updated = comment.clone();

        let now_approved = status == ModerationStatus::Approved;
        if was_approved != now_approved
            && let Some(post) = state.posts.get_mut(&updated.post)
        {
            post.comment_count = if now_approved {
                post.comment_count + 1
            } else {
                post.comment_count.saturating_sub(1)
            };
        }
        Ok(updated)
    }

    async fn update_comment_content(
        &self,
        id: u64,
        content: String,
    ) -> Result<Comment, RepoError> {
        let mut state = rw_write(&self.state, SOURCE, "update_comment_content");
        let comment = state.comments.get_mut(&id).ok_or(RepoError::NotFound)?;
        comment.content = content;
        Ok(comment.clone())
    }

    async fn delete_comment(&self, id: u64) -> Result<Comment, RepoError> {
        let mut state = rw_write(&self.state, SOURCE, "delete_comment");
        let removed = state.comments.remove(&id).ok_or(RepoError::NotFound)?;
        if removed.status == ModerationStatus::Approved
            && let Some(post) = state.posts.get_mut(&removed.post)
        {
            post.comment_count = post.comment_count.saturating_sub(1);
        }
        Ok(removed)
    }
}
