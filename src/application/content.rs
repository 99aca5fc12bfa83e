//! Cached read queries.
//!
//! Every read derives a key from its query family and normalised parameters,
//! asks the store, and on a miss loads from the repository and stores the
//! JSON payload for the configured TTL. Repository errors propagate and are
//! never stored.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{instrument, warn};

use crate::application::error::AppError;
use crate::application::repos::{CommentQuery, ContentRepository, PostQuery};
use crate::application::settings::{ConfigProvider, Configuration};
use crate::cache::{
    CacheKey, CacheStatus, CacheStore, CommentScope, InvalidationIndex, InvalidationReport,
    ParamSet, QueryFamily,
};
use crate::domain::entities::{Category, Comment, Listing, Page, Post, SiteInfo};

/// Largest page size a client may ask for.
pub const MAX_PER_PAGE: u32 = 100;
/// Page size of comment lists when the client names none.
pub const DEFAULT_COMMENTS_PER_PAGE: u32 = 100;

/// A read result and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Cached<T> {
    pub value: T,
    pub status: CacheStatus,
}

impl<T> Cached<T> {
    pub fn is_hit(&self) -> bool {
        self.status.is_hit()
    }
}

/// Post list parameters as sent by clients.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PostsParams {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub categories: Option<u64>,
    pub search: Option<String>,
}

/// Pagination parameters as sent by clients.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PageParams {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

/// Comment list parameters as sent by clients.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CommentsParams {
    pub post: Option<u64>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

fn normalise_page(page: Option<u32>) -> u32 {
    page.filter(|page| *page > 0).unwrap_or(1)
}

fn normalise_per_page(per_page: Option<u32>, default: u32) -> u32 {
    per_page
        .filter(|per_page| *per_page > 0)
        .unwrap_or(default)
        .clamp(1, MAX_PER_PAGE)
}

impl PostsParams {
    pub fn normalise(&self, posts_per_page: u32) -> PostQuery {
        PostQuery {
            page: normalise_page(self.page),
            per_page: normalise_per_page(self.per_page, posts_per_page),
            category: self.categories.filter(|id| *id > 0),
            search: self
                .search
                .as_deref()
                .map(str::trim)
                .filter(|search| !search.is_empty())
                .map(str::to_string),
        }
    }
}

impl CommentsParams {
    pub fn normalise(&self) -> CommentQuery {
        CommentQuery {
            post: self.post.filter(|id| *id > 0),
            page: normalise_page(self.page),
            per_page: normalise_per_page(self.per_page, DEFAULT_COMMENTS_PER_PAGE),
        }
    }
}

fn post_params(query: &PostQuery) -> ParamSet {
    ParamSet::new()
        .with("page", query.page)
        .with("per_page", query.per_page)
        .with_opt("category", query.category)
        .with_opt("search", query.search.as_deref())
}

/// Read facade over the repository and the response cache.
pub struct ContentService {
    repo: Arc<dyn ContentRepository>,
    store: Arc<CacheStore>,
    invalidation: Arc<InvalidationIndex>,
    settings: Arc<dyn ConfigProvider>,
}

impl ContentService {
    pub fn new(
        repo: Arc<dyn ContentRepository>,
        store: Arc<CacheStore>,
        invalidation: Arc<InvalidationIndex>,
        settings: Arc<dyn ConfigProvider>,
    ) -> Self {
        Self {
            repo,
            store,
            invalidation,
            settings,
        }
    }

    #[instrument(skip(self))]
    pub async fn posts(&self, params: &PostsParams) -> Result<Cached<Listing<Post>>, AppError> {
        let config = self.settings.snapshot();
        let query = params.normalise(config.posts_per_page);
        let key = CacheKey::posts(&post_params(&query));

        self.fetch(QueryFamily::Posts, &key, &config, || async {
            Ok::<_, AppError>(self.repo.list_posts(&query).await?)
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn post(&self, id: u64) -> Result<Cached<Post>, AppError> {
        let config = self.settings.snapshot();
        let key = CacheKey::post(id);

        self.fetch(QueryFamily::Post, &key, &config, || async {
            self.repo
                .find_post(id)
                .await?
                .filter(|post| post.status.is_public())
                .ok_or_else(|| AppError::not_found("post"))
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn pages(&self) -> Result<Cached<Vec<Page>>, AppError> {
        let config = self.settings.snapshot();
        let key = CacheKey::pages(&ParamSet::new());

        self.fetch(QueryFamily::Pages, &key, &config, || async {
            Ok::<_, AppError>(self.repo.list_pages().await?)
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn page(&self, id: u64) -> Result<Cached<Page>, AppError> {
        let config = self.settings.snapshot();
        let key = CacheKey::page(id);

        self.fetch(QueryFamily::Page, &key, &config, || async {
            self.repo
                .find_page(id)
                .await?
                .filter(|page| page.status.is_public())
                .ok_or_else(|| AppError::not_found("page"))
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn categories(&self) -> Result<Cached<Vec<Category>>, AppError> {
        let config = self.settings.snapshot();
        let key = CacheKey::categories(&ParamSet::new());

        self.fetch(QueryFamily::Categories, &key, &config, || async {
            Ok::<_, AppError>(self.repo.list_categories().await?)
        })
        .await
    }

    /// Posts of one category. A missing category is `NotFound` and not cached.
    #[instrument(skip(self))]
    pub async fn category_posts(
        &self,
        category_id: u64,
        params: &PageParams,
    ) -> Result<Cached<Listing<Post>>, AppError> {
        let config = self.settings.snapshot();
        let query = PostQuery {
            page: normalise_page(params.page),
            per_page: normalise_per_page(params.per_page, config.posts_per_page),
            category: Some(category_id),
            search: None,
        };
        let key = CacheKey::category_posts(
            category_id,
            &ParamSet::new()
                .with("page", query.page)
                .with("per_page", query.per_page),
        );

        self.fetch(QueryFamily::CategoryPosts, &key, &config, || async {
            if self.repo.find_category(category_id).await?.is_none() {
                return Err(AppError::not_found("category"));
            }
            Ok(self.repo.list_posts(&query).await?)
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn comments(
        &self,
        params: &CommentsParams,
    ) -> Result<Cached<Listing<Comment>>, AppError> {
        let config = self.settings.snapshot();
        let query = params.normalise();
        let key = CacheKey::comments(
            CommentScope::from_post(query.post),
            &ParamSet::new()
                .with("page", query.page)
                .with("per_page", query.per_page),
        );

        self.fetch(QueryFamily::Comments, &key, &config, || async {
            Ok::<_, AppError>(self.repo.list_comments(&query).await?)
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn site_info(&self) -> Result<Cached<SiteInfo>, AppError> {
        let config = self.settings.snapshot();
        let key = CacheKey::site_info();

        self.fetch(QueryFamily::SiteInfo, &key, &config, || async {
            let profile = self.repo.site_profile().await?;
            Ok::<_, AppError>(SiteInfo::from_profile(
                profile,
                config.cache_enabled,
                config.cache_ttl_seconds,
            ))
        })
        .await
    }

    /// Evicts every cached read.
    pub fn clear_cache(&self) -> InvalidationReport {
        self.invalidation.clear_all()
    }

    async fn fetch<T, F, Fut>(
        &self,
        family: QueryFamily,
        key: &CacheKey,
        config: &Configuration,
        load: F,
    ) -> Result<Cached<T>, AppError>
    where
        T: Serialize + DeserializeOwned,
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let lookup = self
            .store
            .get_or_compute(key, config.effective_ttl(), || async {
                let value = load().await?;
                serde_json::to_vec(&value).map(Bytes::from).map_err(|err| {
                    AppError::unexpected(format!("failed to encode {family} payload: {err}"))
                })
            })
            .await?;

        match serde_json::from_slice(&lookup.value) {
            Ok(value) => Ok(Cached {
                value,
                status: lookup.status,
            }),
            Err(err) => {
                // Unreadable entry: drop it and answer from the repository.
                warn!(key = %key, family = %family, error = %err, "cached payload undecodable");
                self.store.invalidate(key);
                Ok(Cached {
                    value: load().await?,
                    status: CacheStatus::Miss,
                })
            }
        }
    }
}
