#![allow(dead_code)]

use std::sync::Arc;

use contentgate::application::{
    comments::CommentService,
    content::ContentService,
    publishing::PublishingService,
    repos::{ContentRepository, ContentWriteRepo},
    settings::{ConfigProvider, Configuration, RuntimeSettings, SettingsService},
};
use contentgate::cache::{CacheConfig, CacheStore, InvalidationIndex};
use contentgate::clock::{ManualClock, SharedClock};
use contentgate::domain::entities::{Category, Comment, Page, Post, SiteProfile};
use contentgate::domain::types::{CommentStatus, ModerationStatus, PublishStatus};
use contentgate::infra::http::{AdminState, HttpState};
use contentgate::infra::memory::InMemoryRepository;
use contentgate::limiter::RateLimiter;
use time::OffsetDateTime;
use time::macros::datetime;

pub const START: OffsetDateTime = datetime!(2024-05-01 08:00 UTC);

/// Fully wired services over an in-memory repository and a manual clock.
pub struct Harness {
    pub clock: ManualClock,
    pub repo: Arc<InMemoryRepository>,
    pub store: Arc<CacheStore>,
    pub invalidation: Arc<InvalidationIndex>,
    pub runtime: Arc<RuntimeSettings>,
    pub limiter: Arc<RateLimiter>,
    pub content: Arc<ContentService>,
    pub comments: Arc<CommentService>,
    pub publishing: Arc<PublishingService>,
    pub settings: Arc<SettingsService>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(Configuration::default())
    }

    pub fn with_config(config: Configuration) -> Self {
        let clock = ManualClock::new(START);
        let shared: SharedClock = Arc::new(clock.clone());

        let repo = Arc::new(seeded_repository());
        let reader: Arc<dyn ContentRepository> = repo.clone();
        let writer: Arc<dyn ContentWriteRepo> = repo.clone();

        let store = Arc::new(CacheStore::new(&CacheConfig::default(), shared.clone()));
        let invalidation = Arc::new(InvalidationIndex::new(store.clone(), shared.clone()));
        let runtime = Arc::new(RuntimeSettings::new(config));
        let provider: Arc<dyn ConfigProvider> = runtime.clone();
        let limiter = Arc::new(RateLimiter::new(shared.clone()));

        let content = Arc::new(ContentService::new(
            reader.clone(),
            store.clone(),
            invalidation.clone(),
            provider.clone(),
        ));
        let comments = Arc::new(CommentService::new(
            reader,
            writer.clone(),
            limiter.clone(),
            invalidation.clone(),
            provider,
            shared,
        ));
        let publishing = Arc::new(PublishingService::new(writer, invalidation.clone()));
        let settings = Arc::new(SettingsService::new(runtime.clone(), invalidation.clone()));

        Self {
            clock,
            repo,
            store,
            invalidation,
            runtime,
            limiter,
            content,
            comments,
            publishing,
            settings,
        }
    }

    pub fn http_state(&self) -> HttpState {
        HttpState {
            content: self.content.clone(),
            comments: self.comments.clone(),
        }
    }

    pub fn admin_state(&self) -> AdminState {
        AdminState {
            content: self.content.clone(),
            publishing: self.publishing.clone(),
            settings: self.settings.clone(),
        }
    }

    /// Applies `change` to the current settings through the settings service.
    pub fn update_settings(&self, change: impl FnOnce(&mut Configuration)) {
        let mut next = self.settings.current();
        change(&mut next);
        self.settings.update(next).expect("valid settings");
    }
}

/// Two published posts in category 10 and 11, one draft, two pages, three
/// approved comments.
pub fn seeded_repository() -> InMemoryRepository {
    let repo = InMemoryRepository::new(SiteProfile {
        name: "Field Notes".to_string(),
        description: "Notes from the field".to_string(),
        url: "https://notes.example.org".to_string(),
        admin_email: "admin@notes.example.org".to_string(),
    });

    repo.put_category(category(10, "News"));
    repo.put_category(category(11, "Guides"));

    repo.put_post(post(1, &[10], 1));
    repo.put_post(post(2, &[11], 2));
    repo.put_post(Post {
        status: PublishStatus::Draft,
        ..post(3, &[10], 3)
    });
    repo.put_post(Post {
        comment_status: CommentStatus::Closed,
        ..post(4, &[11], 4)
    });

    repo.put_page(page(20, 1));
    repo.put_page(page(21, 0));

    repo.put_comment(approved_comment(100, 1));
    repo.put_comment(approved_comment(101, 1));
    repo.put_comment(approved_comment(102, 2));
    repo
}

pub fn post(id: u64, categories: &[u64], day: u8) -> Post {
    let date = datetime!(2024-04-01 10:00 UTC)
        .replace_day(day)
        .expect("valid day");
    Post {
        id,
        slug: format!("post-{id}"),
        title: format!("Post {id}"),
        content: format!("Content of post {id}"),
        excerpt: String::new(),
        author: 1,
        status: PublishStatus::Publish,
        comment_status: CommentStatus::Open,
        categories: categories.to_vec(),
        sticky: false,
        comment_count: 0,
        date,
        modified: date,
    }
}

pub fn page(id: u64, menu_order: i32) -> Page {
    Page {
        id,
        slug: format!("page-{id}"),
        title: format!("Page {id}"),
        content: String::new(),
        excerpt: String::new(),
        author: 1,
        status: PublishStatus::Publish,
        parent: 0,
        menu_order,
        date: START,
        modified: START,
    }
}

pub fn category(id: u64, name: &str) -> Category {
    Category {
        id,
        name: name.to_string(),
        slug: name.to_lowercase(),
        description: String::new(),
        parent: 0,
        count: 0,
    }
}

pub fn approved_comment(id: u64, post: u64) -> Comment {
    Comment {
        id,
        post,
        parent: 0,
        author_name: "Reader".to_string(),
        author_email: String::new(),
        author_url: String::new(),
        content: format!("Comment {id}"),
        status: ModerationStatus::Approved,
        date: START,
    }
}
