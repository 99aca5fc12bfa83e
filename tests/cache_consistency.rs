//! End-to-end cache behaviour: reads through the content service, writes
//! through the publishing, comment and settings services.

mod support;

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use contentgate::application::content::{CommentsParams, PageParams, PostsParams};
use contentgate::application::error::{AppError, ErrorKind};
use contentgate::cache::CacheStatus;
use contentgate::domain::entities::{NewComment, Post};
use futures::future::join_all;
use support::{Harness, category, post};

fn for_post(id: u64) -> CommentsParams {
    CommentsParams {
        post: Some(id),
        ..Default::default()
    }
}

#[tokio::test]
async fn post_save_turns_the_next_list_read_into_a_miss() {
    let harness = Harness::new();
    let params = PostsParams::default();

    let first = harness.content.posts(&params).await.expect("posts");
    assert_eq!(first.status, CacheStatus::Miss);
    assert_eq!(first.value.total, 3);

    let second = harness.content.posts(&params).await.expect("posts");
    assert_eq!(second.status, CacheStatus::Hit);
    assert_eq!(harness.repo.read_count(), 1);

    harness
        .publishing
        .save_post(Post {
            title: "Renamed".to_string(),
            ..post(1, &[10], 1)
        })
        .await
        .expect("save");

    let third = harness.content.posts(&params).await.expect("posts");
    assert_eq!(third.status, CacheStatus::Miss);
    assert!(third.value.items.iter().any(|p| p.title == "Renamed"));
}

#[tokio::test]
async fn post_save_leaves_unrelated_reads_cached() {
    let harness = Harness::new();
    let content = &harness.content;

    content.post(1).await.expect("post 1");
    content.post(2).await.expect("post 2");
    content.pages().await.expect("pages");
    content.categories().await.expect("categories");
    content.comments(&for_post(1)).await.expect("comments");
    content.site_info().await.expect("site info");
    content
        .category_posts(11, &PageParams::default())
        .await
        .expect("category 11");

    harness
        .publishing
        .save_post(post(1, &[10], 1))
        .await
        .expect("save");

    assert_eq!(content.post(1).await.expect("post 1").status, CacheStatus::Miss);
    assert!(content.post(2).await.expect("post 2").is_hit());
    assert!(content.pages().await.expect("pages").is_hit());
    assert!(content.categories().await.expect("categories").is_hit());
    assert!(content.comments(&for_post(1)).await.expect("comments").is_hit());
    assert!(content.site_info().await.expect("site info").is_hit());
    assert!(
        content
            .category_posts(11, &PageParams::default())
            .await
            .expect("category 11")
            .is_hit()
    );
}

#[tokio::test]
async fn moving_a_post_evicts_both_category_lists() {
    let harness = Harness::new();
    let content = &harness.content;
    let params = PageParams::default();

    content.category_posts(10, &params).await.expect("category 10");
    content.category_posts(11, &params).await.expect("category 11");

    harness
        .publishing
        .save_post(post(1, &[11], 1))
        .await
        .expect("save");

    let old = content.category_posts(10, &params).await.expect("category 10");
    let new = content.category_posts(11, &params).await.expect("category 11");
    assert_eq!(old.status, CacheStatus::Miss);
    assert_eq!(new.status, CacheStatus::Miss);
    assert_eq!(old.value.total, 0);
    assert!(new.value.items.iter().any(|p| p.id == 1));
}

#[tokio::test]
async fn new_comment_evicts_only_its_post_and_unscoped_lists() {
    let harness = Harness::new();
    let content = &harness.content;

    content.comments(&for_post(1)).await.expect("post 1 comments");
    content.comments(&for_post(2)).await.expect("post 2 comments");
    content
        .comments(&CommentsParams::default())
        .await
        .expect("all comments");
    content.post(1).await.expect("post 1");

    harness
        .comments
        .create(
            NewComment {
                post: Some(1),
                author_name: Some("Ada".to_string()),
                content: Some("First!".to_string()),
                ..Default::default()
            },
            IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)),
        )
        .await
        .expect("comment accepted");

    assert!(!content.comments(&for_post(1)).await.expect("post 1").is_hit());
    assert!(content.comments(&for_post(2)).await.expect("post 2").is_hit());
    assert!(
        !content
            .comments(&CommentsParams::default())
            .await
            .expect("all")
            .is_hit()
    );
    assert!(content.post(1).await.expect("post 1").is_hit());
}

#[tokio::test]
async fn deleting_a_post_drops_its_cached_comments() {
    let harness = Harness::new();
    let content = &harness.content;

    let before = content.comments(&for_post(1)).await.expect("comments");
    assert_eq!(before.value.total, 2);
    content.comments(&for_post(2)).await.expect("other post");

    harness.publishing.delete_post(1).await.expect("delete");

    let after = content.comments(&for_post(1)).await.expect("comments");
    assert!(!after.is_hit());
    assert_eq!(after.value.total, 0);
    assert!(content.comments(&for_post(2)).await.expect("other").is_hit());
    let err = content.post(1).await.expect_err("deleted");
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn category_edit_evicts_every_page_of_its_post_list() {
    let harness = Harness::new();
    let content = &harness.content;
    let page_one = PageParams::default();
    let page_two = PageParams {
        page: Some(2),
        per_page: Some(1),
    };

    content.category_posts(10, &page_one).await.expect("page one");
    content.category_posts(10, &page_two).await.expect("page two");
    content.category_posts(11, &page_one).await.expect("other");
    content.categories().await.expect("categories");

    harness
        .publishing
        .save_category(category(10, "Headlines"))
        .await
        .expect("edit");

    assert!(!content.category_posts(10, &page_one).await.expect("one").is_hit());
    assert!(!content.category_posts(10, &page_two).await.expect("two").is_hit());
    assert!(content.category_posts(11, &page_one).await.expect("other").is_hit());
    let categories = content.categories().await.expect("categories");
    assert!(!categories.is_hit());
    assert!(categories.value.iter().any(|c| c.name == "Headlines"));
}

#[tokio::test]
async fn missing_category_is_not_found_and_not_cached() {
    let harness = Harness::new();

    for _ in 0..2 {
        let err = harness
            .content
            .category_posts(99, &PageParams::default())
            .await
            .expect_err("missing category");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
    assert_eq!(harness.repo.read_count(), 2);
    assert!(harness.store.is_empty());
}

#[tokio::test]
async fn drafts_are_not_found() {
    let harness = Harness::new();
    let err = harness.content.post(3).await.expect_err("draft");
    assert!(matches!(err, AppError::NotFound { entity: "post" }));
}

#[tokio::test]
async fn disabling_the_cache_makes_every_read_a_miss() {
    let harness = Harness::new();
    harness.update_settings(|config| config.cache_enabled = false);

    for _ in 0..3 {
        let read = harness.content.posts(&PostsParams::default()).await.expect("posts");
        assert_eq!(read.status, CacheStatus::Miss);
    }
    assert_eq!(harness.repo.read_count(), 3);
    assert!(harness.store.is_empty());
}

#[tokio::test]
async fn zero_ttl_passes_through() {
    let harness = Harness::new();
    harness.update_settings(|config| config.cache_ttl_seconds = 0);

    harness.content.pages().await.expect("pages");
    let again = harness.content.pages().await.expect("pages");
    assert_eq!(again.status, CacheStatus::Miss);
    assert_eq!(harness.repo.read_count(), 2);
}

#[tokio::test]
async fn entries_expire_after_their_ttl() {
    let harness = Harness::new();

    harness.content.pages().await.expect("pages");
    harness.clock.advance(time::Duration::seconds(299));
    assert!(harness.content.pages().await.expect("pages").is_hit());

    harness.clock.advance(time::Duration::seconds(2));
    assert!(!harness.content.pages().await.expect("pages").is_hit());
}

#[tokio::test]
async fn only_cache_options_evict_site_info() {
    let harness = Harness::new();

    harness.content.site_info().await.expect("site info");
    harness.update_settings(|config| config.allow_comments = false);
    assert!(harness.content.site_info().await.expect("site info").is_hit());

    harness.update_settings(|config| config.cache_ttl_seconds = 120);
    let info = harness.content.site_info().await.expect("site info");
    assert!(!info.is_hit());
    assert_eq!(info.value.cache_ttl_seconds, 120);
    assert_eq!(info.value.name, "Field Notes");
}

#[tokio::test]
async fn clear_cache_evicts_everything() {
    let harness = Harness::new();
    let content = &harness.content;

    content.posts(&PostsParams::default()).await.expect("posts");
    content.pages().await.expect("pages");
    content.site_info().await.expect("site info");

    let report = content.clear_cache();
    assert_eq!(report.removed(), 3);
    assert!(harness.store.is_empty());
    assert!(!content.pages().await.expect("pages").is_hit());
}

#[tokio::test]
async fn repository_failures_are_not_cached() {
    let harness = Harness::new();

    harness.repo.set_failing(true);
    let err = harness
        .content
        .posts(&PostsParams::default())
        .await
        .expect_err("store down");
    assert_eq!(err.kind(), ErrorKind::Repository);
    assert!(harness.store.is_empty());

    harness.repo.set_failing(false);
    let read = harness.content.posts(&PostsParams::default()).await.expect("posts");
    assert_eq!(read.status, CacheStatus::Miss);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_misses_load_once() {
    let harness = Harness::new();
    harness.repo.set_read_delay(Duration::from_millis(50));
    let content = Arc::clone(&harness.content);

    let reads = (0..16).map(|_| {
        let content = Arc::clone(&content);
        tokio::spawn(async move { content.posts(&PostsParams::default()).await })
    });
    let results = join_all(reads).await;

    let mut misses = 0;
    for result in results {
        let read = result.expect("task").expect("posts");
        if !read.is_hit() {
            misses += 1;
        }
    }
    assert_eq!(misses, 1);
    assert_eq!(harness.repo.read_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn read_overlapping_a_save_does_not_cache_the_old_post() {
    let harness = Harness::new();
    harness.repo.set_read_delay(Duration::from_millis(200));

    let slow_read = {
        let content = Arc::clone(&harness.content);
        tokio::spawn(async move { content.post(2).await })
    };
    // Let the read take its snapshot before the save commits.
    tokio::time::sleep(Duration::from_millis(50)).await;
    harness
        .publishing
        .save_post(Post {
            title: "Renamed".to_string(),
            ..post(2, &[11], 2)
        })
        .await
        .expect("save");

    let stale = slow_read.await.expect("task").expect("post");
    assert_eq!(stale.status, CacheStatus::Miss);
    assert_eq!(stale.value.title, "Post 2");

    harness.repo.set_read_delay(Duration::ZERO);
    let fresh = harness.content.post(2).await.expect("post");
    assert_eq!(fresh.status, CacheStatus::Miss);
    assert_eq!(fresh.value.title, "Renamed");
}

#[tokio::test]
async fn equivalent_parameters_share_an_entry() {
    let harness = Harness::new();

    harness.content.posts(&PostsParams::default()).await.expect("posts");
    let explicit = harness
        .content
        .posts(&PostsParams {
            page: Some(1),
            per_page: Some(10),
            ..Default::default()
        })
        .await
        .expect("posts");
    assert!(explicit.is_hit());
}
