mod admin;
mod extract;
pub mod handlers;
mod middleware;

use std::sync::Arc;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post, put},
};

use crate::application::{
    comments::CommentService, content::ContentService, publishing::PublishingService,
    settings::SettingsService,
};

pub use admin::{SettingsPatch, SettingsUpdated};
pub use handlers::{ClientAddr, X_CACHE, X_WP_TOTAL, X_WP_TOTAL_PAGES};
pub use middleware::RequestContext;

#[derive(Clone)]
pub struct HttpState {
    pub content: Arc<ContentService>,
    pub comments: Arc<CommentService>,
}

#[derive(Clone)]
pub struct AdminState {
    pub content: Arc<ContentService>,
    pub publishing: Arc<PublishingService>,
    pub settings: Arc<SettingsService>,
}

/// Public content API.
pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/api/v1/posts", get(handlers::list_posts))
        .route("/api/v1/posts/{id}", get(handlers::get_post))
        .route("/api/v1/pages", get(handlers::list_pages))
        .route("/api/v1/pages/{id}", get(handlers::get_page))
        .route("/api/v1/categories", get(handlers::list_categories))
        .route(
            "/api/v1/categories/{id}/posts",
            get(handlers::category_posts),
        )
        .route(
            "/api/v1/comments",
            get(handlers::list_comments).post(handlers::create_comment),
        )
        .route("/api/v1/comments/{id}", get(handlers::get_comment))
        .route("/api/v1/site-info", get(handlers::site_info))
        .route("/_health", get(handlers::health))
        .with_state(state)
        .layer(axum_middleware::from_fn(middleware::log_responses))
        .layer(axum_middleware::from_fn(middleware::set_request_context))
}

/// Administration API, bound to its own listener.
pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/cache", axum::routing::delete(admin::clear_cache))
        .route(
            "/admin/settings",
            get(admin::get_settings).patch(admin::patch_settings),
        )
        .route(
            "/admin/posts/{id}",
            put(admin::put_post).delete(admin::delete_post),
        )
        .route(
            "/admin/pages/{id}",
            put(admin::put_page).delete(admin::delete_page),
        )
        .route(
            "/admin/categories/{id}",
            put(admin::put_category).delete(admin::delete_category),
        )
        .route(
            "/admin/comments/{id}",
            axum::routing::patch(admin::edit_comment).delete(admin::delete_comment),
        )
        .route(
            "/admin/comments/{id}/status",
            post(admin::moderate_comment),
        )
        .with_state(state)
        .layer(axum_middleware::from_fn(middleware::log_responses))
        .layer(axum_middleware::from_fn(middleware::set_request_context))
}
