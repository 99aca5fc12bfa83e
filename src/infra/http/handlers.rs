//! Public read endpoints and comment submission.

use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};

use axum::{
    Json,
    extract::{ConnectInfo, FromRequestParts, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::application::content::{Cached, CommentsParams, PageParams, PostsParams};
use crate::application::error::AppError;
use crate::domain::entities::{Listing, NewComment};
use crate::limiter::{FORWARDED_HEADERS, resolve_client_ip};

use super::HttpState;
use super::extract::{ApiJson, ApiPath, ApiQuery};

pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");
pub const X_WP_TOTAL: HeaderName = HeaderName::from_static("x-wp-total");
pub const X_WP_TOTAL_PAGES: HeaderName = HeaderName::from_static("x-wp-totalpages");

/// Client address as resolved from forwarding headers and the peer socket.
#[derive(Debug, Clone, Copy)]
pub struct ClientAddr(pub IpAddr);

impl<S> FromRequestParts<S> for ClientAddr
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        let forwarded = FORWARDED_HEADERS
            .iter()
            .filter_map(|name| parts.headers.get(*name))
            .filter_map(|value| value.to_str().ok());

        Ok(ClientAddr(resolve_client_ip(forwarded, peer)))
    }
}

fn cache_headers<T>(cached: &Cached<T>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        X_CACHE,
        HeaderValue::from_static(cached.status.as_header_value()),
    );
    headers
}

fn cached_json<T: Serialize>(cached: Cached<T>) -> Response {
    let headers = cache_headers(&cached);
    (headers, Json(cached.value)).into_response()
}

/// Renders a listing as a bare array with its totals in headers.
fn cached_listing<T: Serialize>(cached: Cached<Listing<T>>) -> Response {
    let mut headers = cache_headers(&cached);
    let Listing {
        items,
        total,
        total_pages,
    } = cached.value;
    headers.insert(X_WP_TOTAL, HeaderValue::from(total));
    headers.insert(X_WP_TOTAL_PAGES, HeaderValue::from(total_pages));
    (headers, Json(items)).into_response()
}

pub async fn list_posts(
    State(state): State<HttpState>,
    ApiQuery(params): ApiQuery<PostsParams>,
) -> Result<Response, AppError> {
    Ok(cached_listing(state.content.posts(&params).await?))
}

pub async fn get_post(
    State(state): State<HttpState>,
    ApiPath(id): ApiPath<u64>,
) -> Result<Response, AppError> {
    Ok(cached_json(state.content.post(id).await?))
}

pub async fn list_pages(State(state): State<HttpState>) -> Result<Response, AppError> {
    Ok(cached_json(state.content.pages().await?))
}

pub async fn get_page(
    State(state): State<HttpState>,
    ApiPath(id): ApiPath<u64>,
) -> Result<Response, AppError> {
    Ok(cached_json(state.content.page(id).await?))
}

pub async fn list_categories(State(state): State<HttpState>) -> Result<Response, AppError> {
    Ok(cached_json(state.content.categories().await?))
}

pub async fn category_posts(
    State(state): State<HttpState>,
    ApiPath(id): ApiPath<u64>,
    ApiQuery(params): ApiQuery<PageParams>,
) -> Result<Response, AppError> {
    Ok(cached_listing(state.content.category_posts(id, &params).await?))
}

pub async fn list_comments(
    State(state): State<HttpState>,
    ApiQuery(params): ApiQuery<CommentsParams>,
) -> Result<Response, AppError> {
    Ok(cached_listing(state.content.comments(&params).await?))
}

pub async fn get_comment(
    State(state): State<HttpState>,
    ApiPath(id): ApiPath<u64>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.comments.get(id).await?))
}

pub async fn create_comment(
    State(state): State<HttpState>,
    ClientAddr(client): ClientAddr,
    ApiJson(submission): ApiJson<NewComment>,
) -> Result<impl IntoResponse, AppError> {
    let comment = state.comments.create(submission, client).await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

pub async fn site_info(State(state): State<HttpState>) -> Result<Response, AppError> {
    Ok(cached_json(state.content.site_info().await?))
}

pub async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}
