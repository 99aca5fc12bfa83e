//! Administration endpoints: content mutations, runtime settings and cache
//! clearing. Served on the admin listener only.

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::application::error::AppError;
use crate::application::settings::Configuration;
use crate::domain::entities::{Category, Page, Post};
use crate::domain::types::ModerationStatus;

use super::AdminState;
use super::extract::{ApiJson, ApiPath};

#[derive(Debug, Serialize)]
pub struct ClearCacheResponse {
    pub event_id: Uuid,
    pub epoch: u64,
    pub removed: usize,
}

/// Partial settings update; absent fields keep their current value.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SettingsPatch {
    pub cache_enabled: Option<bool>,
    pub cache_ttl_seconds: Option<u64>,
    pub comment_cooldown_minutes: Option<u64>,
    pub global_flood_threshold: Option<u32>,
    pub global_flood_window_seconds: Option<u64>,
    pub allow_comments: Option<bool>,
    pub posts_per_page: Option<u32>,
}

impl SettingsPatch {
    fn apply(self, mut current: Configuration) -> Configuration {
        if let Some(value) = self.cache_enabled {
            current.cache_enabled = value;
        }
        if let Some(value) = self.cache_ttl_seconds {
            current.cache_ttl_seconds = value;
        }
        if let Some(value) = self.comment_cooldown_minutes {
            current.comment_cooldown_minutes = value;
        }
        if let Some(value) = self.global_flood_threshold {
            current.global_flood_threshold = value;
        }
        if let Some(value) = self.global_flood_window_seconds {
            current.global_flood_window_seconds = value;
        }
        if let Some(value) = self.allow_comments {
            current.allow_comments = value;
        }
        if let Some(value) = self.posts_per_page {
            current.posts_per_page = value;
        }
        current
    }
}

#[derive(Debug, Serialize)]
pub struct SettingsUpdated {
    pub settings: Configuration,
    pub changed: Vec<&'static str>,
}

#[derive(Debug, Deserialize)]
pub struct StatusBody {
    pub status: ModerationStatus,
}

#[derive(Debug, Deserialize)]
pub struct ContentBody {
    pub content: String,
}

fn ensure_path_id(path_id: u64, body_id: u64) -> Result<(), AppError> {
    if path_id != body_id {
        return Err(AppError::validation(format!(
            "path id {path_id} does not match body id {body_id}"
        )));
    }
    Ok(())
}

pub async fn clear_cache(State(state): State<AdminState>) -> impl IntoResponse {
    let report = state.content.clear_cache();
    Json(ClearCacheResponse {
        event_id: report.event_id,
        epoch: report.epoch,
        removed: report.removed(),
    })
}

pub async fn get_settings(State(state): State<AdminState>) -> impl IntoResponse {
    Json(state.settings.current())
}

pub async fn patch_settings(
    State(state): State<AdminState>,
    ApiJson(patch): ApiJson<SettingsPatch>,
) -> Result<impl IntoResponse, AppError> {
    let next = patch.apply(state.settings.current());
    let changed = state.settings.update(next)?;
    Ok(Json(SettingsUpdated {
        settings: state.settings.current(),
        changed: changed.iter().map(|option| option.as_str()).collect(),
    }))
}

pub async fn put_post(
    State(state): State<AdminState>,
    ApiPath(id): ApiPath<u64>,
    ApiJson(post): ApiJson<Post>,
) -> Result<StatusCode, AppError> {
    ensure_path_id(id, post.id)?;
    state.publishing.save_post(post).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_post(
    State(state): State<AdminState>,
    ApiPath(id): ApiPath<u64>,
) -> Result<StatusCode, AppError> {
    state.publishing.delete_post(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn put_page(
    State(state): State<AdminState>,
    ApiPath(id): ApiPath<u64>,
    ApiJson(page): ApiJson<Page>,
) -> Result<StatusCode, AppError> {
    ensure_path_id(id, page.id)?;
    state.publishing.save_page(page).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_page(
    State(state): State<AdminState>,
    ApiPath(id): ApiPath<u64>,
) -> Result<StatusCode, AppError> {
    state.publishing.delete_page(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn put_category(
    State(state): State<AdminState>,
    ApiPath(id): ApiPath<u64>,
    ApiJson(category): ApiJson<Category>,
) -> Result<StatusCode, AppError> {
    ensure_path_id(id, category.id)?;
    state.publishing.save_category(category).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_category(
    State(state): State<AdminState>,
    ApiPath(id): ApiPath<u64>,
) -> Result<StatusCode, AppError> {
    state.publishing.delete_category(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn moderate_comment(
    State(state): State<AdminState>,
    ApiPath(id): ApiPath<u64>,
    ApiJson(body): ApiJson<StatusBody>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(
        state.publishing.moderate_comment(id, body.status).await?,
    ))
}

pub async fn edit_comment(
    State(state): State<AdminState>,
    ApiPath(id): ApiPath<u64>,
    ApiJson(body): ApiJson<ContentBody>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.publishing.edit_comment(id, body.content).await?))
}

pub async fn delete_comment(
    State(state): State<AdminState>,
    ApiPath(id): ApiPath<u64>,
) -> Result<StatusCode, AppError> {
    state.publishing.delete_comment(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
