use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use triage_core::models::{EpicDocument, LedgerEntry, ProjectSlug, RuleSet, RuleSource};

use super::AppState;
use crate::ledger::Ledger;
use crate::store::{ObjectEvent, ObjectStore, ProjectStore, StoreError};

// ============================================================
// Error Handling
// ============================================================

/// Log a store error and return a sanitized response to the client.
fn store_error(e: StoreError) -> (StatusCode, String) {
    tracing::error!("Store error: {}", e);
    match e {
        StoreError::Timeout(_) | StoreError::Unavailable(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            "Store unavailable".to_string(),
        ),
        StoreError::Corrupt { .. } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error".to_string(),
        ),
    }
}

fn parse_slug(raw: &str) -> Result<ProjectSlug, (StatusCode, String)> {
    raw.parse::<ProjectSlug>()
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))
}

fn project_store(state: &AppState, slug: ProjectSlug) -> ProjectStore {
    let store: Arc<dyn ObjectStore> = Arc::new(state.store.clone());
    ProjectStore::new(store, slug, &state.options)
}

// ============================================================
// Health
// ============================================================

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ============================================================
// Projects
// ============================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub slug: String,
    pub bucket: String,
    pub created_at: DateTime<Utc>,
}

/// The slug a bucket was derived from, if it follows the bucket template.
fn slug_from_bucket(template: &str, bucket: &str) -> Option<String> {
    let (prefix, suffix) = template.split_once("{project_slug}")?;
    let slug = bucket.strip_prefix(prefix)?.strip_suffix(suffix)?;
    (!slug.is_empty()).then(|| slug.to_string())
}

pub async fn list_projects(
    State(state): State<AppState>,
) -> Result<Json<Vec<ProjectSummary>>, (StatusCode, String)> {
    let buckets = state.store.list_buckets().await.map_err(store_error)?;
    let projects = buckets
        .into_iter()
        .filter_map(|bucket| {
            slug_from_bucket(&state.options.bucket_template, &bucket.name).map(|slug| {
                ProjectSummary {
                    slug,
                    bucket: bucket.name,
                    created_at: bucket.created_at,
                }
            })
        })
        .collect();
    Ok(Json(projects))
}

pub async fn get_epic(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<EpicDocument>, (StatusCode, String)> {
    let slug = parse_slug(&slug)?;
    project_store(&state, slug)
        .get_epic()
        .await
        .map_err(store_error)?
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, "Epic not found".to_string()))
}

/// The rules the next run uses when the requirement has no attachment.
pub async fn get_rules(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<RuleSet>, (StatusCode, String)> {
    let slug = parse_slug(&slug)?;
    let stored = project_store(&state, slug)
        .get_rules()
        .await
        .map_err(store_error)?
        .filter(|text| !text.trim().is_empty());

    Ok(Json(match stored {
        Some(text) => RuleSet {
            source: RuleSource::Stored,
            text,
        },
        None => RuleSet::base(),
    }))
}

pub async fn get_ledger(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<Vec<LedgerEntry>>, (StatusCode, String)> {
    let slug = parse_slug(&slug)?;
    let ledger = Ledger::new(Arc::new(state.store.clone()), state.options.clone());
    ledger.entries(&slug).await.map(Json).map_err(store_error)
}

// ============================================================
// Events
// ============================================================

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub after: i64,
    pub limit: Option<usize>,
}

pub async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Vec<ObjectEvent>>, (StatusCode, String)> {
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);
    let db = state.store.database().clone();
    tokio::task::spawn_blocking(move || db.events_after(query.after, limit))
        .await
        .map_err(|e| store_error(StoreError::Unavailable(e.to_string())))?
        .map(Json)
        .map_err(|e| store_error(StoreError::Unavailable(format!("{:#}", e))))
}
