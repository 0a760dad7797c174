//! System endpoints: health check and event-category catalog.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use utoipa::ToSchema;

use crate::app_state::AppState;
use crate::domain::EventCategory;
use crate::domain::event_category::{IJT_BASE_NS, MACHINERY_RESULT_NS};

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    status: String,
    timestamp: String,
    version: String,
    /// Open browser WebSocket sessions.
    ws_sessions: usize,
}

/// `GET /health`: Service health status.
#[utoipa::path(
    get,
    path = "/health",
    tag = "System",
    summary = "Health check",
    description = "Returns service health status, version, current timestamp and open WebSocket sessions.",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
    )
)]
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            timestamp: Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            ws_sessions: state.open_sessions(),
        }),
    )
}

/// One entry of the event-category catalog.
#[derive(Debug, Serialize, ToSchema)]
pub struct EventCategoryInfo {
    category: EventCategory,
    /// Filter string that selects only this category.
    filter: String,
    /// Event types filtered on, as browse names below `BaseEventType`.
    event_types: Vec<String>,
    /// Companion namespaces the browse names live in.
    namespaces: Vec<String>,
}

impl EventCategoryInfo {
    fn describe(category: EventCategory) -> Self {
        let (filter, event_types, namespaces) = match category {
            EventCategory::ResultReady => (
                "ResultEvent",
                vec![
                    "ResultReadyEventType".to_string(),
                    "ResultReadyEventType/JoiningSystemResultReadyEventType".to_string(),
                ],
                vec![MACHINERY_RESULT_NS, IJT_BASE_NS],
            ),
            EventCategory::JoiningSystem => (
                "JoiningSystemEvent",
                vec!["JoiningSystemEventType".to_string()],
                vec![IJT_BASE_NS],
            ),
        };
        Self {
            category,
            filter: filter.to_string(),
            event_types,
            namespaces: namespaces.into_iter().map(str::to_string).collect(),
        }
    }
}

/// `GET /api/v1/event-categories`: List subscribable event categories.
#[utoipa::path(
    get,
    path = "/api/v1/event-categories",
    tag = "System",
    summary = "List event categories",
    description = "Returns every event category a browser can subscribe to, with the event types it filters on.",
    responses(
        (status = 200, description = "Event category catalog", body = Vec<EventCategoryInfo>),
    )
)]
pub async fn event_categories_handler() -> impl IntoResponse {
    let catalog: Vec<_> = EventCategory::ALL
        .into_iter()
        .map(EventCategoryInfo::describe)
        .collect();
    (StatusCode::OK, Json(catalog))
}

/// Routes mounted under `/api/v1`.
pub fn api_routes() -> Router<AppState> {
    Router::new().route("/event-categories", get(event_categories_handler))
}

/// System routes mounted at the root level (not under /api/v1).
pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health_handler))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_filters_select_their_category() {
        for category in EventCategory::ALL {
            let info = EventCategoryInfo::describe(category);
            assert_eq!(EventCategory::select(&info.filter), vec![category]);
            assert!(!info.event_types.is_empty());
        }
    }
}
