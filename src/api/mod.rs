//! REST API layer: route handlers, OpenAPI description and router
//! composition.
//!
//! Resource endpoints are mounted under `/api/v1`; `/health` sits at the
//! root. With the `swagger-ui` feature the UI is served at `/swagger-ui`.

pub mod handlers;

use axum::Router;
use utoipa::OpenApi;

use crate::app_state::AppState;
use crate::domain::EventCategory;
use handlers::system::{EventCategoryInfo, HealthResponse};

/// OpenAPI description of the HTTP routes.
#[derive(Debug, OpenApi)]
#[openapi(
    info(title = "ijt-gateway"),
    paths(handlers::system::health_handler, handlers::system::event_categories_handler),
    components(schemas(HealthResponse, EventCategoryInfo, EventCategory)),
    tags((name = "System", description = "Health and catalog endpoints"))
)]
pub struct ApiDoc;

/// Builds the complete API router with all REST endpoints.
pub fn build_router() -> Router<AppState> {
    let router = Router::new()
        .nest("/api/v1", handlers::routes())
        .merge(handlers::system::routes());
    with_swagger_ui(router)
}

#[cfg(feature = "swagger-ui")]
fn with_swagger_ui(router: Router<AppState>) -> Router<AppState> {
    router.merge(
        utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
            .url("/api-docs/openapi.json", ApiDoc::openapi()),
    )
}

#[cfg(not(feature = "swagger-ui"))]
fn with_swagger_ui(router: Router<AppState>) -> Router<AppState> {
    router
}
