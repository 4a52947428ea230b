pub mod health;

use axum::Router;
use utoipa::OpenApi;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(crate::gateway::server::router())
}

/// HTTP surface only; the gateway protocol is documented alongside its event types.
#[derive(OpenApi)]
#[openapi(
    paths(health::health, health::version),
    components(schemas(health::HealthResponse, health::VersionResponse)),
    tags((name = "Health", description = "Health and version checks"))
)]
pub struct ApiDoc;
