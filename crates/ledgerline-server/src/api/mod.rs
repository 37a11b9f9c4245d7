pub mod response;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value as JsonValue};
use sqlx::PgPool;
use tower_http::compression::CompressionLayer;

use crate::{
    attribution::AttributionLayer,
    audit::{audit_routes, AuditQueryService},
    config::Config,
    data::{AttributedDataLayer, PgBackend},
    db, middleware,
};

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub audit: AuditQueryService,
    /// Attribution-aware data access for business handlers
    pub data: AttributedDataLayer<PgBackend>,
}

impl AppState {
    pub fn new(db: PgPool, config: &Config) -> Self {
        Self {
            audit: AuditQueryService::new(db.clone()).with_max_page_size(config.audit.max_page_size),
            data: AttributedDataLayer::new(PgBackend::new(db.clone()))
                .with_session_variable(&config.audit.session_variable),
            db,
        }
    }
}

/// Routes plus the middleware stack
///
/// The authentication collaborator must be layered outside this router so its
/// `AuthenticatedUser` extension exists by the time attribution runs.
pub fn create_router(state: AppState, config: &Config) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1/audit-logs", audit_routes())
        .with_state(state)
        .layer(AttributionLayer::new().trusting_user_header(config.audit.trust_user_header))
        .layer(CompressionLayer::new())
        .layer(middleware::tracing_layer())
        .layer(middleware::cors_layer(&config.cors))
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<JsonValue>) {
    match db::health_check(&state.db).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "database": "connected"
            })),
        ),
        Err(e) => {
            tracing::error!("Database health check failed: {:?}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "database": "unreachable"
                })),
            )
        },
    }
}
