//! HTTP gateway
//!
//! Thin axum surface over auth, the card directory, the cache replica and
//! transfer ingestion. Every response uses the `ApiResponse` envelope.

pub mod handlers;
pub mod state;
pub mod types;

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    middleware::{Next, from_fn_with_state},
    response::Response,
    routing::{get, post},
};
use tokio::net::TcpListener;

use crate::shutdown::ShutdownSignal;
pub use state::AppState;
use types::{ApiResponse, error_codes};

/// Bearer-token middleware. Injects `AuthenticatedUser` into extensions.
pub async fn bearer_auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, (StatusCode, Json<ApiResponse<()>>)> {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or((
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::<()>::error(
                error_codes::MISSING_AUTH,
                "Missing Authorization header",
            )),
        ))?;

    let Some(token) = auth_header.strip_prefix("Bearer ") else {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::<()>::error(
                error_codes::AUTH_FAILED,
                "Invalid token format",
            )),
        ));
    };

    match state.auth.authenticate(token) {
        Ok(user) => {
            request.extensions_mut().insert(user);
            Ok(next.run(request).await)
        }
        Err(_) => Err((
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::<()>::error(
                error_codes::AUTH_FAILED,
                "Invalid or expired token",
            )),
        )),
    }
}

/// Build the full router
pub fn create_app(state: Arc<AppState>) -> Router {
    // ==========================================================================
    // Auth Routes
    // ==========================================================================
    let auth_routes = Router::new()
        .route("/register", post(handlers::register))
        .route("/login", post(handlers::login))
        .route("/validate", post(handlers::validate_token))
        .route(
            "/logout",
            post(handlers::logout).layer(from_fn_with_state(
                state.clone(),
                bearer_auth_middleware,
            )),
        );

    // ==========================================================================
    // Card Routes (Bearer)
    // ==========================================================================
    let card_routes = Router::new()
        .route("/", post(handlers::create_card).get(handlers::list_cards))
        .route("/{card_number}", get(handlers::get_card))
        .route(
            "/{card_number}/availability",
            get(handlers::check_availability).put(handlers::set_availability),
        )
        .layer(from_fn_with_state(state.clone(), bearer_auth_middleware));

    // ==========================================================================
    // Transaction Routes (Bearer)
    // ==========================================================================
    let transaction_routes = Router::new()
        .route("/", post(handlers::create_transaction))
        .route("/{idempotency_key}", get(handlers::get_transaction))
        .layer(from_fn_with_state(state.clone(), bearer_auth_middleware));

    // ==========================================================================
    // Cache Replica Routes
    // ==========================================================================
    let cache_routes = Router::new()
        .route("/cards/{card_number}", get(handlers::get_cached_card))
        .route("/stats", get(handlers::cache_stats));

    Router::new()
        .route("/api/v1/health", get(handlers::health_check))
        .nest("/api/v1/auth", auth_routes)
        .nest("/api/v1/cards", card_routes)
        .nest("/api/v1/transactions", transaction_routes)
        .nest("/api/v1/cache", cache_routes)
        .with_state(state)
}

/// Serve until `shutdown` is requested
pub async fn run_server(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: Arc<ShutdownSignal>,
) -> std::io::Result<()> {
    let app = create_app(state);

    if let Ok(addr) = listener.local_addr() {
        tracing::info!("Gateway listening on http://{}", addr);
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await
}
