//! Authentication handlers

use std::sync::Arc;

use axum::{Extension, Json, extract::State};

use super::super::state::AppState;
use super::super::types::{
    ApiResult, CredentialsRequest, RegisterResponse, ValidateTokenRequest, ValidateTokenResponse,
    created, ok,
};
use crate::auth::{AuthenticatedUser, LoginResponse};

/// POST /api/v1/auth/register
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CredentialsRequest>,
) -> ApiResult<RegisterResponse> {
    let user_id = state.auth.register(&req.username, &req.password)?;
    created(RegisterResponse {
        success: true,
        message: "User registered successfully".to_string(),
        user_id,
    })
}

/// POST /api/v1/auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CredentialsRequest>,
) -> ApiResult<LoginResponse> {
    ok(state.auth.login(&req.username, &req.password)?)
}

/// POST /api/v1/auth/validate
///
/// Always 200; the verdict is in `valid`.
pub async fn validate_token(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ValidateTokenRequest>,
) -> ApiResult<ValidateTokenResponse> {
    ok(ValidateTokenResponse {
        valid: state.auth.validate_token(&req.username, &req.token),
    })
}

/// POST /api/v1/auth/logout (Bearer)
pub async fn logout(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> ApiResult<bool> {
    ok(state.auth.logout(&user.username))
}
