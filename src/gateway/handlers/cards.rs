//! Card directory handlers (Bearer)

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
};

use super::super::state::AppState;
use super::super::types::{
    ApiError, ApiResult, CreateCardRequest, SetAvailabilityRequest, created, ok,
};
use crate::auth::AuthenticatedUser;
use crate::directory::{Card, CardAvailability, DirectoryError, NewCard};

/// POST /api/v1/cards
pub async fn create_card(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<CreateCardRequest>,
) -> ApiResult<Card> {
    let card = state
        .directory
        .create_card(NewCard {
            user_id: user.user_id,
            username: user.username,
            card_type: req.card_type,
        })
        .await?;
    created(card)
}

/// GET /api/v1/cards
pub async fn list_cards(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> ApiResult<Vec<Card>> {
    ok(state.directory.list_cards(user.user_id).await?)
}

/// GET /api/v1/cards/{card_number}
///
/// Full card view, owner only.
pub async fn get_card(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(card_number): Path<String>,
) -> ApiResult<Card> {
    let card = owned_card(&state, &user, &card_number).await?;
    ok(card)
}

/// GET /api/v1/cards/{card_number}/availability
pub async fn check_availability(
    State(state): State<Arc<AppState>>,
    Path(card_number): Path<String>,
) -> ApiResult<CardAvailability> {
    ok(state.directory.check_availability(&card_number).await?)
}

/// PUT /api/v1/cards/{card_number}/availability
pub async fn set_availability(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(card_number): Path<String>,
    Json(req): Json<SetAvailabilityRequest>,
) -> ApiResult<CardAvailability> {
    owned_card(&state, &user, &card_number).await?;
    state
        .directory
        .set_availability(&card_number, req.availability)
        .await?;
    ok(state.directory.check_availability(&card_number).await?)
}

async fn owned_card(
    state: &AppState,
    user: &AuthenticatedUser,
    card_number: &str,
) -> Result<Card, ApiError> {
    let card = state
        .directory
        .get_card(card_number)
        .await?
        .ok_or_else(|| DirectoryError::CardNotFound(card_number.to_string()))?;
    if card.user_id != user.user_id {
        return Err(ApiError::forbidden("Card does not belong to the caller"));
    }
    Ok(card)
}
