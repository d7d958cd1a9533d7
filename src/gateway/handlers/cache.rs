//! Cache replica read surface (`RedisGetCard`)

use std::sync::Arc;

use axum::extract::{Path, State};

use super::super::state::AppState;
use super::super::types::{ApiError, ApiResult, error_codes, ok};
use crate::cache::CacheStats;
use crate::directory::Card;

/// GET /api/v1/cache/cards/{card_number}
///
/// Replica only; a miss is a 404 and never falls through to the directory.
pub async fn get_cached_card(
    State(state): State<Arc<AppState>>,
    Path(card_number): Path<String>,
) -> ApiResult<Card> {
    match state.directory.cache().lookup(&card_number) {
        Some(card) => ok(card),
        None => ApiError::not_found(error_codes::CACHE_MISS, "Cache miss").into_err(),
    }
}

/// GET /api/v1/cache/stats
pub async fn cache_stats(State(state): State<Arc<AppState>>) -> ApiResult<CacheStats> {
    ok(state.directory.cache().stats())
}
