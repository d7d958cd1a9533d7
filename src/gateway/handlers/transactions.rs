//! Transfer handlers (Bearer)

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};

use super::super::state::AppState;
use super::super::types::{
    ApiError, ApiResponse, ApiResult, CreateTransactionRequest, CreateTransactionResponse, ok,
};
use crate::auth::AuthenticatedUser;
use crate::money::parse_amount;
use crate::transfer::{Acceptance, TransferError, TransferRequest, TransferStatus};

/// POST /api/v1/transactions
///
/// 202 once the transfer is durably queued. Settlement is observed through
/// `GET /api/v1/transactions/{idempotency_key}`. A rejection keeps its error
/// status and code and carries `{accepted: false, message}` as data.
pub async fn create_transaction(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<CreateTransactionRequest>,
) -> ApiResult<CreateTransactionResponse> {
    let acceptance = match submit(&state, &user, req).await {
        Ok(acceptance) => acceptance,
        Err(e) => {
            let body = CreateTransactionResponse::rejected(e.to_string());
            return Err(ApiError::from(e).with_data(&body));
        }
    };
    tracing::info!(
        user_id = user.user_id,
        idempotency_key = %acceptance.idempotency_key,
        "Transaction accepted"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::success(CreateTransactionResponse::queued(
            acceptance.idempotency_key.as_str().to_string(),
            acceptance.message_id,
        ))),
    ))
}

async fn submit(
    state: &AppState,
    user: &AuthenticatedUser,
    req: CreateTransactionRequest,
) -> Result<Acceptance, TransferError> {
    let amount = parse_amount(&req.amount)?;

    let mut request = TransferRequest::new(
        user.user_id,
        req.card_number.trim(),
        req.recipient_card_number.trim(),
        amount,
    );
    if let Some(key) = req.idempotency_key {
        request = request.with_idempotency_key(key);
    }
    state.ingestion.submit(request).await
}

/// GET /api/v1/transactions/{idempotency_key}
pub async fn get_transaction(
    State(state): State<Arc<AppState>>,
    Path(idempotency_key): Path<String>,
) -> ApiResult<TransferStatus> {
    ok(state.ingestion.status(&idempotency_key).await?)
}
