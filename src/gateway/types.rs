//! API request/response types and error codes
//!
//! - `ApiResponse<T>`: Unified response wrapper
//! - `ApiError`: status + envelope, returned by handlers as `Err`
//! - `error_codes`: Standard error code constants

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::auth::AuthError;
use crate::directory::{CardType, DirectoryError};
use crate::transfer::TransferError;

// ============================================================================
// Unified API Response Format
// ============================================================================

/// Unified API response wrapper
///
/// - code: 0 = success, non-zero = error code
/// - msg: short message description
/// - data: actual data (success); absent on error unless the endpoint
///   defines a rejection body
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: error_codes::SUCCESS,
            msg: "ok".to_string(),
            data: Some(data),
        }
    }

    pub fn error(code: i32, msg: impl Into<String>) -> ApiResponse<()> {
        ApiResponse {
            code,
            msg: msg.into(),
            data: None,
        }
    }
}

pub type ApiResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), ApiError>;

pub fn ok<T>(data: T) -> ApiResult<T> {
    Ok((StatusCode::OK, Json(ApiResponse::success(data))))
}

pub fn created<T>(data: T) -> ApiResult<T> {
    Ok((StatusCode::CREATED, Json(ApiResponse::success(data))))
}

// ============================================================================
// ApiError
// ============================================================================

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: i32,
    pub msg: String,
    pub data: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: i32, msg: impl Into<String>) -> Self {
        Self {
            status,
            code,
            msg: msg.into(),
            data: None,
        }
    }

    /// Attach a body to the error envelope
    pub fn with_data<T: Serialize>(mut self, data: &T) -> Self {
        self.data = serde_json::to_value(data).ok();
        self
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error_codes::INVALID_PARAMETER, msg)
    }

    pub fn not_found(code: i32, msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, code, msg)
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, error_codes::FORBIDDEN, msg)
    }

    pub fn into_err<T>(self) -> ApiResult<T> {
        Err(self)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiResponse {
            code: self.code,
            msg: self.msg,
            data: self.data,
        };
        (self.status, Json(body)).into_response()
    }
}

fn status_from(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

impl From<TransferError> for ApiError {
    fn from(e: TransferError) -> Self {
        let code = match &e {
            TransferError::Unauthorized => error_codes::MISSING_AUTH,
            TransferError::CardNotOwned => error_codes::FORBIDDEN,
            TransferError::InsufficientFunds => error_codes::INSUFFICIENT_BALANCE,
            TransferError::CardNotFound(_) => error_codes::CARD_NOT_FOUND,
            TransferError::CardUnavailable(_) => error_codes::CARD_UNAVAILABLE,
            TransferError::TransactionNotFound(_) => error_codes::TRANSACTION_NOT_FOUND,
            TransferError::IdempotencyKeyConflict(_) => error_codes::IDEMPOTENCY_CONFLICT,
            TransferError::Timeout(_) | TransferError::ServiceUnavailable(_) => {
                error_codes::SERVICE_UNAVAILABLE
            }
            TransferError::InvariantViolation(_) | TransferError::SystemError(_) => {
                error_codes::INTERNAL_ERROR
            }
            _ => error_codes::INVALID_PARAMETER,
        };
        if e.is_transient() || e.is_fatal() {
            tracing::warn!(error = %e, code = e.code(), "Transfer call failed");
        }
        ApiError::new(status_from(e.http_status()), code, e.to_string())
    }
}

impl From<DirectoryError> for ApiError {
    fn from(e: DirectoryError) -> Self {
        match e {
            DirectoryError::InvalidCard(msg) => ApiError::bad_request(msg),
            e => TransferError::from(e).into(),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        let code = match &e {
            AuthError::UserExists | AuthError::InvalidInput(_) => error_codes::INVALID_PARAMETER,
            AuthError::InvalidCredentials | AuthError::InvalidToken => error_codes::AUTH_FAILED,
            AuthError::Internal(_) => error_codes::INTERNAL_ERROR,
        };
        ApiError::new(status_from(e.http_status()), code, e.to_string())
    }
}

// ============================================================================
// Request DTOs
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ValidateTokenRequest {
    pub username: String,
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateCardRequest {
    pub card_type: CardType,
}

#[derive(Debug, Deserialize)]
pub struct SetAvailabilityRequest {
    pub availability: bool,
}

/// `CreateTransaction` body. Amount is a decimal string.
#[derive(Debug, Deserialize)]
pub struct CreateTransactionRequest {
    pub card_number: String,
    pub amount: String,
    pub recipient_card_number: String,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

// ============================================================================
// Response DTOs
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub success: bool,
    pub message: String,
    pub user_id: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ValidateTokenResponse {
    pub valid: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateTransactionResponse {
    pub accepted: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

impl CreateTransactionResponse {
    pub fn queued(idempotency_key: String, message_id: String) -> Self {
        Self {
            accepted: true,
            message: "Transaction queued".to_string(),
            idempotency_key: Some(idempotency_key),
            message_id: Some(message_id),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            accepted: false,
            message: message.into(),
            idempotency_key: None,
            message_id: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub timestamp_ms: i64,
    pub backend: String,
    pub version: String,
}

// ============================================================================
// Error Codes
// ============================================================================

/// Standard API error codes
pub mod error_codes {
    // Success
    pub const SUCCESS: i32 = 0;

    // Client errors (1xxx)
    pub const INVALID_PARAMETER: i32 = 1001;
    pub const INSUFFICIENT_BALANCE: i32 = 1002;
    pub const IDEMPOTENCY_CONFLICT: i32 = 1003;

    // Auth errors (2xxx)
    pub const MISSING_AUTH: i32 = 2001;
    pub const AUTH_FAILED: i32 = 2002;
    pub const FORBIDDEN: i32 = 2003;

    // Resource errors (4xxx)
    pub const CARD_NOT_FOUND: i32 = 4001;
    pub const CARD_UNAVAILABLE: i32 = 4002;
    pub const TRANSACTION_NOT_FOUND: i32 = 4003;
    pub const CACHE_MISS: i32 = 4004;

    // Server errors (5xxx)
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const SERVICE_UNAVAILABLE: i32 = 5001;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_transfer_error_mapping() {
        let e: ApiError = TransferError::InsufficientFunds.into();
        assert_eq!(e.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(e.code, error_codes::INSUFFICIENT_BALANCE);

        let e: ApiError = TransferError::CardNotFound("4000".into()).into();
        assert_eq!(e.status, StatusCode::NOT_FOUND);
        assert_eq!(e.code, error_codes::CARD_NOT_FOUND);

        let e: ApiError = TransferError::Timeout(Duration::from_secs(1)).into();
        assert_eq!(e.status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(e.code, error_codes::SERVICE_UNAVAILABLE);

        let e: ApiError = TransferError::SameCard.into();
        assert_eq!(e.status, StatusCode::BAD_REQUEST);
        assert_eq!(e.code, error_codes::INVALID_PARAMETER);
    }

    #[test]
    fn test_auth_error_mapping() {
        let e: ApiError = AuthError::UserExists.into();
        assert_eq!(e.status, StatusCode::CONFLICT);

        let e: ApiError = AuthError::InvalidCredentials.into();
        assert_eq!(e.status, StatusCode::UNAUTHORIZED);
        assert_eq!(e.code, error_codes::AUTH_FAILED);
    }

    #[test]
    fn test_envelope_shape() {
        let json = serde_json::to_value(ApiResponse::<()>::error(1001, "bad")).unwrap();
        assert_eq!(json["code"], 1001);
        assert_eq!(json["msg"], "bad");
        assert!(json.get("data").is_none());

        let json = serde_json::to_value(ApiResponse::success(7)).unwrap();
        assert_eq!(json["code"], 0);
        assert_eq!(json["data"], 7);
    }
}
