use alloy_primitives::Address;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Contract already registered: {0}")]
    AlreadyRegistered(Address),

    #[error("Contract state unavailable: {0}")]
    StateUnavailable(String),

    #[error("Rate limit exceeded")]
    RateLimited,
}

/// Ledger RPC errors, split by whether a retry can help
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("transient rpc error {code}: {message}")]
    Transient { code: i64, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("execution reverted: {0}")]
    Reverted(String),

    #[error("rpc error {code}: {message}")]
    Rejected { code: i64, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// JSON-RPC codes that providers use for load shedding and flaky backends
const TRANSIENT_RPC_CODES: [i64; 3] = [-32005, -32603, -32000];

/// Message fragments that mark a `-32000` (or unknown code) as retryable
const TRANSIENT_MESSAGES: [&str; 6] = [
    "rate limit",
    "too many requests",
    "header not found",
    "timeout",
    "temporarily unavailable",
    "compute units per second",
];

impl RpcError {
    /// Whether the retry executor may try the operation again
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RpcError::RateLimited(_) | RpcError::Transient { .. } | RpcError::Transport(_)
        )
    }

    /// Whether a failed `eth_sendTransaction` may be sent again.
    ///
    /// Only rejections the node issues before accepting the transaction qualify.
    /// Timeouts and dropped connections leave acceptance unknown, so the attempt
    /// ends and the next sweep re-reads chain state first.
    pub fn is_retryable_write(&self) -> bool {
        match self {
            RpcError::RateLimited(_) => true,
            RpcError::Transient { code, message } => {
                *code == -32005 && !message.to_ascii_lowercase().contains("timeout")
            }
            _ => false,
        }
    }

    /// Classify a JSON-RPC error object into the transient whitelist or a permanent failure
    pub fn from_rpc(code: i64, message: impl Into<String>) -> Self {
        let message = message.into();
        let lowered = message.to_ascii_lowercase();

        if lowered.contains("execution reverted") || code == 3 {
            return RpcError::Reverted(message);
        }
        if lowered.contains("rate limit") || lowered.contains("too many requests") {
            return RpcError::RateLimited(message);
        }

        let whitelisted_code = TRANSIENT_RPC_CODES.contains(&code);
        let whitelisted_message = TRANSIENT_MESSAGES.iter().any(|needle| lowered.contains(needle));

        // -32000 is the generic server error; only a known message makes it retryable
        let transient = match code {
            -32000 => whitelisted_message,
            _ => whitelisted_code || whitelisted_message,
        };

        if transient {
            RpcError::Transient { code, message }
        } else {
            RpcError::Rejected { code, message }
        }
    }
}

/// Per-slot decode failure inside a batch
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("call reverted")]
    Reverted,

    #[error("call failed: {0}")]
    CallFailed(String),

    #[error("abi decode failed: {0}")]
    Abi(String),
}

impl From<alloy_sol_types::Error> for DecodeError {
    fn from(error: alloy_sol_types::Error) -> Self {
        DecodeError::Abi(error.to_string())
    }
}

/// Resolution scheduling errors
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Contract {0} already resolved")]
    AlreadyResolved(Address),

    #[error("Contract {0} already exercised")]
    AlreadyExercised(Address),
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match self {
            AppError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("Not found: {}", what),
                None,
            ),
            AppError::InvalidInput(reason) => (
                StatusCode::BAD_REQUEST,
                "INVALID_INPUT",
                reason,
                None,
            ),
            AppError::InvalidAddress(raw) => (
                StatusCode::BAD_REQUEST,
                "INVALID_ADDRESS",
                format!("Invalid address: {}", raw),
                None,
            ),
            AppError::AlreadyRegistered(address) => (
                StatusCode::CONFLICT,
                "ALREADY_REGISTERED",
                format!("Contract {} is already registered", address),
                Some(serde_json::json!({ "address": address })),
            ),
            AppError::Scheduler(SchedulerError::AlreadyResolved(address)) => (
                StatusCode::CONFLICT,
                "ALREADY_RESOLVED",
                format!("Contract {} is already resolved", address),
                Some(serde_json::json!({ "address": address })),
            ),
            AppError::Scheduler(SchedulerError::AlreadyExercised(address)) => (
                StatusCode::CONFLICT,
                "ALREADY_EXERCISED",
                format!("Contract {} is already exercised", address),
                Some(serde_json::json!({ "address": address })),
            ),
            AppError::StateUnavailable(reason) => (
                StatusCode::BAD_GATEWAY,
                "STATE_UNAVAILABLE",
                format!("Contract state could not be read: {}", reason),
                None,
            ),
            AppError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
                "Rate limit exceeded. Please try again later.".to_string(),
                None,
            ),
            AppError::Rpc(err) => {
                let retryable = err.is_transient();
                (
                    StatusCode::BAD_GATEWAY,
                    "LEDGER_RPC_ERROR",
                    format!("Ledger request failed: {}", err),
                    Some(serde_json::json!({ "retryable": retryable })),
                )
            }
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "A database error occurred".to_string(),
                None,
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
                None,
            ),
        };

        let body = Json(ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
            details,
        });

        (status, body).into_response()
    }
}

impl From<config::ConfigError> for AppError {
    fn from(error: config::ConfigError) -> Self {
        AppError::Config(error.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {:?}", error))
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
