//! Relay error taxonomy and its HTTP projection.
//!
//! Every response that leaves the trust boundary carries a stable machine
//! code plus a human message; internal detail stays in local logs.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use shroud_ledger::{error::ProgramFault, reader::LedgerIoError};
use tracing::error;

use crate::cosign::CosignFault;

pub const CODE_INVALID_REQUEST: &str = "INVALID_REQUEST";
pub const CODE_RATE_LIMITED: &str = "RATE_LIMITED";
pub const CODE_DEPOSIT_NOT_FOUND: &str = "DEPOSIT_NOT_FOUND";
pub const CODE_DEPOSIT_FAILED: &str = "DEPOSIT_FAILED";
pub const CODE_DEPOSIT_PENDING: &str = "DEPOSIT_PENDING";
pub const CODE_DEPOSIT_STALE: &str = "DEPOSIT_STALE";
pub const CODE_DEPOSIT_INSUFFICIENT: &str = "DEPOSIT_INSUFFICIENT";
pub const CODE_REFERENCE_USED: &str = "PAYMENT_REFERENCE_USED";
pub const CODE_COSIGN_REJECTED: &str = "COSIGN_REJECTED";
pub const CODE_LEDGER_UNAVAILABLE: &str = "LEDGER_UNAVAILABLE";
pub const CODE_UPSTREAM_UNAVAILABLE: &str = "UPSTREAM_UNAVAILABLE";
pub const CODE_INTERNAL: &str = "INTERNAL_SERVER_ERROR";

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("{0}")]
    Validation(String),
    #[error("rate limit exceeded, try again in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("payment reference not found on the ledger")]
    DepositNotFound,
    #[error("referenced payment transaction failed")]
    DepositFailed,
    #[error("referenced payment is not yet timestamped, retry shortly")]
    DepositPending,
    #[error("referenced payment is {age_secs}s old, beyond the acceptance window")]
    DepositStale { age_secs: i64 },
    #[error("deposit of {actual} lamports is below the required {expected}")]
    DepositInsufficient { expected: u64, actual: i64 },
    #[error("payment reference was already used")]
    ReferenceUsed,
    #[error(transparent)]
    Cosign(#[from] CosignFault),
    /// Program rejections are surfaced verbatim; the ledger already said
    /// exactly what was wrong.
    #[error(transparent)]
    Ledger(#[from] ProgramFault),
    #[error("ledger unavailable")]
    LedgerIo(#[source] LedgerIoError),
    #[error("upstream rpc unavailable")]
    Upstream(#[source] reqwest::Error),
    #[error("internal error")]
    Internal(#[source] anyhow::Error),
}

impl From<LedgerIoError> for RelayError {
    fn from(err: LedgerIoError) -> Self {
        match err {
            LedgerIoError::Program(fault) => RelayError::Ledger(fault),
            other => RelayError::LedgerIo(other),
        }
    }
}

impl From<anyhow::Error> for RelayError {
    fn from(err: anyhow::Error) -> Self {
        RelayError::Internal(err)
    }
}

#[derive(serde::Serialize)]
struct ErrorResponse {
    error: String,
    error_code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_secs: Option<u64>,
}

impl RelayError {
    fn status(&self) -> StatusCode {
        match self {
            RelayError::Validation(_) | RelayError::Cosign(_) => StatusCode::BAD_REQUEST,
            RelayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            RelayError::DepositNotFound => StatusCode::NOT_FOUND,
            RelayError::DepositFailed
            | RelayError::DepositPending
            | RelayError::DepositStale { .. }
            | RelayError::DepositInsufficient { .. } => StatusCode::PAYMENT_REQUIRED,
            RelayError::ReferenceUsed => StatusCode::CONFLICT,
            RelayError::Ledger(_) => StatusCode::UNPROCESSABLE_ENTITY,
            RelayError::LedgerIo(_) | RelayError::Upstream(_) => StatusCode::BAD_GATEWAY,
            RelayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            RelayError::Validation(_) => CODE_INVALID_REQUEST,
            RelayError::RateLimited { .. } => CODE_RATE_LIMITED,
            RelayError::DepositNotFound => CODE_DEPOSIT_NOT_FOUND,
            RelayError::DepositFailed => CODE_DEPOSIT_FAILED,
            RelayError::DepositPending => CODE_DEPOSIT_PENDING,
            RelayError::DepositStale { .. } => CODE_DEPOSIT_STALE,
            RelayError::DepositInsufficient { .. } => CODE_DEPOSIT_INSUFFICIENT,
            RelayError::ReferenceUsed => CODE_REFERENCE_USED,
            RelayError::Cosign(_) => CODE_COSIGN_REJECTED,
            RelayError::Ledger(fault) => fault.api_code(),
            RelayError::LedgerIo(_) => CODE_LEDGER_UNAVAILABLE,
            RelayError::Upstream(_) => CODE_UPSTREAM_UNAVAILABLE,
            RelayError::Internal(_) => CODE_INTERNAL,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        // Infrastructure detail never crosses the boundary; the Display
        // strings above are already sanitized.
        match &self {
            RelayError::LedgerIo(source) => error!(%source, "ledger io failure"),
            RelayError::Upstream(source) => error!(%source, "upstream rpc failure"),
            RelayError::Internal(source) => error!(?source, "internal relay failure"),
            _ => {}
        }

        let retry_after_secs = match &self {
            RelayError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        };
        let body = ErrorResponse {
            error: self.to_string(),
            error_code: self.code(),
            retry_after_secs,
        };
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_faults_surface_their_own_codes() {
        let err = RelayError::from(LedgerIoError::Program(ProgramFault::ExceedsDailyLimit));
        assert_eq!(err.code(), "EXCEEDS_DAILY_LIMIT");
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn io_failures_are_sanitized_to_a_generic_message() {
        let err = RelayError::from(LedgerIoError::Rpc(
            "connection refused to http://10.0.0.7:8899".into(),
        ));
        assert_eq!(err.to_string(), "ledger unavailable");
        assert_eq!(err.code(), CODE_LEDGER_UNAVAILABLE);
    }

    #[test]
    fn rate_limit_carries_a_retry_hint() {
        let err = RelayError::RateLimited { retry_after_secs: 12 };
        assert_eq!(err.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(err.to_string().contains("12"));
    }
}
