use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use plaudit_contracts::{ErrorBody, ErrorResponse, SubmissionStatus};
use plaudit_kernel::PatchRejected;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend failed: {0}")]
    Backend(String),
    #[error("submission {0} not found")]
    NotFound(i64),
    #[error("stored row could not be decoded: {0}")]
    Decode(String),
    #[error("{0}")]
    Rejected(String),
    /// A guarded write found the row no longer in the state it was read in.
    #[error("submission {submission_id} changed concurrently; now {}", .found.as_str())]
    Stale {
        submission_id: i64,
        found: SubmissionStatus,
    },
    #[error("audit append failed: {0}")]
    Audit(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

impl From<PatchRejected> for StoreError {
    fn from(e: PatchRejected) -> Self {
        match e {
            PatchRejected::Stale {
                submission_id,
                found,
            } => StoreError::Stale {
                submission_id,
                found,
            },
            other => StoreError::Rejected(other.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("text service is not configured")]
    NotConfigured,
    #[error("text service transport failed: {0}")]
    Transport(String),
    #[error("text service returned {status}: {message}")]
    Upstream { status: u16, message: String },
    #[error("text service returned no usable text")]
    Empty,
    #[error("draft has {words} words, outside {min}..={max}")]
    OutOfBand { words: usize, min: usize, max: usize },
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0} channel is not configured")]
    NotConfigured(&'static str),
    #[error("transport failed: {0}")]
    Transport(String),
    #[error("provider rejected message ({status}): {message}")]
    Rejected { status: u16, message: String },
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid submission: {0}")]
    Invalid(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("draft generation failed for submission {submission_id}: {source}")]
    Generation {
        submission_id: i64,
        #[source]
        source: GenerationError,
    },
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Gone(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    GenerationFailed(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::Gone(_) => (StatusCode::GONE, "expired"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            ApiError::GenerationFailed(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "generation_failed")
            }
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Invalid(msg) => ApiError::BadRequest(msg),
            EngineError::Store(err) => ApiError::Internal(err.to_string()),
            err @ EngineError::Generation { .. } => ApiError::GenerationFailed(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: self.to_string(),
                details: None,
            },
        };
        (status, Json(body)).into_response()
    }
}
