use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use log::{debug, error};
use serde_json::json;
use sled::transaction::TransactionError;
use thiserror::Error;

/// Failures of the sled-backed stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("user record encoding error: {0}")]
    Record(#[from] bincode::Error),

    #[error("movie document encoding error: {0}")]
    Document(#[from] serde_json::Error),

    #[error("corrupt index entry in {0}")]
    Corrupt(&'static str),

    #[error("movie {0} not found")]
    MovieNotFound(u64),

    #[error("review {review_id} not found in movie {movie_id}")]
    ReviewNotFound { movie_id: u64, review_id: u64 },

    #[error("movie {0} kept changing while being written")]
    Conflict(u64),
}

impl From<TransactionError<StoreError>> for StoreError {
    fn from(err: TransactionError<StoreError>) -> Self {
        match err {
            TransactionError::Abort(err) => err,
            TransactionError::Storage(err) => StoreError::Storage(err),
        }
    }
}

/// Errors surfaced to HTTP clients.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn unauthorized(message: &str) -> Self {
        ApiError::Unauthorized(message.to_owned())
    }

    pub fn not_found(message: &str) -> Self {
        ApiError::NotFound(message.to_owned())
    }

    pub fn validation(message: &str) -> Self {
        ApiError::Validation(message.to_owned())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::MovieNotFound(_) => ApiError::not_found("Movie not found"),
            StoreError::ReviewNotFound { .. } => ApiError::not_found("Review not found"),
            StoreError::Conflict(_) => {
                ApiError::Conflict("Movie is being modified concurrently, try again".to_owned())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for ApiError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        debug!("rejected token: {:?}", err);
        match err.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                ApiError::unauthorized("Token expired")
            }
            _ => ApiError::unauthorized("Invalid token"),
        }
    }
}

impl From<bcrypt::BcryptError> for ApiError {
    fn from(err: bcrypt::BcryptError) -> Self {
        ApiError::Internal(format!("password hashing: {}", err))
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Timeout => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            ApiError::Internal(detail) => {
                error!("{:?}", detail);
                "Server error".to_owned()
            }
            other => other.to_string(),
        };
        HttpResponse::build(self.status_code()).json(json!({ "error": message }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_statuses() {
        let not_found: ApiError = StoreError::ReviewNotFound {
            movie_id: 1,
            review_id: 2,
        }
        .into();
        assert_eq!(not_found.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(not_found.to_string(), "Review not found");

        let conflict: ApiError = StoreError::Conflict(1).into();
        assert_eq!(conflict.status_code(), StatusCode::CONFLICT);

        let corrupt: ApiError = StoreError::Corrupt("titles").into();
        assert_eq!(corrupt.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn timeout_is_distinct() {
        assert_eq!(ApiError::Timeout.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
