use std::fmt::Debug;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use crate::exchange::lifecycle::LifecycleError;
use crate::validation::ValidationErrors;

/// Every failure a handler can produce, rendered as `{"message": ...}` JSON
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Validation error")]
    Validation(ValidationErrors),
    #[error("Internal Server Error")]
    Internal(cja::color_eyre::Report),
}

pub type ServerResult<S> = Result<S, ApiError>;

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> Value {
        match self {
            ApiError::Validation(errors) => json!({
                "message": self.to_string(),
                "errors": errors,
            }),
            _ => json!({ "message": self.to_string() }),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut body = self.body();

        if let ApiError::Internal(report) = &self {
            tracing::error!(error = ?report, "Request Error");

            let is_dev_mode = std::env::var("DEVELOPMENT_MODE")
                .map(|v| v == "1")
                .unwrap_or(false);

            if is_dev_mode {
                body["error"] = Value::String(format!("{:?}", report));
            }
        } else {
            tracing::info!(%status, message = %self, "Request rejected");
        }

        (status, Json(body)).into_response()
    }
}

impl From<cja::color_eyre::Report> for ApiError {
    fn from(report: cja::color_eyre::Report) -> Self {
        ApiError::Internal(report)
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::Internal(err.into())
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(errors: ValidationErrors) -> Self {
        ApiError::Validation(errors)
    }
}

impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::NotParticipant => ApiError::Forbidden(err.to_string()),
            _ => ApiError::BadRequest(err.to_string()),
        }
    }
}

/// Turns a missing row into a 404 with the given message
pub(crate) trait OrNotFound<T> {
    fn or_not_found(self, message: &str) -> Result<T, ApiError>;
}

impl<T> OrNotFound<T> for Option<T> {
    fn or_not_found(self, message: &str) -> Result<T, ApiError> {
        self.ok_or_else(|| ApiError::NotFound(message.to_string()))
    }
}

/// Whether a failed write was turned away by a unique constraint
pub fn is_unique_violation(report: &cja::color_eyre::Report) -> bool {
    report.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<sqlx::Error>(),
            Some(sqlx::Error::Database(db)) if db.is_unique_violation()
        )
    })
}

/// Turns a unique constraint violation into a 400 with the given message
pub(crate) trait OrDuplicate<T> {
    fn or_duplicate(self, message: &str) -> Result<T, ApiError>;
}

impl<T> OrDuplicate<T> for cja::Result<T> {
    fn or_duplicate(self, message: &str) -> Result<T, ApiError> {
        self.map_err(|report| {
            if is_unique_violation(&report) {
                ApiError::BadRequest(message.to_string())
            } else {
                ApiError::Internal(report)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::FieldError;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::bad_request("nope").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Unauthorized("No token provided").status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(ApiError::forbidden("no").status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::not_found("gone").status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::Conflict("busy".into()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(cja::color_eyre::eyre::eyre!("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_errors_hide_details() {
        let err = ApiError::from(cja::color_eyre::eyre::eyre!("connection refused"));
        assert_eq!(err.body(), json!({ "message": "Internal Server Error" }));
    }

    #[test]
    fn test_validation_body_lists_fields() {
        let err = ApiError::from(ValidationErrors(vec![FieldError {
            field: "title",
            message: "must be at least 3 characters".to_string(),
        }]));

        let body = err.body();
        assert_eq!(body["message"], "Validation error");
        assert_eq!(body["errors"][0]["field"], "title");
    }

    #[test]
    fn test_lifecycle_errors_map_to_client_errors() {
        assert_eq!(
            ApiError::from(LifecycleError::NotParticipant).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::from(LifecycleError::AlreadyCompleted).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_or_not_found() {
        let missing: Option<u8> = None;
        let err = missing.or_not_found("Post not found").unwrap_err();
        assert_eq!(err.to_string(), "Post not found");
        assert_eq!(Some(3).or_not_found("unused").unwrap(), 3);
    }

    #[test]
    fn test_other_failures_are_not_duplicates() {
        let failed: cja::Result<()> = Err(sqlx::Error::RowNotFound.into());
        let err = failed.or_duplicate("User already exists").unwrap_err();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let ok: cja::Result<u8> = Ok(1);
        assert_eq!(ok.or_duplicate("User already exists").unwrap(), 1);
    }
}
