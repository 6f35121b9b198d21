use std::collections::BTreeMap;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use tracing::error;

use crate::db::StoreError;

/// Field name to validation messages, serialized as a JSON object.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0.entry(field.to_string()).or_default().push(message.into());
    }

    /// Records "required" for absent or blank values and passes present ones through trimmed.
    pub fn require<'a>(&mut self, field: &str, value: Option<&'a str>) -> Option<&'a str> {
        match value.map(str::trim) {
            Some(v) if !v.is_empty() => Some(v),
            Some(_) => {
                self.add(field, "This field may not be blank.");
                None
            }
            None => {
                self.add(field, "This field is required.");
                None
            }
        }
    }

    /// Like [`FieldErrors::require`] but keeps the value byte for byte (passwords).
    pub fn require_untrimmed<'a>(&mut self, field: &str, value: Option<&'a str>) -> Option<&'a str> {
        match value {
            Some(v) if !v.is_empty() => Some(v),
            Some(_) => {
                self.add(field, "This field may not be blank.");
                None
            }
            None => {
                self.add(field, "This field is required.");
                None
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    /// `Ok(())` when nothing was recorded.
    pub fn into_result(self) -> Result<(), ApiError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(ApiError::Validation {
                message: "Invalid input.".into(),
                fields: self,
            })
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{message}")]
    Validation { message: String, fields: FieldErrors },
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    AuthenticationFailed(String),
    #[error("Token is invalid or expired")]
    InvalidToken,
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    /// Validation error on a single field.
    pub fn field(field: &str, message: impl Into<String>) -> Self {
        let mut fields = FieldErrors::new();
        fields.add(field, message);
        ApiError::Validation {
            message: "Invalid input.".into(),
            fields,
        }
    }

    pub fn not_found() -> Self {
        ApiError::NotFound("Not found.".into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation { .. } | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::AuthenticationFailed(_) | ApiError::InvalidToken => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation { .. } => "validation_error",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::AuthenticationFailed(_) => "authentication_failed",
            ApiError::InvalidToken => "token_not_valid",
            ApiError::Forbidden(_) => "permission_denied",
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::Internal(_) => "server_error",
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ApiError::not_found(),
            StoreError::Duplicate { field } => {
                ApiError::field(field, format!("user with this {field} already exists."))
            }
            StoreError::Restricted(by) => {
                ApiError::Conflict(format!("Cannot delete: still referenced by {by}."))
            }
            StoreError::LimitExceeded { field, max } => {
                ApiError::field(field, format!("Cannot upload more than {max} {field} files."))
            }
            StoreError::Backend(e) => ApiError::Internal(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::Validation { message, fields } => json!({
                "code": self.code(),
                "detail": message,
                "fields": fields,
            }),
            ApiError::Internal(e) => {
                error!(error = ?e, "internal error");
                json!({ "code": self.code(), "detail": "Internal server error." })
            }
            other => json!({ "code": other.code(), "detail": other.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_taxonomy() {
        assert_eq!(ApiError::from(StoreError::NotFound).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::from(StoreError::Duplicate { field: "email" }).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(StoreError::Restricted("comments")).status(),
            StatusCode::CONFLICT
        );
        let backend = StoreError::Backend(anyhow::anyhow!("boom"));
        assert_eq!(ApiError::from(backend).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn limit_error_names_the_field() {
        let err = ApiError::from(StoreError::LimitExceeded { field: "media", max: 10 });
        match err {
            ApiError::Validation { fields, .. } => {
                assert_eq!(
                    fields.get("media").unwrap(),
                    ["Cannot upload more than 10 media files.".to_string()]
                );
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn empty_field_errors_are_ok() {
        assert!(FieldErrors::new().into_result().is_ok());
        let mut f = FieldErrors::new();
        f.add("username", "This field is required.");
        assert!(matches!(f.into_result(), Err(ApiError::Validation { .. })));
    }
}
