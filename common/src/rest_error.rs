use thiserror::Error;

use crate::rest_response::RestResponse;

/// Standard REST error types
#[derive(Debug, Error)]
pub enum RestError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    MethodNotAllowed(String),

    #[error("{0}")]
    InternalServerError(String),

    #[error("{0}")]
    NotImplemented(String),
}

impl RestError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            RestError::BadRequest(_) => 400,
            RestError::NotFound(_) => 404,
            RestError::MethodNotAllowed(_) => 405,
            RestError::InternalServerError(_) => 500,
            RestError::NotImplemented(_) => 501,
        }
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        match self {
            RestError::BadRequest(msg) => msg,
            RestError::NotFound(msg) => msg,
            RestError::MethodNotAllowed(msg) => msg,
            RestError::InternalServerError(msg) => msg,
            RestError::NotImplemented(msg) => msg,
        }
    }

    /// Unknown route
    pub fn not_found() -> Self {
        RestError::NotFound("Not found".to_string())
    }

    /// Unsupported HTTP method
    pub fn method_not_allowed() -> Self {
        RestError::MethodNotAllowed("Method not allowed".to_string())
    }

    /// Endpoint exists but has no implementation yet
    pub fn not_implemented() -> Self {
        RestError::NotImplemented("Not implemented".to_string())
    }

    /// Generic failure reported when a handler faults
    pub fn internal() -> Self {
        RestError::InternalServerError("Internal server error".to_string())
    }

    /// Missing fields in a request body
    pub fn missing_fields(fields: &[&str]) -> Self {
        RestError::BadRequest(format!("Missing required fields: {}", fields.join(", ")))
    }

    /// Invalid value for a named field
    pub fn invalid_value(what: &str) -> Self {
        RestError::BadRequest(format!("Invalid {what}"))
    }
}

/// Convert RestError to a JSON `{"error": ...}` response
impl From<RestError> for RestResponse {
    fn from(error: RestError) -> Self {
        RestResponse::with_json(
            error.status_code(),
            &serde_json::json!({ "error": error.message() }),
        )
    }
}

/// Convert base64 decode errors to RestError (400 Bad Request)
impl From<base64::DecodeError> for RestError {
    fn from(_: base64::DecodeError) -> Self {
        RestError::invalid_value("base64 data")
    }
}
