use axum::Json;
use axum::http::StatusCode;
use serde::Serialize;
use tracing::error;

/// Canonical JSON payload for error responses.
#[derive(Debug, Serialize, Clone)]
pub struct ApiMessage {
    pub message: String,
}

impl ApiMessage {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub type ApiError = (StatusCode, Json<ApiMessage>);

/// Helper for controllers that need to return `(StatusCode, Json<ApiMessage>)`.
pub fn json_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(ApiMessage::new(message)))
}

/// Log a backing-service failure and hide its details from the caller.
pub fn internal_error(err: anyhow::Error) -> ApiError {
    error!(?err, "internal error while handling request");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error.")
}

pub fn bad_request(message: impl Into<String>) -> ApiError {
    json_error(StatusCode::BAD_REQUEST, message)
}

pub fn not_found(message: impl Into<String>) -> ApiError {
    json_error(StatusCode::NOT_FOUND, message)
}

/// Outcome envelope used by the permission management endpoints.
#[derive(Debug, Serialize)]
pub struct ActionOutcome<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ActionOutcome<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Trim a required text field, rejecting blanks with a 400.
pub fn required_field(value: Option<&str>, field: &str) -> Result<String, ApiError> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| bad_request(format!("Missing required field: {field}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_field_trims_and_rejects_blank() {
        assert_eq!(required_field(Some("  dsa "), "subject").unwrap(), "dsa");

        let (status, Json(body)) = required_field(Some("   "), "subject").unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.message, "Missing required field: subject");

        assert!(required_field(None, "subject").is_err());
    }

    #[test]
    fn failed_outcome_omits_data() {
        let outcome = ActionOutcome::<()>::failed("Super-admin access required.");
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"success": false, "error": "Super-admin access required."})
        );
    }
}
