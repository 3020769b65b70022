use serde::Serialize;

/// An HTTP status and JSON body produced by a request handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestResponse {
    pub code: u16,
    pub body: String,
    pub content_type: &'static str,
}

impl RestResponse {
    pub fn with_json<T: Serialize + ?Sized>(code: u16, value: &T) -> Self {
        match serde_json::to_string_pretty(value) {
            Ok(body) => Self {
                code,
                body,
                content_type: "application/json",
            },
            Err(e) => Self::with_text(500, &format!("JSON serialization failed: {e}")),
        }
    }

    pub fn with_text(code: u16, text: &str) -> Self {
        Self {
            code,
            body: text.to_string(),
            content_type: "text/plain",
        }
    }

    pub fn ok<T: Serialize + ?Sized>(value: &T) -> Self {
        Self::with_json(200, value)
    }
}

/// Reason phrase for the status codes the daemon emits.
pub fn reason_phrase(code: u16) -> &'static str {
    match code {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_is_json() {
        let response = RestResponse::ok(&serde_json::json!({ "status": "Mining started" }));
        assert_eq!(response.code, 200);
        assert_eq!(response.content_type, "application/json");
        assert!(response.body.contains("Mining started"));
    }

    #[test]
    fn test_reason_phrases() {
        assert_eq!(reason_phrase(200), "OK");
        assert_eq!(reason_phrase(405), "Method Not Allowed");
        assert_eq!(reason_phrase(418), "Unknown");
    }
}
