//! Error codes and JSON error responses for the hook endpoint

use crate::ingress::IngressError;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Response, StatusCode};

/// Error codes returned to webhook senders
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookErrorCode {
    /// No route for the request path
    NotFound,
    /// Route exists but not for this method
    MethodNotAllowed,
    /// Signature header absent
    MissingSignature,
    /// Signature did not match the payload
    InvalidSignature,
    /// Event type header absent
    MissingEventType,
    /// Push payload could not be decoded
    MalformedPayload,
    /// Request body exceeded the size limit
    PayloadTooLarge,
    /// Failed to read the request body
    BodyReadFailed,
}

impl HookErrorCode {
    /// Get the default HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            HookErrorCode::NotFound => StatusCode::NOT_FOUND,
            HookErrorCode::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            HookErrorCode::MissingSignature => StatusCode::UNAUTHORIZED,
            HookErrorCode::InvalidSignature => StatusCode::UNAUTHORIZED,
            HookErrorCode::MissingEventType => StatusCode::BAD_REQUEST,
            HookErrorCode::MalformedPayload => StatusCode::BAD_REQUEST,
            HookErrorCode::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            HookErrorCode::BodyReadFailed => StatusCode::BAD_REQUEST,
        }
    }

    /// Get the error code as a string for the X-Hook-Error header
    pub fn as_header_value(&self) -> &'static str {
        match self {
            HookErrorCode::NotFound => "NOT_FOUND",
            HookErrorCode::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            HookErrorCode::MissingSignature => "MISSING_SIGNATURE",
            HookErrorCode::InvalidSignature => "INVALID_SIGNATURE",
            HookErrorCode::MissingEventType => "MISSING_EVENT_TYPE",
            HookErrorCode::MalformedPayload => "MALFORMED_PAYLOAD",
            HookErrorCode::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            HookErrorCode::BodyReadFailed => "BODY_READ_FAILED",
        }
    }

    /// Code for an ingress rejection. Handler failures have none: the delivery
    /// itself was fine.
    pub fn for_ingress(err: &IngressError) -> Option<Self> {
        match err {
            IngressError::MissingSignature => Some(HookErrorCode::MissingSignature),
            IngressError::InvalidSignature => Some(HookErrorCode::InvalidSignature),
            IngressError::MissingEventType => Some(HookErrorCode::MissingEventType),
            IngressError::MalformedPayload(_) | IngressError::MalformedForm(_) => {
                Some(HookErrorCode::MalformedPayload)
            }
            IngressError::Handler(_) => None,
        }
    }
}

/// JSON error response carrying the code in `X-Hook-Error`
pub fn json_error_response(code: HookErrorCode, message: impl Into<String>) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "code": code.as_header_value(),
        "message": message.into(),
        "status": code.status_code().as_u16(),
    });

    Response::builder()
        .status(code.status_code())
        .header("Content-Type", "application/json")
        .header("X-Hook-Error", code.as_header_value())
        .body(Full::new(Bytes::from(body.to_string())))
        .expect("valid response with StatusCode enum and static headers")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_status_codes() {
        assert_eq!(HookErrorCode::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            HookErrorCode::InvalidSignature.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            HookErrorCode::MalformedPayload.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            HookErrorCode::PayloadTooLarge.status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }

    #[tokio::test]
    async fn test_error_body_escapes_message() {
        use http_body_util::BodyExt;

        let response = json_error_response(
            HookErrorCode::MalformedPayload,
            r#"expected "ref" at line 1"#,
        );
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(json["code"], "MALFORMED_PAYLOAD");
        assert_eq!(json["message"], r#"expected "ref" at line 1"#);
        assert_eq!(json["status"], 400);
    }

    #[test]
    fn test_json_error_response() {
        let response = json_error_response(HookErrorCode::MethodNotAllowed, "use POST");

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(
            response.headers().get("Content-Type").unwrap(),
            "application/json"
        );
        assert_eq!(
            response.headers().get("X-Hook-Error").unwrap(),
            "METHOD_NOT_ALLOWED"
        );
    }

    #[test]
    fn test_ingress_mapping() {
        assert_eq!(
            HookErrorCode::for_ingress(&IngressError::MissingSignature),
            Some(HookErrorCode::MissingSignature)
        );
        assert_eq!(
            HookErrorCode::for_ingress(&IngressError::MalformedForm("no payload field".to_string())),
            Some(HookErrorCode::MalformedPayload)
        );
        assert_eq!(
            HookErrorCode::for_ingress(&IngressError::Handler(anyhow::anyhow!("boom"))),
            None
        );
    }
}
