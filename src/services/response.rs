//! HTTP response building helpers
//!
//! Provides a consistent API for building HTTP responses across all handlers.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{header, Response, StatusCode};
use serde::Serialize;
use tracing::error;

use crate::error::CrmError;

fn build(builder: hyper::http::response::Builder, body: Bytes) -> Response<Full<Bytes>> {
    builder.body(Full::new(body)).unwrap_or_else(|e| {
        error!(error = %e, "Failed to build response");
        let mut fallback = Response::new(Full::new(Bytes::new()));
        *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        fallback
    })
}

/// Build a JSON response with the given status code
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    build(
        Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "application/json"),
        Bytes::from(json),
    )
}

/// Build a JSON response with 200 OK status
pub fn ok<T: Serialize>(body: &T) -> Response<Full<Bytes>> {
    json_response(StatusCode::OK, body)
}

/// Build a JSON response with 201 Created status
pub fn created<T: Serialize>(body: &T) -> Response<Full<Bytes>> {
    json_response(StatusCode::CREATED, body)
}

/// Build an empty response with 204 No Content status
pub fn no_content() -> Response<Full<Bytes>> {
    build(Response::builder().status(StatusCode::NO_CONTENT), Bytes::new())
}

/// Build a 404 Not Found response with message
pub fn not_found(message: &str) -> Response<Full<Bytes>> {
    json_response(StatusCode::NOT_FOUND, &serde_json::json!({ "error": message }))
}

/// Build a 400 Bad Request response with message
pub fn bad_request(message: &str) -> Response<Full<Bytes>> {
    json_response(StatusCode::BAD_REQUEST, &serde_json::json!({ "error": message }))
}

/// Build a 405 Method Not Allowed response
pub fn method_not_allowed() -> Response<Full<Bytes>> {
    json_response(
        StatusCode::METHOD_NOT_ALLOWED,
        &serde_json::json!({ "error": "Method not allowed" }),
    )
}

/// Status code a service error maps to
pub fn status_for(error: &CrmError) -> StatusCode {
    match error {
        CrmError::NotFound(_) => StatusCode::NOT_FOUND,
        CrmError::InvalidInput(_) | CrmError::Json(_) => StatusCode::BAD_REQUEST,
        CrmError::ConfirmationRequired(_) => StatusCode::CONFLICT,
        CrmError::InvalidToken => StatusCode::UNAUTHORIZED,
        CrmError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        CrmError::Mail(_) => StatusCode::BAD_GATEWAY,
        CrmError::Database(_) | CrmError::Io(_) | CrmError::Config(_) | CrmError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Convert a CrmError to an appropriate HTTP response.
/// Server-side failures are logged and reported without internal detail.
pub fn error_response(err: CrmError) -> Response<Full<Bytes>> {
    let status = status_for(&err);
    let message = if status.is_server_error() {
        error!(error = %err, "Request failed");
        "Internal server error".to_string()
    } else {
        match &err {
            CrmError::NotFound(msg)
            | CrmError::InvalidInput(msg)
            | CrmError::ConfirmationRequired(msg)
            | CrmError::PermissionDenied(msg) => msg.clone(),
            other => other.to_string(),
        }
    };

    json_response(status, &serde_json::json!({ "error": message }))
}

/// Build a binary response with the given content type
pub fn binary_response(status: StatusCode, content_type: &str, body: Vec<u8>) -> Response<Full<Bytes>> {
    build(
        Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, content_type),
        Bytes::from(body),
    )
}

/// Result type alias for handlers
pub type HandlerResult = Result<Response<Full<Bytes>>, CrmError>;

/// Wrap an optional service result into an HTTP response
/// Returns 404 if None
pub fn from_option<T: Serialize>(result: Result<Option<T>, CrmError>, not_found_msg: &str) -> Response<Full<Bytes>> {
    match result {
        Ok(Some(value)) => ok(&value),
        Ok(None) => not_found(not_found_msg),
        Err(e) => error_response(e),
    }
}

/// Returns 204 No Content if deleted, 404 Not Found if not found
pub fn from_delete_bool_result(result: Result<bool, CrmError>, not_found_msg: &str) -> Response<Full<Bytes>> {
    match result {
        Ok(true) => no_content(),
        Ok(false) => not_found(not_found_msg),
        Err(e) => error_response(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::INVALID_TOKEN_MESSAGE;
    use http_body_util::BodyExt;

    #[test]
    fn test_ok_response() {
        let resp = ok(&serde_json::json!({"test": true}));
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[test]
    fn test_error_statuses() {
        assert_eq!(error_response(CrmError::NotFound("x".into())).status(), StatusCode::NOT_FOUND);
        assert_eq!(error_response(CrmError::InvalidInput("x".into())).status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_response(CrmError::ConfirmationRequired("x".into())).status(), StatusCode::CONFLICT);
        assert_eq!(error_response(CrmError::InvalidToken).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error_response(CrmError::PermissionDenied("x".into())).status(), StatusCode::FORBIDDEN);
        assert_eq!(error_response(CrmError::Database("x".into())).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_invalid_token_body_and_hidden_internal_detail() {
        let body = error_response(CrmError::InvalidToken).into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], INVALID_TOKEN_MESSAGE);

        let body = error_response(CrmError::Database("secret table".into())).into_body().collect().await.unwrap().to_bytes();
        assert!(!String::from_utf8_lossy(&body).contains("secret table"));
    }
}
