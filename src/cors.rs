use axum::{
    extract::Request,
    http::{Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::errors::apply_header;

const ALLOWED_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS";
const ALLOWED_HEADERS: &str = "Content-Type, Authorization";

/// Permissive CORS: any origin, preflight answered directly with 204.
pub async fn allow_any_origin(request: Request, next: Next) -> Response {
    let mut response = if request.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(request).await
    };

    let headers = response.headers_mut();
    apply_header(headers, "access-control-allow-origin", "*");
    apply_header(headers, "access-control-allow-methods", ALLOWED_METHODS);
    apply_header(headers, "access-control-allow-headers", ALLOWED_HEADERS);
    response
}
