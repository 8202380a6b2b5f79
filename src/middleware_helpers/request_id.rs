use crate::tracing::RequestId;
use axum::{
    extract::Request,
    http::{header::HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};

/// Header name for the request ID
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Accepts a caller-supplied id when it is a valid header value, otherwise mints one.
fn resolve_request_id(request: &Request) -> (RequestId, HeaderValue) {
    if let Some(value) = request.headers().get(REQUEST_ID_HEADER) {
        if let Ok(text) = value.to_str() {
            if !text.is_empty() && text.len() <= 128 {
                return (RequestId::new(text), value.clone());
            }
        }
    }
    let generated = RequestId::default();
    // uuid strings are always valid header values
    let header = HeaderValue::from_str(generated.as_str())
        .unwrap_or_else(|_| HeaderValue::from_static("invalid-request-id"));
    (generated, header)
}

/// Middleware to add request ID to every request
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let (request_id, header) = resolve_request_id(&request);

    request
        .headers_mut()
        .insert(HeaderName::from_static(REQUEST_ID_HEADER), header.clone());
    request.extensions_mut().insert(request_id.clone());

    let mut response =
        crate::tracing::scope_request_id(request_id, async move { next.run(request).await })
            .await;

    response
        .headers_mut()
        .insert(HeaderName::from_static(REQUEST_ID_HEADER), header);

    response
}
