//! Conditional-GET support for history responses.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::Response,
};
use chrono::{DateTime, Utc};

/// `Cache-Control` parameters for one family of responses.
#[derive(Debug, Clone, Copy)]
pub struct CachePolicy {
    pub max_age: u32,
    pub stale_while_revalidate: u32,
}

impl CachePolicy {
    pub const fn new(max_age: u32, stale_while_revalidate: u32) -> Self {
        Self {
            max_age,
            stale_while_revalidate,
        }
    }

    pub fn header_value(&self) -> HeaderValue {
        let raw = format!(
            "max-age={}, stale-while-revalidate={}",
            self.max_age, self.stale_while_revalidate
        );
        HeaderValue::from_str(&raw).unwrap_or_else(|_| HeaderValue::from_static("no-cache"))
    }

    /// Serialized JSON with `ETag`, `Last-Modified` and `Cache-Control`,
    /// or an empty 304 when `If-None-Match` already names this body.
    pub fn respond(&self, request_headers: &HeaderMap, body: Vec<u8>, modified: DateTime<Utc>) -> Response {
        let etag = etag(&body);
        let builder = Response::builder()
            .header(header::CACHE_CONTROL, self.header_value())
            .header(header::ETAG, &etag)
            .header(header::LAST_MODIFIED, http_date(modified));

        let built = if client_has(request_headers, &etag) {
            builder.status(StatusCode::NOT_MODIFIED).body(Body::empty())
        } else {
            builder
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body))
        };

        built.unwrap_or_else(|err| {
            tracing::error!("Failed to build cached response: {}", err);
            let mut fallback = Response::new(Body::empty());
            *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            fallback
        })
    }
}

/// Quoted hash of the response bytes. Stable for identical bodies within
/// one process.
pub fn etag(body: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    body.hash(&mut hasher);
    format!("\"{:x}\"", hasher.finish())
}

/// RFC 7231 HTTP-date.
pub fn http_date(timestamp: DateTime<Utc>) -> HeaderValue {
    HeaderValue::from_str(&timestamp.format("%a, %d %b %Y %H:%M:%S GMT").to_string())
        .unwrap_or_else(|_| HeaderValue::from_static("Thu, 01 Jan 1970 00:00:00 GMT"))
}

/// `If-None-Match` lists `*` or `etag`.
pub fn client_has(headers: &HeaderMap, etag: &str) -> bool {
    let Some(raw) = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok())
    else {
        return false;
    };
    raw.split(',').map(str::trim).any(|tag| tag == "*" || tag == etag)
}
