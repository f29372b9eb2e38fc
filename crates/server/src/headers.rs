//! Security and caching headers added to every response.

use axum::extract::{Request, State};
use axum::http::header::{self, HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;

use crate::server::AppState;

const NO_CACHE: &str = "no-store, no-cache, must-revalidate, proxy-revalidate";

pub async fn middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let public = is_public(req.uri().path(), &state.config.urls.public);
    let mut response = next.run(req).await;

    let headers = response.headers_mut();
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("SAMEORIGIN"));
    headers.insert(
        HeaderName::from_static("x-ua-compatible"),
        HeaderValue::from_static("IE=edge"),
    );
    if !public {
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(NO_CACHE));
        headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
        headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
        headers.insert(
            HeaderName::from_static("surrogate-control"),
            HeaderValue::from_static("no-store"),
        );
    }
    response
}

fn is_public(path: &str, public: &str) -> bool {
    let public = public.trim_end_matches('/');
    if public.is_empty() {
        return false;
    }
    path == public
        || path
            .strip_prefix(public)
            .is_some_and(|rest| rest.starts_with('/'))
}
