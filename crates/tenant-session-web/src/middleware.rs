//! Axum middleware binding the session lifecycle to each request.
//!
//! 1. Begins the request and hands its `RequestScope` to handlers via extensions
//! 2. Runs the inner service, catching panics
//! 3. On a panic or an `UnhandledError` response, runs the error path and
//!    redirects to the error page
//! 4. Always runs the completion teardown once the response exists

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use futures::FutureExt;
use tenant_session_core::SessionFactory;
use tracing::{error, warn};

use crate::error::UnhandledError;
use crate::lifecycle::SessionLifecycle;

pub async fn session_lifecycle_middleware<F: SessionFactory>(
    State(lifecycle): State<Arc<SessionLifecycle<F>>>,
    mut req: Request,
    next: Next,
) -> Response {
    let origin = request_origin(req.headers());

    let scope = lifecycle.begin_request();
    req.extensions_mut().insert(scope.clone());

    let unhandled = match AssertUnwindSafe(next.run(req)).catch_unwind().await {
        Ok(response) => match response.extensions().get::<UnhandledError>().cloned() {
            Some(err) => Err(err),
            None => Ok(response),
        },
        Err(payload) => Err(UnhandledError::from_panic(payload)),
    };

    let response = match unhandled {
        Ok(response) => response,
        Err(err) => {
            let redirect = lifecycle
                .handle_unhandled_error(&err, origin.as_deref())
                .await;
            if !redirect.teardown.is_clean() {
                warn!(
                    "{} error(s) while force-closing sessions",
                    redirect.teardown.errors.len()
                );
            }
            redirect_to(&redirect.location)
        }
    };

    lifecycle.complete_request(&scope).await;
    response
}

/// `<scheme>://<host>` of the request as the client addressed it.
///
/// The scheme is taken from `X-Forwarded-Proto` when a TLS-terminating proxy
/// sets it, and defaults to `http`.
fn request_origin(headers: &HeaderMap) -> Option<String> {
    let host = headers.get(header::HOST)?.to_str().ok()?.trim();
    if host.is_empty() {
        return None;
    }
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|proto| proto.eq_ignore_ascii_case("https"))
        .map_or("http", |_| "https");
    Some(format!("{}://{}", scheme, host))
}

/// `302 Found` to `location`, or a bare 500 when the location is not a valid header.
fn redirect_to(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => {
            let mut response = StatusCode::FOUND.into_response();
            response.headers_mut().insert(header::LOCATION, value);
            response
        }
        Err(e) => {
            error!("Cannot redirect to error page {:?}: {}", location, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_request_origin() {
        assert_eq!(
            request_origin(&headers(&[("host", "localhost:3000")])).as_deref(),
            Some("http://localhost:3000")
        );
        assert_eq!(
            request_origin(&headers(&[
                ("host", "tenant.example.com"),
                ("x-forwarded-proto", "HTTPS, http"),
            ]))
            .as_deref(),
            Some("https://tenant.example.com")
        );
        assert_eq!(
            request_origin(&headers(&[
                ("host", "tenant.example.com"),
                ("x-forwarded-proto", "gopher"),
            ]))
            .as_deref(),
            Some("http://tenant.example.com")
        );
        assert_eq!(request_origin(&headers(&[("x-forwarded-proto", "https")])), None);
    }

    #[test]
    fn test_unbuildable_location_is_a_bare_500() {
        let response = redirect_to("https://portal.example.com/\n/Error/?gl=1");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().get(header::LOCATION).is_none());

        let response = redirect_to("/Error/?gl=1");
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[header::LOCATION], "/Error/?gl=1");
    }
}
