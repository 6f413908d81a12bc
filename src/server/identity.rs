//! Cookie-backed viewer identity

use axum::extract::Request;
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use tracing::debug;

use crate::settings::ViewerId;

pub const COOKIE_NAME: &str = "vantage_viewer";

/// Attach a [`ViewerId`] to every request, minting one (and setting the
/// cookie) when the client didn't send a usable one.
pub async fn assign_viewer(mut req: Request, next: Next) -> Response {
    let (viewer, minted) = match viewer_from_headers(req.headers()) {
        Some(viewer) => (viewer, false),
        None => (ViewerId::mint(), true),
    };
    req.extensions_mut().insert(viewer.clone());

    let mut res = next.run(req).await;

    if minted {
        debug!(%viewer, "minted viewer id");
        let cookie = format!("{COOKIE_NAME}={viewer}; Path=/; HttpOnly; SameSite=Lax");
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            res.headers_mut().append(SET_COOKIE, value);
        }
    }
    res
}

/// Extract the viewer id from `Cookie` headers, ignoring malformed values
pub fn viewer_from_headers(headers: &HeaderMap) -> Option<ViewerId> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == COOKIE_NAME)
        .map(|(_, value)| value.trim())
        .filter(|value| is_valid_id(value))
        .map(ViewerId::new)
}

fn is_valid_id(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 64
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(cookie: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_str(cookie).unwrap());
        headers
    }

    #[test]
    fn finds_our_cookie_among_others() {
        let id = viewer_from_headers(&headers("theme=dark; vantage_viewer=abc-123; x=y"));
        assert_eq!(id, Some(ViewerId::new("abc-123")));
    }

    #[test]
    fn rejects_missing_or_garbage_ids() {
        assert_eq!(viewer_from_headers(&HeaderMap::new()), None);
        assert_eq!(viewer_from_headers(&headers("vantage_viewer=")), None);
        assert_eq!(viewer_from_headers(&headers("vantage_viewer=a b\"c")), None);
        assert_eq!(viewer_from_headers(&headers("other_viewer=abc")), None);
    }
}
