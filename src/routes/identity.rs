use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, request::Parts},
};

use crate::error::AppError;

/// Header carrying the player identity authenticated by the gateway.
pub const PLAYER_ID_HEADER: &str = "x-player-id";
const MAX_PLAYER_ID_LEN: usize = 128;

/// Authenticated player identity taken from [`PLAYER_ID_HEADER`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerIdentity(pub String);

/// Read the player identity from request headers, if present and well formed.
pub fn player_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get(PLAYER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty() && value.len() <= MAX_PLAYER_ID_LEN)
        .map(str::to_string)
}

impl<S> FromRequestParts<S> for PlayerIdentity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        player_from_headers(&parts.headers)
            .map(PlayerIdentity)
            .ok_or_else(AppError::missing_identity)
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        http::{HeaderValue, Request, StatusCode},
        response::IntoResponse,
    };

    use super::*;

    #[test]
    fn identity_is_trimmed_and_bounded() {
        let mut headers = HeaderMap::new();
        assert_eq!(player_from_headers(&headers), None);

        headers.insert(PLAYER_ID_HEADER, HeaderValue::from_static("  alice "));
        assert_eq!(player_from_headers(&headers).as_deref(), Some("alice"));

        headers.insert(PLAYER_ID_HEADER, HeaderValue::from_static("   "));
        assert_eq!(player_from_headers(&headers), None);

        let long = "x".repeat(MAX_PLAYER_ID_LEN + 1);
        headers.insert(PLAYER_ID_HEADER, HeaderValue::from_str(&long).unwrap());
        assert_eq!(player_from_headers(&headers), None);
    }

    #[tokio::test]
    async fn missing_header_is_rejected_as_unauthorized() {
        let (mut parts, ()) = Request::builder()
            .uri("/sessions")
            .body(())
            .unwrap()
            .into_parts();
        let err = PlayerIdentity::from_request_parts(&mut parts, &())
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::UNAUTHORIZED);

        let (mut parts, ()) = Request::builder()
            .header(PLAYER_ID_HEADER, "alice")
            .body(())
            .unwrap()
            .into_parts();
        let identity = PlayerIdentity::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        assert_eq!(identity, PlayerIdentity("alice".into()));
    }
}
