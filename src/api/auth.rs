use axum::{
    body::Body,
    extract::State,
    http::{HeaderName, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::typed_header::{TypedHeader, TypedHeaderRejection};
use headers::{Error as HeaderError, Header};

use super::AppState;
use crate::error::ApiError;

static X_API_KEY: HeaderName = HeaderName::from_static("x-api-key");

/// The `X-Api-Key` request header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XApiKey(pub String);

impl Header for XApiKey {
    fn name() -> &'static HeaderName {
        &X_API_KEY
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, HeaderError>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = values.next().ok_or_else(HeaderError::invalid)?;
        let key = value.to_str().map_err(|_| HeaderError::invalid())?;
        Ok(XApiKey(key.to_string()))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        if let Ok(value) = HeaderValue::from_str(&self.0) {
            values.extend(std::iter::once(value));
        }
    }
}

/// Rejects the request with 401 unless `X-Api-Key` equals the configured
/// key. Runs before the body is read.
pub async fn require_api_key(
    State(state): State<AppState>,
    api_key: Result<TypedHeader<XApiKey>, TypedHeaderRejection>,
    req: Request<Body>,
    next: Next,
) -> Response {
    match api_key {
        Ok(TypedHeader(XApiKey(key))) if key == *state.api_key => next.run(req).await,
        _ => ApiError::Unauthorized.into_response(),
    }
}
