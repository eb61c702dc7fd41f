//! Caller identity and ownership checks

use axum::{extract::FromRequestParts, http::request::Parts};
use playdeck_common::OWNER_HEADER;

use crate::error::ApiError;

/// The user id sent in the `x-playdeck-user` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner(pub String);

#[axum::async_trait]
impl<S> FromRequestParts<S> for Owner
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(OWNER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| Owner(v.to_string()))
            .ok_or(ApiError::Unauthorized)
    }
}

impl Owner {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reject access to a resource owned by someone else.
    pub fn ensure_owns(&self, owner_id: &str, what: &str) -> Result<(), ApiError> {
        if self.0 == owner_id {
            Ok(())
        } else {
            Err(ApiError::Forbidden(format!("{} belongs to another user", what)))
        }
    }
}
