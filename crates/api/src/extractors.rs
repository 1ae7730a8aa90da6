//! Request extractors.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use crate::response::ApiError;

/// Header carrying the caller's identity.
pub const OWNER_HEADER: &str = "X-Owner-Id";

/// Identity of the caller, as asserted by the upstream gateway.
///
/// Every run operation is scoped to this owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerContext {
    pub owner_id: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for OwnerContext
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let owner_id = parts
            .headers
            .get(OWNER_HEADER)
            .and_then(|h| h.to_str().ok())
            .map(str::trim)
            .filter(|owner| !owner.is_empty())
            .ok_or_else(|| {
                ApiError::unauthorized(format!("missing {} header", OWNER_HEADER))
            })?;

        Ok(OwnerContext {
            owner_id: owner_id.to_string(),
        })
    }
}
