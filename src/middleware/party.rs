//! Acting-party extraction
//!
//! Identity is resolved upstream; the caller's party id arrives in the
//! `x-party-id` header and every role check happens in the services.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::request::Parts,
};
use uuid::Uuid;

use crate::error::ApiError;

pub const PARTY_HEADER: &str = "x-party-id";

/// Party on whose behalf the request acts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActingParty(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for ActingParty
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(PARTY_HEADER)
            .ok_or_else(|| ApiError::Unauthorized(format!("Missing {} header", PARTY_HEADER)))?
            .to_str()
            .map_err(|_| ApiError::Unauthorized(format!("Malformed {} header", PARTY_HEADER)))?;

        Uuid::parse_str(raw.trim())
            .map(ActingParty)
            .map_err(|_| ApiError::Unauthorized(format!("{} is not a valid id", PARTY_HEADER)))
    }
}
