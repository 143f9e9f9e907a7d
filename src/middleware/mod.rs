//! Middleware for the RentVault API
//!
//! Request tracing and acting-party extraction.

mod party;
mod tracing;

pub use party::{ActingParty, PARTY_HEADER};
pub use tracing::request_tracing;
