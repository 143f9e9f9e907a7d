//! Route definitions for the RentVault API

use axum::Router;

use crate::middleware::request_tracing;
use crate::state::AppState;

mod loan;
mod matching;
mod rental;
mod status;

pub use loan::loan_routes;
pub use matching::matching_routes;
pub use rental::rental_routes;
pub use status::status_routes;

/// Every API route with request tracing applied
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .merge(rental_routes())
        .merge(matching_routes())
        .merge(loan_routes())
        .merge(status_routes())
        .with_state(state)
        .layer(axum::middleware::from_fn(request_tracing))
}
