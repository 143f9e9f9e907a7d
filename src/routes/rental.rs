//! Rental agreement route definitions

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::*;
use crate::state::AppState;

pub fn rental_routes() -> Router<AppState> {
    Router::new()
        .route("/api/rentals", post(create_rental_agreement))
        .route("/api/rentals/:id", get(get_rental_agreement))
        .route("/api/rentals/:id/deposit", post(pay_deposit))
        .route("/api/rentals/:id/rent", post(pay_rent))
        .route("/api/rentals/:id/skip", post(skip_rent))
        .route("/api/rentals/:id/extend", post(extend_rental))
        .route("/api/rentals/:id/close", post(close_rental))
        .route("/api/rentals/:id/collateral", get(get_available_collateral))
}
