//! Loan request / offer route definitions

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::*;
use crate::state::AppState;

pub fn matching_routes() -> Router<AppState> {
    Router::new()
        .route("/api/loan-requests", post(create_loan_request))
        .route("/api/loan-requests/:id", get(get_loan_request))
        .route("/api/loan-requests/:id/cancel", post(cancel_loan_request))
        .route(
            "/api/loan-requests/:id/offers",
            get(list_loan_offers).post(create_loan_offer),
        )
        .route("/api/loan-offers/:id/accept", post(accept_loan_offer))
        .route("/api/loan-offers/:id/withdraw", post(withdraw_loan_offer))
        .route(
            "/api/loan-offers/:id/agreement",
            post(register_loan_agreement),
        )
}
