//! Loan agreement route definitions

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::*;
use crate::state::AppState;

pub fn loan_routes() -> Router<AppState> {
    Router::new()
        .route("/api/loans/:id", get(get_loan_agreement))
        .route("/api/loans/:id/fund", post(fund_loan))
        .route("/api/loans/:id/disburse", post(disburse_loan))
        .route("/api/loans/:id/repayments", post(repay_loan))
        .route("/api/loans/:id/default", post(mark_loan_default))
        .route("/api/loans/:id/schedule", get(get_repayment_schedule))
}
