//! Agreement status route definitions

use axum::{routing::get, Router};

use crate::handlers::*;
use crate::state::AppState;

pub fn status_routes() -> Router<AppState> {
    Router::new()
        .route("/api/agreements/:id/status", get(get_agreement_status))
        .route("/api/agreements/:id/payments", get(get_payment_history))
}
