//! Loan agreement handlers

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ApiError;
use crate::loan::{LoanAgreement, LoanService, RepaymentRequest};
use crate::middleware::ActingParty;
use crate::models::{ApiResponse, SignedTxRequest};
use crate::payment::Payment;
use crate::schedule::RepaymentSchedule;

pub async fn get_loan_agreement(
    State(service): State<Arc<LoanService>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<LoanAgreement>>, ApiError> {
    let loan = service.agreement(id).await?;
    Ok(Json(ApiResponse::ok(loan)))
}

pub async fn fund_loan(
    State(service): State<Arc<LoanService>>,
    ActingParty(party): ActingParty,
    Path(id): Path<Uuid>,
    Json(body): Json<SignedTxRequest>,
) -> Result<Json<ApiResponse<LoanAgreement>>, ApiError> {
    let loan = service.fund(id, party, body.signed_tx).await?;
    Ok(Json(ApiResponse::ok(loan)))
}

pub async fn disburse_loan(
    State(service): State<Arc<LoanService>>,
    ActingParty(party): ActingParty,
    Path(id): Path<Uuid>,
    Json(body): Json<SignedTxRequest>,
) -> Result<Json<ApiResponse<LoanAgreement>>, ApiError> {
    let loan = service.disburse(id, party, body.signed_tx).await?;
    Ok(Json(ApiResponse::ok(loan)))
}

pub async fn repay_loan(
    State(service): State<Arc<LoanService>>,
    ActingParty(party): ActingParty,
    Path(id): Path<Uuid>,
    Json(body): Json<RepaymentRequest>,
) -> Result<Json<ApiResponse<Payment>>, ApiError> {
    let payment = service
        .repay(id, party, body.month, body.amount, body.signed_tx)
        .await?;
    Ok(Json(ApiResponse::ok(payment)))
}

pub async fn mark_loan_default(
    State(service): State<Arc<LoanService>>,
    ActingParty(party): ActingParty,
    Path(id): Path<Uuid>,
    Json(body): Json<SignedTxRequest>,
) -> Result<Json<ApiResponse<LoanAgreement>>, ApiError> {
    let loan = service
        .mark_default(id, party, body.signed_tx, Utc::now())
        .await?;
    Ok(Json(ApiResponse::ok(loan)))
}

pub async fn get_repayment_schedule(
    State(service): State<Arc<LoanService>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<RepaymentSchedule>>, ApiError> {
    let schedule = service.repayment_schedule(id).await?;
    Ok(Json(ApiResponse::ok(schedule)))
}
