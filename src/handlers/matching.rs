//! Loan request and offer handlers

use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ApiError;
use crate::loan::LoanAgreement;
use crate::matching::{
    AcceptedOffer, CreateLoanOfferBody, CreateLoanRequestBody, LoanOffer, LoanRequest,
    MatchingService, RegisterLoanAgreementBody,
};
use crate::middleware::ActingParty;
use crate::models::ApiResponse;
use crate::reconciler::EventReconciler;

pub async fn create_loan_request(
    State(service): State<Arc<MatchingService>>,
    ActingParty(requester): ActingParty,
    Json(body): Json<CreateLoanRequestBody>,
) -> Result<Json<ApiResponse<LoanRequest>>, ApiError> {
    let request = service.create_loan_request(requester, body).await?;
    Ok(Json(ApiResponse::ok(request)))
}

pub async fn get_loan_request(
    State(service): State<Arc<MatchingService>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<LoanRequest>>, ApiError> {
    let request = service.loan_request(id).await?;
    Ok(Json(ApiResponse::ok(request)))
}

pub async fn cancel_loan_request(
    State(service): State<Arc<MatchingService>>,
    ActingParty(party): ActingParty,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<LoanRequest>>, ApiError> {
    let request = service.cancel_loan_request(id, party).await?;
    Ok(Json(ApiResponse::ok(request)))
}

pub async fn create_loan_offer(
    State(service): State<Arc<MatchingService>>,
    ActingParty(lender): ActingParty,
    Path(request_id): Path<Uuid>,
    Json(body): Json<CreateLoanOfferBody>,
) -> Result<Json<ApiResponse<LoanOffer>>, ApiError> {
    let offer = service.create_loan_offer(lender, request_id, body).await?;
    Ok(Json(ApiResponse::ok(offer)))
}

pub async fn list_loan_offers(
    State(service): State<Arc<MatchingService>>,
    Path(request_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<LoanOffer>>>, ApiError> {
    let offers = service.list_offers(request_id).await?;
    Ok(Json(ApiResponse::ok(offers)))
}

pub async fn accept_loan_offer(
    State(service): State<Arc<MatchingService>>,
    ActingParty(party): ActingParty,
    Path(offer_id): Path<Uuid>,
) -> Result<Json<ApiResponse<AcceptedOffer>>, ApiError> {
    let accepted = service.accept_offer(offer_id, party).await?;
    Ok(Json(ApiResponse::ok(accepted)))
}

pub async fn withdraw_loan_offer(
    State(service): State<Arc<MatchingService>>,
    ActingParty(party): ActingParty,
    Path(offer_id): Path<Uuid>,
) -> Result<Json<ApiResponse<LoanOffer>>, ApiError> {
    let offer = service.withdraw_offer(offer_id, party).await?;
    Ok(Json(ApiResponse::ok(offer)))
}

/// Record the escrow contract deployed for an accepted offer and start
/// listening to it
pub async fn register_loan_agreement(
    State(service): State<Arc<MatchingService>>,
    State(reconciler): State<Arc<EventReconciler>>,
    ActingParty(party): ActingParty,
    Path(offer_id): Path<Uuid>,
    Json(body): Json<RegisterLoanAgreementBody>,
) -> Result<Json<ApiResponse<LoanAgreement>>, ApiError> {
    let loan = service
        .register_loan_agreement(offer_id, &body.contract_address, party)
        .await?;

    if let Err(e) = reconciler.track(&loan.contract_address).await {
        tracing::warn!(contract = %loan.contract_address, error = %e, "Could not start loan listener");
    }

    Ok(Json(ApiResponse::ok(loan)))
}
