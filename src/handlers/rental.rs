//! Rental agreement handlers

use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ApiError;
use crate::middleware::ActingParty;
use crate::models::{ApiResponse, SignedTxRequest};
use crate::payment::Payment;
use crate::reconciler::EventReconciler;
use crate::rental::{
    AvailableCollateral, CreateRentalAgreementRequest, ExtendRentalRequest, RentPaymentRequest,
    RentalAgreement, RentalService,
};

pub async fn create_rental_agreement(
    State(service): State<Arc<RentalService>>,
    State(reconciler): State<Arc<EventReconciler>>,
    ActingParty(landlord_id): ActingParty,
    Json(request): Json<CreateRentalAgreementRequest>,
) -> Result<Json<ApiResponse<RentalAgreement>>, ApiError> {
    let rental = service.create_agreement(landlord_id, request).await?;

    if let Err(e) = reconciler.track(&rental.contract_address).await {
        tracing::warn!(
            contract = %rental.contract_address,
            error = %e,
            "Could not start listener for new rental; the next restart will pick it up"
        );
    }

    Ok(Json(ApiResponse::ok(rental)))
}

pub async fn get_rental_agreement(
    State(service): State<Arc<RentalService>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<RentalAgreement>>, ApiError> {
    let rental = service.agreement(id).await?;
    Ok(Json(ApiResponse::ok(rental)))
}

pub async fn pay_deposit(
    State(service): State<Arc<RentalService>>,
    ActingParty(party): ActingParty,
    Path(id): Path<Uuid>,
    Json(body): Json<SignedTxRequest>,
) -> Result<Json<ApiResponse<RentalAgreement>>, ApiError> {
    let rental = service.pay_deposit(id, party, body.signed_tx).await?;
    Ok(Json(ApiResponse::ok(rental)))
}

pub async fn pay_rent(
    State(service): State<Arc<RentalService>>,
    ActingParty(party): ActingParty,
    Path(id): Path<Uuid>,
    Json(body): Json<RentPaymentRequest>,
) -> Result<Json<ApiResponse<Payment>>, ApiError> {
    let payment = service.pay_rent(id, party, body.month, body.signed_tx).await?;
    Ok(Json(ApiResponse::ok(payment)))
}

pub async fn skip_rent(
    State(service): State<Arc<RentalService>>,
    ActingParty(party): ActingParty,
    Path(id): Path<Uuid>,
    Json(body): Json<RentPaymentRequest>,
) -> Result<Json<ApiResponse<Payment>>, ApiError> {
    let payment = service.skip_rent(id, party, body.month, body.signed_tx).await?;
    Ok(Json(ApiResponse::ok(payment)))
}

pub async fn extend_rental(
    State(service): State<Arc<RentalService>>,
    ActingParty(party): ActingParty,
    Path(id): Path<Uuid>,
    Json(body): Json<ExtendRentalRequest>,
) -> Result<Json<ApiResponse<RentalAgreement>>, ApiError> {
    let rental = service
        .extend(id, party, body.additional_months, body.signed_tx)
        .await?;
    Ok(Json(ApiResponse::ok(rental)))
}

pub async fn close_rental(
    State(service): State<Arc<RentalService>>,
    ActingParty(party): ActingParty,
    Path(id): Path<Uuid>,
    Json(body): Json<SignedTxRequest>,
) -> Result<Json<ApiResponse<RentalAgreement>>, ApiError> {
    let rental = service.close(id, party, body.signed_tx).await?;
    Ok(Json(ApiResponse::ok(rental)))
}

pub async fn get_available_collateral(
    State(service): State<Arc<RentalService>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<AvailableCollateral>>, ApiError> {
    let collateral = service.available_collateral(id).await?;
    Ok(Json(ApiResponse::ok(collateral)))
}
