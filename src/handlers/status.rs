//! Status and history queries for either agreement type

use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::ApiResponse;
use crate::payment::PaymentHistory;
use crate::status::{AgreementStatus, StatusService};

pub async fn get_agreement_status(
    State(service): State<Arc<StatusService>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<AgreementStatus>>, ApiError> {
    let status = service.agreement_status(id).await?;
    Ok(Json(ApiResponse::ok(status)))
}

pub async fn get_payment_history(
    State(service): State<Arc<StatusService>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<PaymentHistory>>, ApiError> {
    let history = service.payment_history(id).await?;
    Ok(Json(ApiResponse::ok(history)))
}
