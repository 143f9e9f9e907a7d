//! Loan request and loan offer models

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Loan request status
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq, Hash)]
#[sqlx(type_name = "loan_request_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Open,
    Matched,   // An offer was accepted
    Fulfilled, // The loan was disbursed
    Closed,    // The loan completed or defaulted
    Cancelled,
}

impl RequestStatus {
    /// Statuses whose amount is held against the rental deposit
    pub const COMMITTED: [RequestStatus; 3] = [
        RequestStatus::Open,
        RequestStatus::Matched,
        RequestStatus::Fulfilled,
    ];
}

/// Loan offer status
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq, Hash)]
#[sqlx(type_name = "loan_offer_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OfferStatus {
    Pending,
    Accepted,
    Rejected,
    Withdrawn,
}

/// A renter's request to borrow against their deposit
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq, Eq)]
pub struct LoanRequest {
    pub id: Uuid,
    pub rental_agreement_id: Uuid,
    pub requester_id: Uuid,
    pub amount: Decimal,
    pub duration: i32,
    pub interest_rate: Decimal, // annual percent
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A lender's offer against a loan request
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq, Eq)]
pub struct LoanOffer {
    pub id: Uuid,
    pub loan_request_id: Uuid,
    pub lender_id: Uuid,
    pub interest_rate: Decimal,
    pub duration: i32,
    pub amount: Decimal,
    pub grace_months: i32,
    pub status: OfferStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of accepting an offer
#[derive(Debug, Serialize, Clone)]
pub struct AcceptedOffer {
    pub offer: LoanOffer,
    pub request: LoanRequest,
    pub rejected_offer_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CreateLoanRequestBody {
    pub rental_agreement_id: Uuid,
    pub amount: Decimal,
    pub duration: i32,
    pub interest_rate: Decimal,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CreateLoanOfferBody {
    pub interest_rate: Decimal,
    pub duration: i32,
    pub amount: Decimal,
    #[serde(default)]
    pub grace_months: i32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RegisterLoanAgreementBody {
    pub contract_address: String,
}
