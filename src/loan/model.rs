//! Loan agreement models for RentVault

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Loan agreement status
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq, Hash)]
#[sqlx(type_name = "loan_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoanStatus {
    Initialized, // Registered after an accepted offer
    Ready,       // Lender funded the escrow
    Active,      // Funds disbursed to the borrower
    Paid,        // Repayments underway
    Completed,
    Defaulted,
}

impl LoanStatus {
    pub const REPAYABLE: [LoanStatus; 2] = [LoanStatus::Active, LoanStatus::Paid];

    pub fn is_terminal(&self) -> bool {
        matches!(self, LoanStatus::Completed | LoanStatus::Defaulted)
    }

    pub fn description(&self) -> &'static str {
        match self {
            LoanStatus::Initialized => "Waiting for the lender to fund the escrow",
            LoanStatus::Ready => "Escrow funded; waiting for disbursement",
            LoanStatus::Active => "Funds disbursed; first repayment pending",
            LoanStatus::Paid => "Repayments underway",
            LoanStatus::Completed => "Loan fully repaid",
            LoanStatus::Defaulted => "Borrower missed repayment deadlines; collateral forfeited",
        }
    }
}

/// Loan agreement backed by an on-chain escrow contract
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq, Eq)]
pub struct LoanAgreement {
    pub id: Uuid,
    pub contract_address: String,
    pub loan_request_id: Uuid,
    pub loan_offer_id: Uuid,
    pub rental_agreement_id: Uuid,
    pub borrower_id: Uuid,
    pub lender_id: Uuid,
    pub amount: Decimal,
    pub interest_rate: Decimal,
    pub duration: i32,
    pub grace_months: i32,
    pub status: LoanStatus,
    pub start_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LoanAgreement {
    /// Repayment schedules run from disbursement, or registration before that
    pub fn schedule_start(&self) -> DateTime<Utc> {
        self.start_date.unwrap_or(self.created_at)
    }
}

/// Request to record a repayment
#[derive(Debug, Deserialize)]
pub struct RepaymentRequest {
    pub month: i32,
    pub amount: Decimal,
    pub signed_tx: Option<String>,
}
