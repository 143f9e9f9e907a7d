//! Rental agreement models

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Rental agreement status
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq, Hash)]
#[sqlx(type_name = "rental_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RentalStatus {
    Initialized, // Created by the landlord, deposit not yet paid
    Active,      // Deposit held in escrow
    Closed,
}

impl RentalStatus {
    pub fn description(&self) -> &'static str {
        match self {
            RentalStatus::Initialized => "Awaiting security deposit from the renter",
            RentalStatus::Active => "Deposit held in escrow; rent is being collected",
            RentalStatus::Closed => "Agreement closed",
        }
    }
}

/// Rental agreement backed by an on-chain escrow contract
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq, Eq)]
pub struct RentalAgreement {
    pub id: Uuid,
    pub contract_address: String,
    pub landlord_id: Uuid,
    pub renter_id: Uuid,
    pub name: String,
    pub status: RentalStatus,
    pub duration: i32, // months
    pub security_deposit: Decimal,
    pub base_rent: Decimal,
    pub grace_period: i32, // months the deposit can cover
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RentalAgreement {
    pub fn is_party(&self, party_id: Uuid) -> bool {
        self.landlord_id == party_id || self.renter_id == party_id
    }
}

/// Number of months the deposit may cover, capped at half the duration
pub fn grace_period(security_deposit: Decimal, base_rent: Decimal, duration: i32) -> i32 {
    let cap = duration / 2;
    if base_rent <= Decimal::ZERO {
        return 0;
    }
    let covered = (security_deposit / base_rent)
        .floor()
        .to_i32()
        .unwrap_or(i32::MAX);
    covered.min(cap).max(0)
}

/// Request DTO for creating a rental agreement
#[derive(Debug, Deserialize, Clone)]
pub struct CreateRentalAgreementRequest {
    pub renter_id: Uuid,
    pub name: String,
    pub contract_address: String,
    pub duration: i32,
    pub security_deposit: Decimal,
    pub base_rent: Decimal,
    pub creation_tx: Option<String>,
}

/// Request DTO for rent and skip submissions
#[derive(Debug, Deserialize)]
pub struct RentPaymentRequest {
    pub month: i32,
    pub signed_tx: Option<String>,
}

/// Request DTO for extending an agreement
#[derive(Debug, Deserialize)]
pub struct ExtendRentalRequest {
    pub additional_months: i32,
    pub signed_tx: Option<String>,
}

/// Breakdown of the deposit pledged as loan collateral
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq, Default)]
pub struct CollateralUsage {
    pub security_deposit: Decimal,
    pub skipped_rent: Decimal,
    pub committed: Decimal,
    pub forfeited: Decimal,
}

impl CollateralUsage {
    pub fn available(&self) -> Decimal {
        (self.security_deposit - self.skipped_rent - self.committed - self.forfeited)
            .max(Decimal::ZERO)
    }
}
