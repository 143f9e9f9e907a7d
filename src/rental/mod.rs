//! Rental agreements: deposit escrow, monthly rent and the collateral it backs

pub mod model;
pub mod service;

pub use model::*;
pub use service::{AvailableCollateral, RentSettlement, RentalService};

#[cfg(test)]
pub(crate) mod testing {
    use chrono::Utc;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    use super::{RentalAgreement, RentalStatus};
    use crate::db::{AgreementStore, MemoryStore};

    /// 12 month rental, 3000 deposit, 500 rent, already ACTIVE
    pub async fn active_rental(store: &MemoryStore, landlord: Uuid, renter: Uuid) -> RentalAgreement {
        let now = Utc::now();
        let rental = RentalAgreement {
            id: Uuid::new_v4(),
            contract_address: format!("CRENTAL{}", Uuid::new_v4().simple()),
            landlord_id: landlord,
            renter_id: renter,
            name: "Flat 4B".to_string(),
            status: RentalStatus::Active,
            duration: 12,
            security_deposit: Decimal::from(3000),
            base_rent: Decimal::from(500),
            grace_period: 6,
            created_at: now,
            updated_at: now,
        };
        store.insert_rental_agreement(&rental).await.unwrap()
    }
}
