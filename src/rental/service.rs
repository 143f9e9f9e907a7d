//! Rental agreement state machine
//!
//! INITIALIZED -> ACTIVE on the security deposit, ACTIVE -> CLOSED on
//! closure. Rent is settled month by month while ACTIVE, either paid or
//! skipped against the deposit up to the grace period.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

use super::model::{
    grace_period, CollateralUsage, CreateRentalAgreementRequest, RentalAgreement, RentalStatus,
};
use crate::db::{AgreementStore, AgreementWrite, PaymentGuard, Transition};
use crate::error::{DomainError, DomainResult};
use crate::ledger::{Ledger, LedgerAction, LedgerTransaction};
use crate::payment::{
    AgreementRef, IdempotencyKey, NewPayment, Payment, PaymentKind, PaymentLedger, PaymentType,
};

/// How a rent month was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RentSettlement {
    Paid,
    Skipped,
}

#[derive(Debug, Serialize, Clone)]
pub struct AvailableCollateral {
    pub rental_agreement_id: Uuid,
    #[serde(flatten)]
    pub usage: CollateralUsage,
    pub available: Decimal,
}

/// Months that hold a RENT or RENT_SKIPPED row
pub fn settled_months(payments: &[Payment]) -> BTreeSet<i32> {
    payments
        .iter()
        .filter(|p| matches!(p.payment_type, PaymentType::Rent | PaymentType::RentSkipped))
        .filter_map(|p| p.month)
        .collect()
}

#[derive(Clone)]
pub struct RentalService {
    store: Arc<dyn AgreementStore>,
    payments: PaymentLedger,
    ledger: Ledger,
}

impl RentalService {
    pub fn new(store: Arc<dyn AgreementStore>, ledger: Ledger) -> Self {
        Self {
            payments: PaymentLedger::new(store.clone()),
            store,
            ledger,
        }
    }

    pub async fn agreement(&self, id: Uuid) -> DomainResult<RentalAgreement> {
        self.store
            .rental_agreement(id)
            .await?
            .ok_or_else(|| DomainError::not_found("Rental agreement", id))
    }

    /// Register a rental agreement created by the landlord
    pub async fn create_agreement(
        &self,
        landlord_id: Uuid,
        request: CreateRentalAgreementRequest,
    ) -> DomainResult<RentalAgreement> {
        if request.name.trim().is_empty() {
            return Err(DomainError::validation("Name is required"));
        }
        if request.contract_address.trim().is_empty() {
            return Err(DomainError::validation("Contract address is required"));
        }
        if request.duration < 1 {
            return Err(DomainError::validation("Duration must be at least 1 month"));
        }
        if request.security_deposit <= Decimal::ZERO || request.base_rent <= Decimal::ZERO {
            return Err(DomainError::validation(
                "Security deposit and base rent must be positive",
            ));
        }
        if landlord_id == request.renter_id {
            return Err(DomainError::validation("Landlord and renter must differ"));
        }

        let now = Utc::now();
        let rental = RentalAgreement {
            id: Uuid::new_v4(),
            contract_address: request.contract_address,
            landlord_id,
            renter_id: request.renter_id,
            name: request.name,
            status: RentalStatus::Initialized,
            duration: request.duration,
            grace_period: grace_period(request.security_deposit, request.base_rent, request.duration),
            security_deposit: request.security_deposit,
            base_rent: request.base_rent,
            created_at: now,
            updated_at: now,
        };
        let rental = self.store.insert_rental_agreement(&rental).await?;

        if let Some(creation_tx) = request.creation_tx {
            self.record_creation(&rental, creation_tx).await?;
        }

        tracing::info!(
            agreement_id = %rental.id,
            contract = %rental.contract_address,
            grace_period = rental.grace_period,
            "Rental agreement created"
        );
        Ok(rental)
    }

    /// Upsert a rental first seen through a factory creation event
    pub async fn register_discovered(
        &self,
        landlord_id: Uuid,
        request: CreateRentalAgreementRequest,
    ) -> DomainResult<RentalAgreement> {
        let contract_address = request.contract_address.clone();
        if let Some(existing) = self.store.rental_agreement_by_address(&contract_address).await? {
            return Ok(existing);
        }
        match self.create_agreement(landlord_id, request).await {
            Err(DomainError::Conflict(_)) => self
                .store
                .rental_agreement_by_address(&contract_address)
                .await?
                .ok_or_else(|| DomainError::not_found("Rental agreement", &contract_address)),
            other => other,
        }
    }

    async fn record_creation(&self, rental: &RentalAgreement, tx_reference: String) -> DomainResult<()> {
        let payment = NewPayment::new(
            AgreementRef::Rental(rental.id),
            PaymentKind::ContractCreation,
            rental.landlord_id,
            rental.renter_id,
            Decimal::ZERO,
            tx_reference,
        )?;
        match self.payments.record(payment).await {
            Ok(_) | Err(DomainError::Conflict(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Renter pays the security deposit through the escrow contract
    pub async fn pay_deposit(
        &self,
        id: Uuid,
        acting_party: Uuid,
        signed_tx: Option<String>,
    ) -> DomainResult<RentalAgreement> {
        let rental = self.agreement(id).await?;
        if acting_party != rental.renter_id {
            return Err(DomainError::unauthorized("Only the renter may pay the deposit"));
        }
        if rental.status != RentalStatus::Initialized {
            return Err(DomainError::state(format!(
                "Deposit cannot be paid while the agreement is {:?}",
                rental.status
            )));
        }
        let key = self
            .deposit_payment(&rental, rental.security_deposit, "pending")?
            .key();
        self.payments.ensure_unrecorded(&key).await?;

        let tx_reference = self
            .ledger
            .submit(
                LedgerTransaction::new(&rental.contract_address, LedgerAction::PayDeposit)
                    .signed(signed_tx),
            )
            .await?;
        let applied = self
            .apply_deposit(&rental, rental.security_deposit, tx_reference.clone())
            .await;
        match applied {
            // The deposit event was recorded first
            Err(DomainError::Conflict(reason)) => {
                self.payments
                    .recorded_by(&key, &tx_reference)
                    .await?
                    .ok_or(DomainError::Conflict(reason))?;
                self.agreement(rental.id).await
            }
            other => other,
        }
    }

    fn deposit_payment(
        &self,
        rental: &RentalAgreement,
        amount: Decimal,
        tx_reference: &str,
    ) -> DomainResult<NewPayment> {
        NewPayment::new(
            AgreementRef::Rental(rental.id),
            PaymentKind::SecurityDeposit,
            rental.renter_id,
            rental.landlord_id,
            amount,
            tx_reference,
        )
    }

    /// Record the deposit and activate the agreement, all or nothing
    pub async fn apply_deposit(
        &self,
        rental: &RentalAgreement,
        amount: Decimal,
        tx_reference: String,
    ) -> DomainResult<RentalAgreement> {
        if amount != rental.security_deposit {
            tracing::warn!(
                agreement_id = %rental.id,
                %amount,
                expected = %rental.security_deposit,
                "Deposit amount differs from the agreed deposit"
            );
        }
        let payment = self.deposit_payment(rental, rental.security_deposit, &tx_reference)?;
        self.store
            .commit(AgreementWrite::payment(payment).transition(Transition::Rental {
                id: rental.id,
                from: vec![RentalStatus::Initialized],
                to: RentalStatus::Active,
            }))
            .await?;

        tracing::info!(agreement_id = %rental.id, tx = %tx_reference, "Security deposit paid; rental active");
        self.agreement(rental.id).await
    }

    pub async fn pay_rent(
        &self,
        id: Uuid,
        acting_party: Uuid,
        month: i32,
        signed_tx: Option<String>,
    ) -> DomainResult<Payment> {
        self.settle_month(id, acting_party, month, RentSettlement::Paid, signed_tx)
            .await
    }

    /// Cover a month's rent from the deposit instead of paying it
    pub async fn skip_rent(
        &self,
        id: Uuid,
        acting_party: Uuid,
        month: i32,
        signed_tx: Option<String>,
    ) -> DomainResult<Payment> {
        self.settle_month(id, acting_party, month, RentSettlement::Skipped, signed_tx)
            .await
    }

    async fn settle_month(
        &self,
        id: Uuid,
        acting_party: Uuid,
        month: i32,
        settlement: RentSettlement,
        signed_tx: Option<String>,
    ) -> DomainResult<Payment> {
        let rental = self.agreement(id).await?;
        if acting_party != rental.renter_id {
            return Err(DomainError::unauthorized("Only the renter may settle rent"));
        }
        if rental.status != RentalStatus::Active {
            return Err(DomainError::state(format!(
                "Rent cannot be settled while the agreement is {:?}",
                rental.status
            )));
        }
        if month < 1 || month > rental.duration {
            return Err(DomainError::validation(format!(
                "Month must be between 1 and {}",
                rental.duration
            )));
        }

        let history = self.payments.payments(rental.id).await?;
        if settled_months(&history).contains(&month) {
            let payment_type = match settlement {
                RentSettlement::Paid => PaymentType::Rent,
                RentSettlement::Skipped => PaymentType::RentSkipped,
            };
            let same_kind = history
                .iter()
                .any(|p| p.payment_type == payment_type && p.month == Some(month));
            if same_kind {
                return Err(DomainError::Conflict(format!(
                    "Month {} is already recorded as {:?}",
                    month, payment_type
                )));
            }
            return Err(DomainError::state(format!("Month {} is already settled", month)));
        }
        if settlement == RentSettlement::Skipped {
            let skipped = history
                .iter()
                .filter(|p| p.payment_type == PaymentType::RentSkipped)
                .count() as i32;
            if skipped >= rental.grace_period {
                return Err(DomainError::Capacity(format!(
                    "Grace period of {} months exhausted",
                    rental.grace_period
                )));
            }
        }

        let (action, kind) = match settlement {
            RentSettlement::Paid => (LedgerAction::PayRent { month }, PaymentKind::Rent { month }),
            RentSettlement::Skipped => (
                LedgerAction::SkipRent { month },
                PaymentKind::RentSkipped { month },
            ),
        };
        let tx_reference = self
            .ledger
            .submit(LedgerTransaction::new(&rental.contract_address, action).signed(signed_tx))
            .await?;
        let applied = self
            .apply_rent(&rental, month, settlement, rental.base_rent, tx_reference.clone())
            .await;
        self.payments
            .settle_submitted(
                applied,
                &IdempotencyKey::new(AgreementRef::Rental(rental.id), kind),
                &tx_reference,
            )
            .await
    }

    /// Record one settled month; the month must still be open when written
    pub async fn apply_rent(
        &self,
        rental: &RentalAgreement,
        month: i32,
        settlement: RentSettlement,
        amount: Decimal,
        tx_reference: String,
    ) -> DomainResult<Payment> {
        let (kind, skip_cap) = match settlement {
            RentSettlement::Paid => (PaymentKind::Rent { month }, None),
            RentSettlement::Skipped => (
                PaymentKind::RentSkipped { month },
                Some(i64::from(rental.grace_period)),
            ),
        };
        let payment = NewPayment::new(
            AgreementRef::Rental(rental.id),
            kind,
            rental.renter_id,
            rental.landlord_id,
            amount,
            tx_reference,
        )?;

        let recorded = self
            .store
            .commit(
                AgreementWrite::payment(payment)
                    .guarded(PaymentGuard::OpenRentMonth { skip_cap })
                    .transition(Transition::Rental {
                        id: rental.id,
                        from: vec![RentalStatus::Active],
                        to: RentalStatus::Active,
                    }),
            )
            .await?
            .ok_or_else(|| DomainError::Database("rent payment was not returned".to_string()))?;

        tracing::info!(
            agreement_id = %rental.id,
            month,
            settlement = ?settlement,
            tx = %recorded.tx_reference,
            "Rent month settled"
        );
        Ok(recorded)
    }

    /// Lengthen the agreement; only allowed in the final month of the
    /// current schedule
    pub async fn extend(
        &self,
        id: Uuid,
        acting_party: Uuid,
        additional_months: i32,
        signed_tx: Option<String>,
    ) -> DomainResult<RentalAgreement> {
        let rental = self.agreement(id).await?;
        if !rental.is_party(acting_party) {
            return Err(DomainError::unauthorized(
                "Only a party to the agreement may extend it",
            ));
        }
        if rental.status != RentalStatus::Active {
            return Err(DomainError::state(format!(
                "Agreement cannot be extended while {:?}",
                rental.status
            )));
        }
        if additional_months < 1 {
            return Err(DomainError::validation("Extension must be at least 1 month"));
        }

        let history = self.payments.payments(rental.id).await?;
        let current_month = settled_months(&history).len() as i32 + 1;
        if current_month != rental.duration {
            return Err(DomainError::state(format!(
                "Extension is only possible in the final month; current month is {} of {}",
                current_month, rental.duration
            )));
        }

        self.ledger
            .submit(
                LedgerTransaction::new(
                    &rental.contract_address,
                    LedgerAction::Extend { additional_months },
                )
                .signed(signed_tx),
            )
            .await?;

        let duration = rental.duration + additional_months;
        match self.apply_extension(&rental, duration).await {
            // The extension event landed first
            Err(DomainError::Conflict(_)) | Err(DomainError::State(_)) => {
                let current = self.agreement(rental.id).await?;
                if current.duration == duration {
                    Ok(current)
                } else {
                    Err(DomainError::state(format!(
                        "Agreement duration moved to {} during the extension",
                        current.duration
                    )))
                }
            }
            other => other,
        }
    }

    /// Move the agreement to its extended total `duration`. A duration the
    /// agreement already reached is reported as `Conflict`.
    pub async fn apply_extension(
        &self,
        rental: &RentalAgreement,
        duration: i32,
    ) -> DomainResult<RentalAgreement> {
        if duration <= rental.duration {
            return Err(DomainError::Conflict(format!(
                "rental agreement {} already runs {} months",
                rental.id, rental.duration
            )));
        }
        if rental.status == RentalStatus::Closed {
            return Err(DomainError::state("A closed agreement cannot be extended"));
        }

        let grace = grace_period(rental.security_deposit, rental.base_rent, duration);
        let extended = self
            .store
            .update_rental_terms(rental.id, rental.duration, duration, grace)
            .await?;

        tracing::info!(
            agreement_id = %rental.id,
            duration,
            grace_period = grace,
            "Rental agreement extended"
        );
        Ok(extended)
    }

    /// Close the agreement; either party may close it once no open loan
    /// is collateralised by its deposit
    pub async fn close(
        &self,
        id: Uuid,
        acting_party: Uuid,
        signed_tx: Option<String>,
    ) -> DomainResult<RentalAgreement> {
        let rental = self.agreement(id).await?;
        if !rental.is_party(acting_party) {
            return Err(DomainError::unauthorized(
                "Only a party to the agreement may close it",
            ));
        }
        if rental.status == RentalStatus::Closed {
            return Err(DomainError::state("Agreement is already closed"));
        }
        let open_loans = self.store.open_loans_for_rental(rental.id).await?;
        if open_loans > 0 {
            return Err(DomainError::state(format!(
                "{} loan(s) are still collateralised by this deposit",
                open_loans
            )));
        }

        self.ledger
            .submit(
                LedgerTransaction::new(&rental.contract_address, LedgerAction::Close)
                    .signed(signed_tx),
            )
            .await?;
        match self.apply_close(&rental).await {
            // Closed by its own event in the meantime
            Err(DomainError::State(reason)) => {
                let current = self.agreement(rental.id).await?;
                if current.status == RentalStatus::Closed {
                    Ok(current)
                } else {
                    Err(DomainError::State(reason))
                }
            }
            other => other,
        }
    }

    pub async fn apply_close(&self, rental: &RentalAgreement) -> DomainResult<RentalAgreement> {
        self.store
            .commit(AgreementWrite::default().transition(Transition::Rental {
                id: rental.id,
                from: vec![RentalStatus::Initialized, RentalStatus::Active],
                to: RentalStatus::Closed,
            }))
            .await?;

        tracing::info!(agreement_id = %rental.id, "Rental agreement closed");
        self.agreement(rental.id).await
    }

    pub async fn available_collateral(&self, id: Uuid) -> DomainResult<AvailableCollateral> {
        let usage = self.store.collateral_usage(id).await?;
        Ok(AvailableCollateral {
            rental_agreement_id: id,
            available: usage.available(),
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::ledger::SimulatedLedgerClient;
    use std::time::Duration;

    struct Fixture {
        store: Arc<MemoryStore>,
        service: RentalService,
        landlord: Uuid,
        renter: Uuid,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let ledger = Ledger::new(Arc::new(SimulatedLedgerClient::new()), Duration::from_secs(1));
        let landlord = store.register_party("GLANDLORD").await;
        let renter = store.register_party("GRENTER").await;
        Fixture {
            service: RentalService::new(store.clone(), ledger),
            store,
            landlord,
            renter,
        }
    }

    fn create_request(renter: Uuid, duration: i32) -> CreateRentalAgreementRequest {
        CreateRentalAgreementRequest {
            renter_id: renter,
            name: "Flat 4B".to_string(),
            contract_address: format!("C{}", Uuid::new_v4().simple()),
            duration,
            security_deposit: Decimal::from(3000),
            base_rent: Decimal::from(500),
            creation_tx: Some("tx-create".to_string()),
        }
    }

    #[tokio::test]
    async fn test_create_computes_grace_period() {
        let f = fixture().await;
        let rental = f
            .service
            .create_agreement(f.landlord, create_request(f.renter, 10))
            .await
            .unwrap();
        assert_eq!(rental.grace_period, 5);
        assert_eq!(rental.status, RentalStatus::Initialized);

        let history = f.store.payments_for(rental.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].payment_type, PaymentType::ContractCreation);
    }

    #[tokio::test]
    async fn test_create_rejects_same_party() {
        let f = fixture().await;
        let result = f
            .service
            .create_agreement(f.landlord, create_request(f.landlord, 12))
            .await;
        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[tokio::test]
    async fn test_only_renter_pays_deposit() {
        let f = fixture().await;
        let rental = f
            .service
            .create_agreement(f.landlord, create_request(f.renter, 12))
            .await
            .unwrap();

        let denied = f.service.pay_deposit(rental.id, f.landlord, None).await;
        assert!(matches!(denied, Err(DomainError::Authorization(_))));

        let active = f.service.pay_deposit(rental.id, f.renter, None).await.unwrap();
        assert_eq!(active.status, RentalStatus::Active);

        let again = f.service.pay_deposit(rental.id, f.renter, None).await;
        assert!(matches!(again, Err(DomainError::State(_))));
    }

    #[tokio::test]
    async fn test_month_holds_one_settlement() {
        let f = fixture().await;
        let rental = crate::rental::testing::active_rental(&f.store, f.landlord, f.renter).await;

        f.service.pay_rent(rental.id, f.renter, 1, None).await.unwrap();
        let skip = f.service.skip_rent(rental.id, f.renter, 1, None).await;
        assert!(matches!(skip, Err(DomainError::State(_))));

        let replay = f.service.pay_rent(rental.id, f.renter, 1, None).await;
        assert!(matches!(replay, Err(DomainError::Conflict(_))));

        let out_of_range = f.service.pay_rent(rental.id, f.renter, 13, None).await;
        assert!(matches!(out_of_range, Err(DomainError::Validation(_))));
    }

    #[tokio::test]
    async fn test_skips_capped_by_grace_period() {
        let f = fixture().await;
        let rental = crate::rental::testing::active_rental(&f.store, f.landlord, f.renter).await;

        for month in 1..=6 {
            f.service.skip_rent(rental.id, f.renter, month, None).await.unwrap();
        }
        let seventh = f.service.skip_rent(rental.id, f.renter, 7, None).await;
        assert!(matches!(seventh, Err(DomainError::Capacity(_))));

        let collateral = f.service.available_collateral(rental.id).await.unwrap();
        assert_eq!(collateral.available, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_extend_only_in_final_month() {
        let f = fixture().await;
        let rental = crate::rental::testing::active_rental(&f.store, f.landlord, f.renter).await;

        let early = f.service.extend(rental.id, f.landlord, 6, None).await;
        assert!(matches!(early, Err(DomainError::State(_))));

        for month in 1..=11 {
            f.service.pay_rent(rental.id, f.renter, month, None).await.unwrap();
        }
        let extended = f.service.extend(rental.id, f.landlord, 6, None).await.unwrap();
        assert_eq!(extended.duration, 18);
        assert_eq!(extended.grace_period, 6);
        assert_eq!(extended.status, RentalStatus::Active);
    }

    #[tokio::test]
    async fn test_either_party_may_close() {
        let f = fixture().await;
        let rental = crate::rental::testing::active_rental(&f.store, f.landlord, f.renter).await;

        let outsider = Uuid::new_v4();
        let denied = f.service.close(rental.id, outsider, None).await;
        assert!(matches!(denied, Err(DomainError::Authorization(_))));

        let closed = f.service.close(rental.id, f.renter, None).await.unwrap();
        assert_eq!(closed.status, RentalStatus::Closed);

        let late_rent = f.service.pay_rent(rental.id, f.renter, 1, None).await;
        assert!(matches!(late_rent, Err(DomainError::State(_))));
    }
}
