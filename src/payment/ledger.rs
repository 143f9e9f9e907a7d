//! Payment ledger service
//!
//! Aggregates are computed at read time from the stored rows and never
//! persisted alongside them.

use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use super::model::{IdempotencyKey, NewPayment, Payment, PaymentHistory, PaymentType};
use crate::db::{sum_amounts, AgreementStore, AgreementWrite};
use crate::error::{DomainError, DomainResult};

/// Sum of every payment of `payment_type`
pub fn total_paid(payments: &[Payment], payment_type: PaymentType) -> Decimal {
    sum_amounts(
        payments
            .iter()
            .filter(|p| p.payment_type == payment_type)
            .map(|p| &p.amount),
    )
}

/// Amount recorded against each month, across the month-keyed types
pub fn payments_by_month(payments: &[Payment]) -> BTreeMap<i32, Decimal> {
    let mut by_month = BTreeMap::new();
    for payment in payments {
        if let Some(month) = payment.month {
            *by_month.entry(month).or_insert(Decimal::ZERO) += payment.amount;
        }
    }
    by_month
}

/// 1 + highest recorded month of the given type, or 1 if none
pub fn next_due_month(payments: &[Payment], payment_type: PaymentType) -> i32 {
    payments
        .iter()
        .filter(|p| p.payment_type == payment_type)
        .filter_map(|p| p.month)
        .max()
        .map_or(1, |month| month + 1)
}

/// The month type that drives an agreement's schedule
fn schedule_type(payments: &[Payment]) -> PaymentType {
    if payments.iter().any(|p| p.loan_agreement_id.is_some()) {
        PaymentType::LoanRepayment
    } else {
        PaymentType::Rent
    }
}

/// Build the history view for one agreement
pub fn history(agreement_id: Uuid, payments: Vec<Payment>) -> PaymentHistory {
    let mut totals = BTreeMap::new();
    for payment in &payments {
        *totals.entry(payment.payment_type).or_insert(Decimal::ZERO) += payment.amount;
    }
    let total = sum_amounts(totals.values());
    let next_due_month = match schedule_type(&payments) {
        PaymentType::LoanRepayment => next_due_month(&payments, PaymentType::LoanRepayment),
        // Skipped months count as settled for the rent schedule
        _ => payments
            .iter()
            .filter(|p| matches!(p.payment_type, PaymentType::Rent | PaymentType::RentSkipped))
            .filter_map(|p| p.month)
            .max()
            .map_or(1, |month| month + 1),
    };

    PaymentHistory {
        agreement_id,
        payments,
        totals,
        total,
        next_due_month,
    }
}

/// Append-only ledger over the agreement store
#[derive(Clone)]
pub struct PaymentLedger {
    store: Arc<dyn AgreementStore>,
}

impl PaymentLedger {
    pub fn new(store: Arc<dyn AgreementStore>) -> Self {
        Self { store }
    }

    /// Append a payment. A second write with the same idempotency key
    /// returns `Conflict` and leaves the ledger unchanged.
    pub async fn record(&self, payment: NewPayment) -> DomainResult<Payment> {
        let key = payment.key();
        let recorded = self.store.commit(AgreementWrite::payment(payment)).await?;
        let recorded = recorded
            .ok_or_else(|| DomainError::Database(format!("payment {} was not returned", key)))?;

        tracing::info!(
            agreement_id = %key.agreement_id,
            payment_type = ?key.payment_type,
            month = ?key.month,
            tx = %recorded.tx_reference,
            "Payment recorded"
        );
        Ok(recorded)
    }

    /// Read-time duplicate check run before a ledger round-trip. The store
    /// still enforces the key when the payment is written.
    pub async fn ensure_unrecorded(&self, key: &IdempotencyKey) -> DomainResult<()> {
        let payments = self.store.payments_for(key.agreement_id).await?;
        if payments.iter().any(|p| p.key().as_ref() == Some(key)) {
            return Err(DomainError::Conflict(format!("payment {} already recorded", key)));
        }
        Ok(())
    }

    /// Row stored under `key` by the transaction `tx_reference`, if any
    pub async fn recorded_by(
        &self,
        key: &IdempotencyKey,
        tx_reference: &str,
    ) -> DomainResult<Option<Payment>> {
        let payments = self.store.payments_for(key.agreement_id).await?;
        Ok(payments
            .into_iter()
            .find(|p| p.key().as_ref() == Some(key) && p.tx_reference == tx_reference))
    }

    /// Resolve the write that follows a finalized ledger submission. The
    /// transaction's own event may have been recorded by the reconciler in
    /// between; that collision is the caller's payment, not a duplicate.
    pub async fn settle_submitted(
        &self,
        write: DomainResult<Payment>,
        key: &IdempotencyKey,
        tx_reference: &str,
    ) -> DomainResult<Payment> {
        match write {
            Err(DomainError::Conflict(reason)) => self
                .recorded_by(key, tx_reference)
                .await?
                .ok_or(DomainError::Conflict(reason)),
            other => other,
        }
    }

    pub async fn payments(&self, agreement_id: Uuid) -> DomainResult<Vec<Payment>> {
        self.store.payments_for(agreement_id).await
    }

    pub async fn total_paid(
        &self,
        agreement_id: Uuid,
        payment_type: PaymentType,
    ) -> DomainResult<Decimal> {
        let payments = self.store.payments_for(agreement_id).await?;
        Ok(total_paid(&payments, payment_type))
    }

    pub async fn payments_by_month(&self, agreement_id: Uuid) -> DomainResult<BTreeMap<i32, Decimal>> {
        let payments = self.store.payments_for(agreement_id).await?;
        Ok(payments_by_month(&payments))
    }

    /// Next loan repayment month
    pub async fn next_due_month(&self, agreement_id: Uuid) -> DomainResult<i32> {
        let payments = self.store.payments_for(agreement_id).await?;
        Ok(next_due_month(&payments, PaymentType::LoanRepayment))
    }

    pub async fn history(&self, agreement_id: Uuid) -> DomainResult<PaymentHistory> {
        let payments = self.store.payments_for(agreement_id).await?;
        Ok(history(agreement_id, payments))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::payment::{AgreementRef, PaymentKind};
    use chrono::Utc;

    fn repayment(loan_id: Uuid, month: i32, amount: i64) -> Payment {
        let new = NewPayment::new(
            AgreementRef::Loan(loan_id),
            PaymentKind::LoanRepayment { month },
            Uuid::new_v4(),
            Uuid::new_v4(),
            Decimal::from(amount),
            format!("tx-{}", month),
        )
        .unwrap();
        Payment::from_new(&new, Utc::now())
    }

    #[test]
    fn test_next_due_month_defaults_to_one() {
        assert_eq!(next_due_month(&[], PaymentType::LoanRepayment), 1);
    }

    #[test]
    fn test_aggregates() {
        let loan_id = Uuid::new_v4();
        let payments = vec![
            repayment(loan_id, 1, 560),
            repayment(loan_id, 2, 560),
            repayment(loan_id, 3, 560),
        ];

        assert_eq!(next_due_month(&payments, PaymentType::LoanRepayment), 4);
        assert_eq!(total_paid(&payments, PaymentType::LoanRepayment), Decimal::from(1680));
        assert_eq!(total_paid(&payments, PaymentType::Rent), Decimal::ZERO);

        let by_month = payments_by_month(&payments);
        assert_eq!(by_month.len(), 3);
        assert_eq!(by_month[&2], Decimal::from(560));

        let view = history(loan_id, payments);
        assert_eq!(view.total, Decimal::from(1680));
        assert_eq!(view.next_due_month, 4);
        assert_eq!(view.totals[&PaymentType::LoanRepayment], Decimal::from(1680));
    }

    #[tokio::test]
    async fn test_record_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let landlord = store.register_party("GLANDLORD").await;
        let renter = store.register_party("GRENTER").await;
        let rental = crate::rental::testing::active_rental(&store, landlord, renter).await;
        let ledger = PaymentLedger::new(store.clone());

        let rent = NewPayment::new(
            AgreementRef::Rental(rental.id),
            PaymentKind::Rent { month: 1 },
            renter,
            landlord,
            Decimal::from(500),
            "tx-rent-1",
        )
        .unwrap();

        ledger.record(rent.clone()).await.unwrap();
        let replay = ledger.record(rent).await;
        assert!(matches!(replay, Err(DomainError::Conflict(_))));

        let total = ledger.total_paid(rental.id, PaymentType::Rent).await.unwrap();
        assert_eq!(total, Decimal::from(500));
    }

    #[tokio::test]
    async fn test_collision_with_own_transaction_settles() {
        let store = Arc::new(MemoryStore::new());
        let landlord = store.register_party("GLANDLORD").await;
        let renter = store.register_party("GRENTER").await;
        let rental = crate::rental::testing::active_rental(&store, landlord, renter).await;
        let ledger = PaymentLedger::new(store.clone());

        let rent = NewPayment::new(
            AgreementRef::Rental(rental.id),
            PaymentKind::Rent { month: 1 },
            renter,
            landlord,
            Decimal::from(500),
            "tx-rent-1",
        )
        .unwrap();
        let key = rent.key();
        ledger.record(rent.clone()).await.unwrap();

        let own = ledger
            .settle_submitted(ledger.record(rent.clone()).await, &key, "tx-rent-1")
            .await
            .unwrap();
        assert_eq!(own.tx_reference, "tx-rent-1");

        let foreign = ledger
            .settle_submitted(ledger.record(rent).await, &key, "tx-rent-other")
            .await;
        assert!(matches!(foreign, Err(DomainError::Conflict(_))));
    }
}
