//! Agreement status, progress and payment history queries

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::{AgreementStore, ContractKind};
use crate::error::{DomainError, DomainResult};
use crate::loan::{LoanAgreement, LoanStatus};
use crate::payment::{self, Payment, PaymentHistory, PaymentType};
use crate::rental::service::settled_months;
use crate::rental::{RentalAgreement, RentalStatus};
use crate::schedule::{self, amortize, build_schedule};

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(untagged)]
pub enum CurrentStatus {
    Rental(RentalStatus),
    Loan(LoanStatus),
}

#[derive(Debug, Serialize, Clone)]
pub struct AgreementStatus {
    pub agreement_id: Uuid,
    pub kind: ContractKind,
    pub current: CurrentStatus,
    pub description: &'static str,
    pub progress: u32,
    pub next_payment_due: Option<DateTime<Utc>>,
    pub history: Vec<Payment>,
}

#[derive(Clone)]
pub struct StatusService {
    store: Arc<dyn AgreementStore>,
}

impl StatusService {
    pub fn new(store: Arc<dyn AgreementStore>) -> Self {
        Self { store }
    }

    pub async fn agreement_status(&self, id: Uuid) -> DomainResult<AgreementStatus> {
        if let Some(rental) = self.store.rental_agreement(id).await? {
            let history = self.store.payments_for(id).await?;
            return Ok(rental_status(&rental, history));
        }
        if let Some(loan) = self.store.loan_agreement(id).await? {
            let history = self.store.payments_for(id).await?;
            return loan_status(&loan, history);
        }
        Err(DomainError::not_found("Agreement", id))
    }

    pub async fn payment_history(&self, id: Uuid) -> DomainResult<PaymentHistory> {
        let exists = self.store.rental_agreement(id).await?.is_some()
            || self.store.loan_agreement(id).await?.is_some();
        if !exists {
            return Err(DomainError::not_found("Agreement", id));
        }
        let payments = self.store.payments_for(id).await?;
        Ok(payment::ledger::history(id, payments))
    }
}

fn rental_status(rental: &RentalAgreement, history: Vec<Payment>) -> AgreementStatus {
    let settled = settled_months(&history);
    let next_month = settled.len() as i32 + 1;
    let next_payment_due = (rental.status == RentalStatus::Active && next_month <= rental.duration)
        .then(|| schedule::due_date(rental.created_at, next_month));

    AgreementStatus {
        agreement_id: rental.id,
        kind: ContractKind::Rental,
        current: CurrentStatus::Rental(rental.status),
        description: rental.status.description(),
        progress: schedule::progress(settled.len(), rental.duration),
        next_payment_due,
        history,
    }
}

fn loan_status(loan: &LoanAgreement, history: Vec<Payment>) -> DomainResult<AgreementStatus> {
    let terms = amortize(loan.amount, loan.interest_rate, loan.duration)?;
    let repayments: Vec<Payment> = history
        .iter()
        .filter(|p| p.payment_type == PaymentType::LoanRepayment)
        .cloned()
        .collect();
    let schedule = build_schedule(
        &terms,
        loan.schedule_start(),
        &payment::payments_by_month(&repayments),
    );
    let next_payment_due = LoanStatus::REPAYABLE
        .contains(&loan.status)
        .then(|| schedule.next_payment_due())
        .flatten();

    Ok(AgreementStatus {
        agreement_id: loan.id,
        kind: ContractKind::Loan,
        current: CurrentStatus::Loan(loan.status),
        description: loan.status.description(),
        progress: schedule.progress,
        next_payment_due,
        history,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::payment::{AgreementRef, NewPayment, PaymentKind};

    #[tokio::test]
    async fn test_rental_progress_counts_settled_months() {
        let store = Arc::new(MemoryStore::new());
        let landlord = store.register_party("GLANDLORD").await;
        let renter = store.register_party("GRENTER").await;
        let rental = crate::rental::testing::active_rental(&store, landlord, renter).await;

        for (month, kind) in [(1, PaymentKind::Rent { month: 1 }), (2, PaymentKind::RentSkipped { month: 2 }), (3, PaymentKind::Rent { month: 3 })] {
            let payment = NewPayment::new(
                AgreementRef::Rental(rental.id),
                kind,
                renter,
                landlord,
                rust_decimal::Decimal::from(500),
                format!("tx-{}", month),
            )
            .unwrap();
            store
                .commit(crate::db::AgreementWrite::payment(payment))
                .await
                .unwrap();
        }

        let service = StatusService::new(store.clone());
        let status = service.agreement_status(rental.id).await.unwrap();
        assert_eq!(status.kind, ContractKind::Rental);
        assert_eq!(status.current, CurrentStatus::Rental(RentalStatus::Active));
        assert_eq!(status.progress, 25);
        assert_eq!(status.history.len(), 3);
        assert_eq!(
            status.next_payment_due,
            Some(schedule::due_date(rental.created_at, 4))
        );

        let history = service.payment_history(rental.id).await.unwrap();
        assert_eq!(history.next_due_month, 4);
        assert_eq!(history.totals[&PaymentType::Rent], rust_decimal::Decimal::from(1000));
    }

    #[tokio::test]
    async fn test_unknown_agreement_is_not_found() {
        let service = StatusService::new(Arc::new(MemoryStore::new()));
        let result = service.agreement_status(Uuid::new_v4()).await;
        assert!(matches!(result, Err(DomainError::NotFound(_))));
    }
}
