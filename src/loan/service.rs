//! Loan agreement state machine
//!
//! INITIALIZED -> READY (lender funds) -> ACTIVE (disbursed) -> PAID
//! (repayments underway) -> COMPLETED. ACTIVE and PAID may also move to
//! DEFAULTED once a repayment is overdue beyond the grace months.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use super::model::{LoanAgreement, LoanStatus};
use crate::db::{AgreementStore, AgreementWrite, PaymentGuard, Transition};
use crate::error::{DomainError, DomainResult};
use crate::ledger::{Ledger, LedgerAction, LedgerTransaction};
use crate::matching::RequestStatus;
use crate::payment::{
    payments_by_month, AgreementRef, IdempotencyKey, NewPayment, Payment, PaymentKind,
    PaymentLedger, PaymentType,
};
use crate::rental::RentalStatus;
use crate::schedule::{amortize, build_schedule, is_past_due, RepaymentSchedule};

#[derive(Clone)]
pub struct LoanService {
    store: Arc<dyn AgreementStore>,
    payments: PaymentLedger,
    ledger: Ledger,
}

impl LoanService {
    pub fn new(store: Arc<dyn AgreementStore>, ledger: Ledger) -> Self {
        Self {
            payments: PaymentLedger::new(store.clone()),
            store,
            ledger,
        }
    }

    pub async fn agreement(&self, id: Uuid) -> DomainResult<LoanAgreement> {
        self.store
            .loan_agreement(id)
            .await?
            .ok_or_else(|| DomainError::not_found("Loan agreement", id))
    }

    fn ensure_not_terminal(loan: &LoanAgreement) -> DomainResult<()> {
        if loan.status.is_terminal() {
            return Err(DomainError::state(format!(
                "Loan agreement {} is {:?}",
                loan.id, loan.status
            )));
        }
        Ok(())
    }

    /// Lender funds the escrow
    pub async fn fund(
        &self,
        id: Uuid,
        acting_party: Uuid,
        signed_tx: Option<String>,
    ) -> DomainResult<LoanAgreement> {
        let loan = self.agreement(id).await?;
        Self::ensure_not_terminal(&loan)?;
        if acting_party != loan.lender_id {
            return Err(DomainError::unauthorized("Only the lender may fund the loan"));
        }
        if loan.status != LoanStatus::Initialized {
            return Err(DomainError::state(format!(
                "Loan cannot be funded while {:?}",
                loan.status
            )));
        }
        let key = self.funding_payment(&loan, "pending")?.key();
        self.payments.ensure_unrecorded(&key).await?;

        let tx_reference = self
            .ledger
            .submit(
                LedgerTransaction::new(&loan.contract_address, LedgerAction::Fund)
                    .signed(signed_tx),
            )
            .await?;
        match self.apply_funding(&loan, tx_reference.clone()).await {
            Err(DomainError::Conflict(reason)) => {
                self.payments
                    .recorded_by(&key, &tx_reference)
                    .await?
                    .ok_or(DomainError::Conflict(reason))?;
                self.agreement(loan.id).await
            }
            other => other,
        }
    }

    /// Re-read a loan whose transition lost the race against its own
    /// event; succeeds when the event already moved it to `reached`
    async fn settled_transition(
        &self,
        id: Uuid,
        result: DomainResult<LoanAgreement>,
        reached: &[LoanStatus],
    ) -> DomainResult<LoanAgreement> {
        match result {
            Err(DomainError::State(reason)) => {
                let current = self.agreement(id).await?;
                if reached.contains(&current.status) {
                    Ok(current)
                } else {
                    Err(DomainError::State(reason))
                }
            }
            other => other,
        }
    }

    fn funding_payment(&self, loan: &LoanAgreement, tx_reference: &str) -> DomainResult<NewPayment> {
        NewPayment::new(
            AgreementRef::Loan(loan.id),
            PaymentKind::LoanInitialization,
            loan.lender_id,
            loan.borrower_id,
            loan.amount,
            tx_reference,
        )
    }

    pub async fn apply_funding(
        &self,
        loan: &LoanAgreement,
        tx_reference: String,
    ) -> DomainResult<LoanAgreement> {
        let payment = self.funding_payment(loan, &tx_reference)?;
        self.store
            .commit(AgreementWrite::payment(payment).transition(Transition::Loan {
                id: loan.id,
                from: vec![LoanStatus::Initialized],
                to: LoanStatus::Ready,
            }))
            .await?;

        tracing::info!(loan_id = %loan.id, tx = %tx_reference, "Loan funded");
        self.agreement(loan.id).await
    }

    /// Borrower draws the funded principal
    pub async fn disburse(
        &self,
        id: Uuid,
        acting_party: Uuid,
        signed_tx: Option<String>,
    ) -> DomainResult<LoanAgreement> {
        let loan = self.agreement(id).await?;
        Self::ensure_not_terminal(&loan)?;
        if acting_party != loan.borrower_id {
            return Err(DomainError::unauthorized("Only the borrower may draw the loan"));
        }
        if loan.status != LoanStatus::Ready {
            return Err(DomainError::state(format!(
                "Loan cannot be disbursed while {:?}",
                loan.status
            )));
        }
        let rental = self
            .store
            .rental_agreement(loan.rental_agreement_id)
            .await?
            .ok_or_else(|| DomainError::not_found("Rental agreement", loan.rental_agreement_id))?;
        if rental.status != RentalStatus::Active {
            return Err(DomainError::state(
                "The collateralising rental agreement is no longer active",
            ));
        }

        self.ledger
            .submit(
                LedgerTransaction::new(&loan.contract_address, LedgerAction::Disburse)
                    .signed(signed_tx),
            )
            .await?;
        let applied = self.apply_disbursement(&loan).await;
        self.settled_transition(loan.id, applied, &LoanStatus::REPAYABLE)
            .await
    }

    pub async fn apply_disbursement(&self, loan: &LoanAgreement) -> DomainResult<LoanAgreement> {
        self.store
            .commit(
                AgreementWrite::default()
                    .transition(Transition::Loan {
                        id: loan.id,
                        from: vec![LoanStatus::Ready],
                        to: LoanStatus::Active,
                    })
                    .transition(Transition::Request {
                        id: loan.loan_request_id,
                        from: vec![RequestStatus::Matched],
                        to: RequestStatus::Fulfilled,
                    })
                    .transition(Transition::Rental {
                        id: loan.rental_agreement_id,
                        from: vec![RentalStatus::Active],
                        to: RentalStatus::Active,
                    }),
            )
            .await?;

        tracing::info!(loan_id = %loan.id, "Loan disbursed");
        self.agreement(loan.id).await
    }

    /// Borrower repays the next installment
    pub async fn repay(
        &self,
        id: Uuid,
        acting_party: Uuid,
        month: i32,
        amount: Decimal,
        signed_tx: Option<String>,
    ) -> DomainResult<Payment> {
        let loan = self.agreement(id).await?;
        if acting_party != loan.borrower_id {
            return Err(DomainError::unauthorized("Only the borrower may repay the loan"));
        }
        if !LoanStatus::REPAYABLE.contains(&loan.status) {
            return Err(DomainError::state(format!(
                "Repayments are not accepted while the loan is {:?}",
                loan.status
            )));
        }
        if month < 1 || month > loan.duration {
            return Err(DomainError::validation(format!(
                "Month must be between 1 and {}",
                loan.duration
            )));
        }
        let next_due = self.payments.next_due_month(loan.id).await?;
        if month != next_due {
            return Err(DomainError::state(format!(
                "Month {} is out of sequence; next due month is {}",
                month, next_due
            )));
        }
        let terms = amortize(loan.amount, loan.interest_rate, loan.duration)?;
        if !terms.matches_installment(amount) {
            return Err(DomainError::validation(format!(
                "Repayment of {} does not match the installment of {}",
                amount, terms.installment
            )));
        }

        let tx_reference = self
            .ledger
            .submit(
                LedgerTransaction::new(&loan.contract_address, LedgerAction::Repay { month })
                    .signed(signed_tx),
            )
            .await?;
        let key = IdempotencyKey::new(
            AgreementRef::Loan(loan.id),
            PaymentKind::LoanRepayment { month },
        );
        let applied = self
            .apply_repayment(&loan, month, amount, tx_reference.clone())
            .await;
        self.payments
            .settle_submitted(applied, &key, &tx_reference)
            .await
    }

    /// Record a repayment; the month must be the next in sequence when written
    pub async fn apply_repayment(
        &self,
        loan: &LoanAgreement,
        month: i32,
        amount: Decimal,
        tx_reference: String,
    ) -> DomainResult<Payment> {
        if month > loan.duration {
            return Err(DomainError::validation(format!(
                "Month {} is beyond the loan duration of {}",
                month, loan.duration
            )));
        }
        let payment = NewPayment::new(
            AgreementRef::Loan(loan.id),
            PaymentKind::LoanRepayment { month },
            loan.borrower_id,
            loan.lender_id,
            amount,
            tx_reference,
        )?;

        let is_final = month == loan.duration;
        let mut write = AgreementWrite::payment(payment)
            .guarded(PaymentGuard::Sequential)
            .transition(Transition::Loan {
                id: loan.id,
                from: LoanStatus::REPAYABLE.to_vec(),
                to: if is_final {
                    LoanStatus::Completed
                } else {
                    LoanStatus::Paid
                },
            });
        if is_final {
            write = write.transition(Transition::Request {
                id: loan.loan_request_id,
                from: vec![RequestStatus::Fulfilled],
                to: RequestStatus::Closed,
            });
        }

        let recorded = self
            .store
            .commit(write)
            .await?
            .ok_or_else(|| DomainError::Database("repayment was not returned".to_string()))?;

        if is_final {
            tracing::info!(loan_id = %loan.id, month, "Final repayment recorded; loan completed");
        } else {
            tracing::info!(loan_id = %loan.id, month, tx = %recorded.tx_reference, "Repayment recorded");
        }
        Ok(recorded)
    }

    /// Lender declares a default on a loan that is past due
    pub async fn mark_default(
        &self,
        id: Uuid,
        acting_party: Uuid,
        signed_tx: Option<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<LoanAgreement> {
        let loan = self.agreement(id).await?;
        if acting_party != loan.lender_id {
            return Err(DomainError::unauthorized("Only the lender may declare a default"));
        }
        if !LoanStatus::REPAYABLE.contains(&loan.status) {
            return Err(DomainError::state(format!(
                "Loan cannot default while {:?}",
                loan.status
            )));
        }
        if !self.is_past_due(&loan, now).await? {
            return Err(DomainError::state("Loan is not past due"));
        }

        self.ledger
            .submit(
                LedgerTransaction::new(&loan.contract_address, LedgerAction::Default)
                    .signed(signed_tx),
            )
            .await?;
        let applied = self.apply_default(&loan).await;
        self.settled_transition(loan.id, applied, &[LoanStatus::Defaulted])
            .await
    }

    async fn is_past_due(&self, loan: &LoanAgreement, now: DateTime<Utc>) -> DomainResult<bool> {
        let next_due = self.payments.next_due_month(loan.id).await?;
        Ok(is_past_due(
            loan.schedule_start(),
            next_due,
            loan.grace_months,
            loan.duration,
            now,
        ))
    }

    /// DEFAULTED forfeits the collateral to the lender
    pub async fn apply_default(&self, loan: &LoanAgreement) -> DomainResult<LoanAgreement> {
        self.store
            .commit(
                AgreementWrite::default()
                    .transition(Transition::Loan {
                        id: loan.id,
                        from: LoanStatus::REPAYABLE.to_vec(),
                        to: LoanStatus::Defaulted,
                    })
                    .transition(Transition::Request {
                        id: loan.loan_request_id,
                        from: vec![RequestStatus::Fulfilled],
                        to: RequestStatus::Closed,
                    }),
            )
            .await?;

        tracing::warn!(loan_id = %loan.id, borrower_id = %loan.borrower_id, "Loan defaulted");
        self.agreement(loan.id).await
    }

    /// Default every repayable loan whose next installment is past due
    /// beyond its grace months. Returns the defaulted loan ids.
    pub async fn detect_defaults(&self, now: DateTime<Utc>) -> DomainResult<Vec<Uuid>> {
        let candidates = self
            .store
            .loan_agreements_with_status(&LoanStatus::REPAYABLE)
            .await?;

        let mut defaulted = Vec::new();
        for loan in candidates {
            if !self.is_past_due(&loan, now).await? {
                continue;
            }
            match self.apply_default(&loan).await {
                Ok(_) => defaulted.push(loan.id),
                // Repaid or completed since the scan
                Err(DomainError::State(reason)) => {
                    tracing::debug!(loan_id = %loan.id, %reason, "Skipping default");
                }
                Err(e) => return Err(e),
            }
        }

        if !defaulted.is_empty() {
            tracing::info!("Detected {} defaulted loans", defaulted.len());
        }
        Ok(defaulted)
    }

    pub async fn repayment_schedule(&self, id: Uuid) -> DomainResult<RepaymentSchedule> {
        let loan = self.agreement(id).await?;
        let terms = amortize(loan.amount, loan.interest_rate, loan.duration)?;
        let repayments: Vec<Payment> = self
            .payments
            .payments(loan.id)
            .await?
            .into_iter()
            .filter(|p| p.payment_type == PaymentType::LoanRepayment)
            .collect();
        Ok(build_schedule(
            &terms,
            loan.schedule_start(),
            &payments_by_month(&repayments),
        ))
    }
}
