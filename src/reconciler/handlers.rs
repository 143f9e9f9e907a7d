//! Per-event application onto the store

use rust_decimal::Decimal;
use uuid::Uuid;

use super::{EventReconciler, Outcome};
use crate::error::{DomainError, DomainResult};
use crate::ledger::event::RentalTerms;
use crate::ledger::{ContractEvent, LedgerEvent};
use crate::loan::{LoanAgreement, LoanStatus};
use crate::rental::service::settled_months;
use crate::rental::{CreateRentalAgreementRequest, RentSettlement, RentalAgreement, RentalStatus};

fn unknown_contract(event: &LedgerEvent) -> Outcome {
    Outcome::Skipped(format!("no agreement for contract {}", event.contract_address))
}

fn unresolved(wallet: &str) -> Outcome {
    Outcome::Skipped(format!("wallet {} is not registered", wallet))
}

/// A `State` failure that no later event can repair (terminal agreement,
/// month already settled) is final rather than parked for a retry
fn outcome_of(result: DomainResult<()>, unrecoverable: bool) -> DomainResult<Outcome> {
    match result {
        Ok(()) => Ok(Outcome::Applied),
        Err(DomainError::State(reason)) if unrecoverable => Ok(Outcome::Failed(reason)),
        Err(e) => Err(e),
    }
}

fn ensure_party(actual: Uuid, expected: Uuid, role: &str) -> DomainResult<()> {
    if actual != expected {
        return Err(DomainError::unauthorized(format!(
            "event signer is not the agreement's {}",
            role
        )));
    }
    Ok(())
}

impl EventReconciler {
    async fn resolve(&self, wallet: &str) -> DomainResult<Option<Uuid>> {
        self.store.party_id_by_wallet(wallet).await
    }

    async fn rental_for(&self, event: &LedgerEvent) -> DomainResult<Option<RentalAgreement>> {
        self.store
            .rental_agreement_by_address(&event.contract_address)
            .await
    }

    async fn loan_for(&self, event: &LedgerEvent) -> DomainResult<Option<LoanAgreement>> {
        self.store.loan_agreement_by_address(&event.contract_address).await
    }

    pub(super) async fn apply(&self, event: &LedgerEvent, parsed: ContractEvent) -> DomainResult<Outcome> {
        let tx = event.tx_reference.clone();

        match parsed {
            ContractEvent::AgreementCreated {
                contract,
                rental_terms,
            } => return self.on_created(&contract, rental_terms, tx).await,

            ContractEvent::DepositPaid { payer, amount } => {
                let Some(rental) = self.rental_for(event).await? else {
                    return Ok(unknown_contract(event));
                };
                let Some(payer_id) = self.resolve(&payer).await? else {
                    return Ok(unresolved(&payer));
                };
                ensure_party(payer_id, rental.renter_id, "renter")?;
                self.rentals.apply_deposit(&rental, amount, tx).await?;
            }

            ContractEvent::RentPaid {
                payer,
                month,
                amount,
            } => {
                return self
                    .on_rent(event, &payer, month, amount, RentSettlement::Paid, tx)
                    .await
            }

            ContractEvent::RentSkipped {
                payer,
                month,
                amount,
            } => {
                return self
                    .on_rent(event, &payer, month, amount, RentSettlement::Skipped, tx)
                    .await
            }

            ContractEvent::LoanFunded { lender, .. } => {
                let Some(loan) = self.loan_for(event).await? else {
                    return Ok(unknown_contract(event));
                };
                let Some(lender_id) = self.resolve(&lender).await? else {
                    return Ok(unresolved(&lender));
                };
                ensure_party(lender_id, loan.lender_id, "lender")?;
                let funded = self.loans.apply_funding(&loan, tx).await.map(|_| ());
                return outcome_of(funded, loan.status.is_terminal());
            }

            ContractEvent::LoanDisbursed { borrower } => {
                let Some(loan) = self.loan_for(event).await? else {
                    return Ok(unknown_contract(event));
                };
                if !matches!(loan.status, LoanStatus::Initialized | LoanStatus::Ready) {
                    return Ok(Outcome::Duplicate);
                }
                let Some(borrower_id) = self.resolve(&borrower).await? else {
                    return Ok(unresolved(&borrower));
                };
                ensure_party(borrower_id, loan.borrower_id, "borrower")?;
                self.loans.apply_disbursement(&loan).await?;
            }

            ContractEvent::Repaid {
                borrower,
                month,
                amount,
            } => {
                let Some(loan) = self.loan_for(event).await? else {
                    return Ok(unknown_contract(event));
                };
                let Some(borrower_id) = self.resolve(&borrower).await? else {
                    return Ok(unresolved(&borrower));
                };
                ensure_party(borrower_id, loan.borrower_id, "borrower")?;
                let repaid = self
                    .loans
                    .apply_repayment(&loan, month, amount, tx)
                    .await
                    .map(|_| ());
                return outcome_of(repaid, loan.status.is_terminal());
            }

            ContractEvent::Extended { duration } => {
                let Some(rental) = self.rental_for(event).await? else {
                    return Ok(unknown_contract(event));
                };
                let extended = self
                    .rentals
                    .apply_extension(&rental, duration)
                    .await
                    .map(|_| ());
                return outcome_of(extended, rental.status == RentalStatus::Closed);
            }

            ContractEvent::Closed => {
                let Some(rental) = self.rental_for(event).await? else {
                    return Ok(match self.loan_for(event).await? {
                        Some(_) => Outcome::Ignored,
                        None => unknown_contract(event),
                    });
                };
                if rental.status == RentalStatus::Closed {
                    return Ok(Outcome::Duplicate);
                }
                self.rentals.apply_close(&rental).await?;
            }

            ContractEvent::Defaulted => {
                let Some(loan) = self.loan_for(event).await? else {
                    return Ok(unknown_contract(event));
                };
                match loan.status {
                    LoanStatus::Defaulted => return Ok(Outcome::Duplicate),
                    LoanStatus::Completed => {
                        return Ok(Outcome::Skipped("loan is already completed".to_string()))
                    }
                    _ => {}
                }
                self.loans.apply_default(&loan).await?;
            }
        }

        Ok(Outcome::Applied)
    }

    async fn on_rent(
        &self,
        event: &LedgerEvent,
        payer: &str,
        month: i32,
        amount: Decimal,
        settlement: RentSettlement,
        tx_reference: String,
    ) -> DomainResult<Outcome> {
        let Some(rental) = self.rental_for(event).await? else {
            return Ok(unknown_contract(event));
        };
        let Some(payer_id) = self.resolve(payer).await? else {
            return Ok(unresolved(payer));
        };
        ensure_party(payer_id, rental.renter_id, "renter")?;
        let settled = self
            .rentals
            .apply_rent(&rental, month, settlement, amount, tx_reference)
            .await
            .map(|_| ());

        // A month already settled the other way stays settled
        let month_taken = match &settled {
            Err(DomainError::State(_)) => {
                let history = self.store.payments_for(rental.id).await?;
                settled_months(&history).contains(&month)
            }
            _ => false,
        };
        outcome_of(settled, month_taken || rental.status == RentalStatus::Closed)
    }

    async fn on_created(
        &self,
        contract: &str,
        rental_terms: Option<RentalTerms>,
        tx_reference: String,
    ) -> DomainResult<Outcome> {
        let known = self.store.rental_agreement_by_address(contract).await?.is_some()
            || self.store.loan_agreement_by_address(contract).await?.is_some();
        if known {
            if self.is_tracking(contract).await {
                return Ok(Outcome::Duplicate);
            }
            self.discover(contract);
            return Ok(Outcome::Applied);
        }

        let Some(terms) = rental_terms else {
            return Ok(Outcome::Skipped(format!(
                "no agreement registered for contract {}",
                contract
            )));
        };
        let Some(landlord_id) = self.resolve(&terms.landlord_wallet).await? else {
            return Ok(unresolved(&terms.landlord_wallet));
        };
        let Some(renter_id) = self.resolve(&terms.renter_wallet).await? else {
            return Ok(unresolved(&terms.renter_wallet));
        };

        let request = CreateRentalAgreementRequest {
            renter_id,
            name: format!("Rental {}", contract),
            contract_address: contract.to_string(),
            duration: terms.duration,
            security_deposit: terms.security_deposit,
            base_rent: terms.base_rent,
            creation_tx: Some(tx_reference),
        };
        let rental = self.rentals.register_discovered(landlord_id, request).await?;
        tracing::info!(agreement_id = %rental.id, contract = %contract, "Discovered rental agreement");

        self.discover(contract);
        Ok(Outcome::Applied)
    }
}
