//! In-process store used by the simulated ledger mode and the test suites
//!
//! A single mutex guards the whole state, so every call is one atomic unit.
//! `commit` validates the full write before touching anything.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::store::{
    sum_amounts, AgreementStore, AgreementWrite, ContractKind, PaymentGuard, TrackedContract,
    Transition,
};
use crate::error::{DomainError, DomainResult};
use crate::loan::{LoanAgreement, LoanStatus};
use crate::matching::{AcceptedOffer, LoanOffer, LoanRequest, OfferStatus, RequestStatus};
use crate::payment::{AgreementRef, NewPayment, Payment, PaymentType};
use crate::rental::{CollateralUsage, RentalAgreement, RentalStatus};

#[derive(Default)]
struct MemoryState {
    parties: HashMap<String, Uuid>,
    rentals: HashMap<Uuid, RentalAgreement>,
    requests: HashMap<Uuid, LoanRequest>,
    offers: HashMap<Uuid, LoanOffer>,
    loans: HashMap<Uuid, LoanAgreement>,
    payments: Vec<Payment>,
    cursors: HashMap<String, String>,
}

/// `AgreementStore` backed by process memory
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stand-in for the wallet provisioning collaborator
    pub async fn register_party(&self, wallet_address: &str) -> Uuid {
        let mut state = self.state.lock().await;
        *state
            .parties
            .entry(wallet_address.to_string())
            .or_insert_with(Uuid::new_v4)
    }
}

fn status_mismatch<T: std::fmt::Debug>(what: &str, id: Uuid, current: T, to: T) -> DomainError {
    DomainError::state(format!(
        "{} {} is {:?}; cannot move to {:?}",
        what, id, current, to
    ))
}

impl MemoryState {
    fn usage(&self, rental_agreement_id: Uuid) -> DomainResult<CollateralUsage> {
        let rental = self
            .rentals
            .get(&rental_agreement_id)
            .ok_or_else(|| DomainError::not_found("Rental agreement", rental_agreement_id))?;

        let skipped = sum_amounts(
            self.payments
                .iter()
                .filter(|p| {
                    p.rental_agreement_id == Some(rental_agreement_id)
                        && p.payment_type == PaymentType::RentSkipped
                })
                .map(|p| &p.amount),
        );
        let committed = sum_amounts(
            self.requests
                .values()
                .filter(|r| {
                    r.rental_agreement_id == rental_agreement_id
                        && RequestStatus::COMMITTED.contains(&r.status)
                })
                .map(|r| &r.amount),
        );
        let forfeited = sum_amounts(
            self.loans
                .values()
                .filter(|l| {
                    l.rental_agreement_id == rental_agreement_id
                        && l.status == LoanStatus::Defaulted
                })
                .map(|l| &l.amount),
        );

        Ok(CollateralUsage {
            security_deposit: rental.security_deposit,
            skipped_rent: skipped,
            committed,
            forfeited,
        })
    }

    fn agreement_exists(&self, agreement: AgreementRef) -> bool {
        match agreement {
            AgreementRef::Rental(id) => self.rentals.contains_key(&id),
            AgreementRef::Loan(id) => self.loans.contains_key(&id),
        }
    }

    fn check_payment(&self, payment: &NewPayment, guard: PaymentGuard) -> DomainResult<()> {
        if !self.agreement_exists(payment.agreement) {
            return Err(DomainError::not_found("Agreement", payment.agreement.id()));
        }
        let key = payment.key();
        if self.payments.iter().any(|row| row.key() == Some(key)) {
            return Err(DomainError::Conflict(format!("payment {} already recorded", key)));
        }

        let agreement_id = payment.agreement.id();
        let month = payment.kind.month();
        match (guard, month) {
            (PaymentGuard::KeyOnly, _) => {}
            (PaymentGuard::Sequential, Some(month)) => {
                let last = self
                    .payments
                    .iter()
                    .filter(|p| p.agreement_id() == Some(agreement_id) && p.payment_type == key.payment_type)
                    .filter_map(|p| p.month)
                    .max()
                    .unwrap_or(0);
                if month != last + 1 {
                    return Err(DomainError::state(format!(
                        "month {} is out of sequence; next expected month is {}",
                        month,
                        last + 1
                    )));
                }
            }
            (PaymentGuard::OpenRentMonth { skip_cap }, Some(month)) => {
                let settled = self.payments.iter().any(|p| {
                    p.rental_agreement_id == Some(agreement_id)
                        && p.month == Some(month)
                        && matches!(p.payment_type, PaymentType::Rent | PaymentType::RentSkipped)
                });
                if settled {
                    return Err(DomainError::state(format!("month {} is already settled", month)));
                }
                if let (Some(cap), PaymentType::RentSkipped) = (skip_cap, key.payment_type) {
                    let skipped = self
                        .payments
                        .iter()
                        .filter(|p| {
                            p.rental_agreement_id == Some(agreement_id)
                                && p.payment_type == PaymentType::RentSkipped
                        })
                        .count() as i64;
                    if skipped >= cap {
                        return Err(DomainError::Capacity(format!(
                            "grace period of {} months exhausted",
                            cap
                        )));
                    }
                }
            }
            (_, None) => {
                return Err(DomainError::validation("month-guarded payment without a month"));
            }
        }
        Ok(())
    }

    fn check_transition(&self, transition: &Transition) -> DomainResult<()> {
        match transition {
            Transition::Rental { id, from, to } => {
                let rental = self
                    .rentals
                    .get(id)
                    .ok_or_else(|| DomainError::not_found("Rental agreement", id))?;
                if !from.contains(&rental.status) {
                    return Err(status_mismatch("Rental agreement", *id, rental.status, *to));
                }
            }
            Transition::Loan { id, from, to } => {
                let loan = self
                    .loans
                    .get(id)
                    .ok_or_else(|| DomainError::not_found("Loan agreement", id))?;
                if !from.contains(&loan.status) {
                    return Err(status_mismatch("Loan agreement", *id, loan.status, *to));
                }
            }
            Transition::Request { id, from, to } => {
                let request = self
                    .requests
                    .get(id)
                    .ok_or_else(|| DomainError::not_found("Loan request", id))?;
                if !from.contains(&request.status) {
                    return Err(status_mismatch("Loan request", *id, request.status, *to));
                }
            }
        }
        Ok(())
    }

    fn apply_transition(&mut self, transition: &Transition) {
        let now = Utc::now();
        match transition {
            Transition::Rental { id, to, .. } => {
                if let Some(rental) = self.rentals.get_mut(id) {
                    rental.status = *to;
                    rental.updated_at = now;
                }
            }
            Transition::Loan { id, to, .. } => {
                if let Some(loan) = self.loans.get_mut(id) {
                    loan.status = *to;
                    loan.updated_at = now;
                    if *to == LoanStatus::Active && loan.start_date.is_none() {
                        loan.start_date = Some(now);
                    }
                }
            }
            Transition::Request { id, to, .. } => {
                if let Some(request) = self.requests.get_mut(id) {
                    request.status = *to;
                    request.updated_at = now;
                }
            }
        }
    }
}

#[async_trait]
impl AgreementStore for MemoryStore {
    async fn party_id_by_wallet(&self, wallet_address: &str) -> DomainResult<Option<Uuid>> {
        Ok(self.state.lock().await.parties.get(wallet_address).copied())
    }

    async fn insert_rental_agreement(
        &self,
        agreement: &RentalAgreement,
    ) -> DomainResult<RentalAgreement> {
        let mut state = self.state.lock().await;
        if state
            .rentals
            .values()
            .any(|r| r.contract_address == agreement.contract_address)
        {
            return Err(DomainError::Conflict(format!(
                "contract {} is already registered",
                agreement.contract_address
            )));
        }
        state.rentals.insert(agreement.id, agreement.clone());
        Ok(agreement.clone())
    }

    async fn rental_agreement(&self, id: Uuid) -> DomainResult<Option<RentalAgreement>> {
        Ok(self.state.lock().await.rentals.get(&id).cloned())
    }

    async fn rental_agreement_by_address(
        &self,
        contract_address: &str,
    ) -> DomainResult<Option<RentalAgreement>> {
        let state = self.state.lock().await;
        Ok(state
            .rentals
            .values()
            .find(|r| r.contract_address == contract_address)
            .cloned())
    }

    async fn rental_agreements_with_status(
        &self,
        statuses: &[RentalStatus],
    ) -> DomainResult<Vec<RentalAgreement>> {
        let state = self.state.lock().await;
        Ok(state
            .rentals
            .values()
            .filter(|r| statuses.contains(&r.status))
            .cloned()
            .collect())
    }

    async fn update_rental_terms(
        &self,
        id: Uuid,
        expected_duration: i32,
        duration: i32,
        grace_period: i32,
    ) -> DomainResult<RentalAgreement> {
        let mut state = self.state.lock().await;
        let rental = state
            .rentals
            .get_mut(&id)
            .ok_or_else(|| DomainError::not_found("Rental agreement", id))?;
        if rental.duration != expected_duration {
            return Err(DomainError::state(format!(
                "rental agreement {} duration changed concurrently",
                id
            )));
        }
        rental.duration = duration;
        rental.grace_period = grace_period;
        rental.updated_at = Utc::now();
        Ok(rental.clone())
    }

    async fn collateral_usage(&self, rental_agreement_id: Uuid) -> DomainResult<CollateralUsage> {
        self.state.lock().await.usage(rental_agreement_id)
    }

    async fn insert_loan_request(&self, request: &LoanRequest) -> DomainResult<LoanRequest> {
        let mut state = self.state.lock().await;
        let rental = state
            .rentals
            .get(&request.rental_agreement_id)
            .ok_or_else(|| DomainError::not_found("Rental agreement", request.rental_agreement_id))?;
        if rental.status != RentalStatus::Active {
            return Err(DomainError::state(format!(
                "rental agreement {} is {:?}",
                rental.id, rental.status
            )));
        }
        let available = state.usage(request.rental_agreement_id)?.available();
        if request.amount > available {
            return Err(DomainError::Capacity(format!(
                "requested {} exceeds available collateral {}",
                request.amount, available
            )));
        }
        state.requests.insert(request.id, request.clone());
        Ok(request.clone())
    }

    async fn loan_request(&self, id: Uuid) -> DomainResult<Option<LoanRequest>> {
        Ok(self.state.lock().await.requests.get(&id).cloned())
    }

    async fn cancel_loan_request(&self, id: Uuid) -> DomainResult<LoanRequest> {
        let mut state = self.state.lock().await;
        let transition = Transition::Request {
            id,
            from: vec![RequestStatus::Open],
            to: RequestStatus::Cancelled,
        };
        state.check_transition(&transition)?;
        state.apply_transition(&transition);

        let now = Utc::now();
        for offer in state.offers.values_mut() {
            if offer.loan_request_id == id && offer.status == OfferStatus::Pending {
                offer.status = OfferStatus::Rejected;
                offer.updated_at = now;
            }
        }
        state
            .requests
            .get(&id)
            .cloned()
            .ok_or_else(|| DomainError::not_found("Loan request", id))
    }

    async fn insert_loan_offer(&self, offer: &LoanOffer) -> DomainResult<LoanOffer> {
        let mut state = self.state.lock().await;
        match state.requests.get(&offer.loan_request_id) {
            Some(request) if request.status == RequestStatus::Open => {}
            Some(request) => {
                return Err(DomainError::state(format!(
                    "loan request {} is {:?}",
                    request.id, request.status
                )))
            }
            None => return Err(DomainError::not_found("Loan request", offer.loan_request_id)),
        }
        state.offers.insert(offer.id, offer.clone());
        Ok(offer.clone())
    }

    async fn loan_offer(&self, id: Uuid) -> DomainResult<Option<LoanOffer>> {
        Ok(self.state.lock().await.offers.get(&id).cloned())
    }

    async fn loan_offers_for_request(&self, loan_request_id: Uuid) -> DomainResult<Vec<LoanOffer>> {
        let state = self.state.lock().await;
        let mut offers: Vec<LoanOffer> = state
            .offers
            .values()
            .filter(|o| o.loan_request_id == loan_request_id)
            .cloned()
            .collect();
        offers.sort_by_key(|o| o.created_at);
        Ok(offers)
    }

    async fn update_offer_status(
        &self,
        id: Uuid,
        from: &[OfferStatus],
        to: OfferStatus,
    ) -> DomainResult<LoanOffer> {
        let mut state = self.state.lock().await;
        let offer = state
            .offers
            .get_mut(&id)
            .ok_or_else(|| DomainError::not_found("Loan offer", id))?;
        if !from.contains(&offer.status) {
            return Err(status_mismatch("Loan offer", id, offer.status, to));
        }
        offer.status = to;
        offer.updated_at = Utc::now();
        Ok(offer.clone())
    }

    async fn accept_offer(&self, offer_id: Uuid) -> DomainResult<AcceptedOffer> {
        let mut state = self.state.lock().await;
        let offer = state
            .offers
            .get(&offer_id)
            .cloned()
            .ok_or_else(|| DomainError::not_found("Loan offer", offer_id))?;
        if offer.status != OfferStatus::Pending {
            return Err(status_mismatch("Loan offer", offer_id, offer.status, OfferStatus::Accepted));
        }
        let request_transition = Transition::Request {
            id: offer.loan_request_id,
            from: vec![RequestStatus::Open],
            to: RequestStatus::Matched,
        };
        state.check_transition(&request_transition)?;
        let rental_id = state
            .requests
            .get(&offer.loan_request_id)
            .map(|r| r.rental_agreement_id)
            .ok_or_else(|| DomainError::not_found("Loan request", offer.loan_request_id))?;
        match state.rentals.get(&rental_id) {
            Some(rental) if rental.status == RentalStatus::Active => {}
            _ => {
                return Err(DomainError::state(format!(
                    "rental agreement {} is not active",
                    rental_id
                )))
            }
        }

        state.apply_transition(&request_transition);
        let now = Utc::now();
        let mut rejected_offer_ids = Vec::new();
        for sibling in state.offers.values_mut() {
            if sibling.loan_request_id != offer.loan_request_id {
                continue;
            }
            if sibling.id == offer_id {
                sibling.status = OfferStatus::Accepted;
                sibling.updated_at = now;
            } else if sibling.status == OfferStatus::Pending {
                sibling.status = OfferStatus::Rejected;
                sibling.updated_at = now;
                rejected_offer_ids.push(sibling.id);
            }
        }

        let offer = state.offers[&offer_id].clone();
        let request = state.requests[&offer.loan_request_id].clone();
        Ok(AcceptedOffer {
            offer,
            request,
            rejected_offer_ids,
        })
    }

    async fn insert_loan_agreement(&self, agreement: &LoanAgreement) -> DomainResult<LoanAgreement> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.loans.values().find(|l| {
            l.loan_offer_id == agreement.loan_offer_id
                || l.contract_address == agreement.contract_address
        }) {
            return Err(DomainError::Conflict(format!(
                "loan agreement {} already exists for this offer or contract",
                existing.id
            )));
        }
        state.loans.insert(agreement.id, agreement.clone());
        Ok(agreement.clone())
    }

    async fn loan_agreement(&self, id: Uuid) -> DomainResult<Option<LoanAgreement>> {
        Ok(self.state.lock().await.loans.get(&id).cloned())
    }

    async fn loan_agreement_by_address(
        &self,
        contract_address: &str,
    ) -> DomainResult<Option<LoanAgreement>> {
        let state = self.state.lock().await;
        Ok(state
            .loans
            .values()
            .find(|l| l.contract_address == contract_address)
            .cloned())
    }

    async fn loan_agreements_with_status(
        &self,
        statuses: &[LoanStatus],
    ) -> DomainResult<Vec<LoanAgreement>> {
        let state = self.state.lock().await;
        Ok(state
            .loans
            .values()
            .filter(|l| statuses.contains(&l.status))
            .cloned()
            .collect())
    }

    async fn open_loans_for_rental(&self, rental_agreement_id: Uuid) -> DomainResult<i64> {
        let state = self.state.lock().await;
        Ok(state
            .loans
            .values()
            .filter(|l| l.rental_agreement_id == rental_agreement_id && !l.status.is_terminal())
            .count() as i64)
    }

    async fn commit(&self, write: AgreementWrite) -> DomainResult<Option<Payment>> {
        let mut state = self.state.lock().await;

        if let Some(payment) = &write.payment {
            state.check_payment(payment, write.guard)?;
        }
        for transition in &write.transitions {
            state.check_transition(transition)?;
        }

        let recorded = write.payment.as_ref().map(|p| Payment::from_new(p, Utc::now()));
        if let Some(row) = &recorded {
            state.payments.push(row.clone());
        }
        for transition in &write.transitions {
            state.apply_transition(transition);
        }
        Ok(recorded)
    }

    async fn payments_for(&self, agreement_id: Uuid) -> DomainResult<Vec<Payment>> {
        let state = self.state.lock().await;
        Ok(state
            .payments
            .iter()
            .filter(|p| p.agreement_id() == Some(agreement_id))
            .cloned()
            .collect())
    }

    async fn tracked_contracts(&self) -> DomainResult<Vec<TrackedContract>> {
        let state = self.state.lock().await;
        let rentals = state.rentals.values().map(|r| TrackedContract {
            address: r.contract_address.clone(),
            kind: ContractKind::Rental,
        });
        let loans = state.loans.values().map(|l| TrackedContract {
            address: l.contract_address.clone(),
            kind: ContractKind::Loan,
        });
        Ok(rentals.chain(loans).collect())
    }

    async fn ledger_cursor(&self, contract_address: &str) -> DomainResult<Option<String>> {
        Ok(self.state.lock().await.cursors.get(contract_address).cloned())
    }

    async fn save_ledger_cursor(&self, contract_address: &str, cursor: &str) -> DomainResult<()> {
        self.state
            .lock()
            .await
            .cursors
            .insert(contract_address.to_string(), cursor.to_string());
        Ok(())
    }
}
