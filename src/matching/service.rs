//! Off-chain matching workflow between renters and lenders

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use super::model::{
    AcceptedOffer, CreateLoanOfferBody, CreateLoanRequestBody, LoanOffer, LoanRequest,
    OfferStatus, RequestStatus,
};
use crate::db::AgreementStore;
use crate::error::{DomainError, DomainResult};
use crate::loan::{LoanAgreement, LoanStatus};
use crate::rental::RentalStatus;

#[derive(Clone)]
pub struct MatchingService {
    store: Arc<dyn AgreementStore>,
}

impl MatchingService {
    pub fn new(store: Arc<dyn AgreementStore>) -> Self {
        Self { store }
    }

    pub async fn loan_request(&self, id: Uuid) -> DomainResult<LoanRequest> {
        self.store
            .loan_request(id)
            .await?
            .ok_or_else(|| DomainError::not_found("Loan request", id))
    }

    pub async fn loan_offer(&self, id: Uuid) -> DomainResult<LoanOffer> {
        self.store
            .loan_offer(id)
            .await?
            .ok_or_else(|| DomainError::not_found("Loan offer", id))
    }

    /// Renter asks to borrow against the deposit of an active rental
    pub async fn create_loan_request(
        &self,
        requester_id: Uuid,
        body: CreateLoanRequestBody,
    ) -> DomainResult<LoanRequest> {
        if body.amount <= Decimal::ZERO {
            return Err(DomainError::validation("Amount must be positive"));
        }
        if body.duration < 1 {
            return Err(DomainError::validation("Duration must be at least 1 month"));
        }
        if body.interest_rate < Decimal::ONE {
            return Err(DomainError::validation("Interest rate must be at least 1%"));
        }

        let rental = self
            .store
            .rental_agreement(body.rental_agreement_id)
            .await?
            .ok_or_else(|| DomainError::not_found("Rental agreement", body.rental_agreement_id))?;
        if rental.renter_id != requester_id || rental.status != RentalStatus::Active {
            return Err(DomainError::unauthorized(
                "Only the renter of an active rental agreement may request a loan",
            ));
        }

        let available = self.store.collateral_usage(rental.id).await?.available();
        if body.amount > available {
            return Err(DomainError::Capacity(format!(
                "Requested {} exceeds available collateral {}",
                body.amount, available
            )));
        }

        let now = Utc::now();
        let request = LoanRequest {
            id: Uuid::new_v4(),
            rental_agreement_id: rental.id,
            requester_id,
            amount: body.amount,
            duration: body.duration,
            interest_rate: body.interest_rate,
            status: RequestStatus::Open,
            created_at: now,
            updated_at: now,
        };
        // The store re-checks status and capacity inside its transaction
        let request = self.store.insert_loan_request(&request).await?;

        tracing::info!(
            request_id = %request.id,
            agreement_id = %rental.id,
            amount = %request.amount,
            "Loan request created"
        );
        Ok(request)
    }

    /// Lender offers to fund an open request in full
    pub async fn create_loan_offer(
        &self,
        lender_id: Uuid,
        loan_request_id: Uuid,
        body: CreateLoanOfferBody,
    ) -> DomainResult<LoanOffer> {
        let request = self.loan_request(loan_request_id).await?;
        if request.status != RequestStatus::Open {
            return Err(DomainError::state(format!(
                "Loan request is {:?}; offers are closed",
                request.status
            )));
        }
        if request.requester_id == lender_id {
            return Err(DomainError::unauthorized("Borrowers cannot fund their own request"));
        }
        if body.amount != request.amount || body.duration != request.duration {
            return Err(DomainError::validation(
                "Offer amount and duration must match the request",
            ));
        }
        if body.interest_rate < Decimal::ZERO {
            return Err(DomainError::validation("Interest rate cannot be negative"));
        }
        if body.grace_months < 0 {
            return Err(DomainError::validation("Grace months cannot be negative"));
        }

        let now = Utc::now();
        let offer = LoanOffer {
            id: Uuid::new_v4(),
            loan_request_id,
            lender_id,
            interest_rate: body.interest_rate,
            duration: body.duration,
            amount: body.amount,
            grace_months: body.grace_months,
            status: OfferStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        let offer = self.store.insert_loan_offer(&offer).await?;

        tracing::info!(offer_id = %offer.id, request_id = %loan_request_id, "Loan offer created");
        Ok(offer)
    }

    /// Requester accepts one offer; every other pending offer is rejected
    /// in the same transaction
    pub async fn accept_offer(&self, offer_id: Uuid, acting_party: Uuid) -> DomainResult<AcceptedOffer> {
        let offer = self.loan_offer(offer_id).await?;
        let request = self.loan_request(offer.loan_request_id).await?;
        if request.requester_id != acting_party {
            return Err(DomainError::unauthorized("Only the requester may accept an offer"));
        }
        if offer.status != OfferStatus::Pending {
            return Err(DomainError::state(format!("Offer is {:?}", offer.status)));
        }
        if request.status != RequestStatus::Open {
            return Err(DomainError::state(format!("Loan request is {:?}", request.status)));
        }
        let rental = self
            .store
            .rental_agreement(request.rental_agreement_id)
            .await?
            .ok_or_else(|| DomainError::not_found("Rental agreement", request.rental_agreement_id))?;
        if rental.status != RentalStatus::Active {
            return Err(DomainError::state("Rental agreement is not active"));
        }

        let accepted = self.store.accept_offer(offer_id).await?;

        tracing::info!(
            offer_id = %offer_id,
            request_id = %request.id,
            rejected = accepted.rejected_offer_ids.len(),
            "Loan offer accepted"
        );
        Ok(accepted)
    }

    pub async fn withdraw_offer(&self, offer_id: Uuid, acting_party: Uuid) -> DomainResult<LoanOffer> {
        let offer = self.loan_offer(offer_id).await?;
        if offer.lender_id != acting_party {
            return Err(DomainError::unauthorized("Only the lender may withdraw an offer"));
        }
        if matches!(offer.status, OfferStatus::Accepted | OfferStatus::Withdrawn) {
            return Err(DomainError::state(format!("Offer is already {:?}", offer.status)));
        }

        let offer = self
            .store
            .update_offer_status(
                offer_id,
                &[OfferStatus::Pending, OfferStatus::Rejected],
                OfferStatus::Withdrawn,
            )
            .await?;
        tracing::info!(offer_id = %offer_id, "Loan offer withdrawn");
        Ok(offer)
    }

    pub async fn cancel_loan_request(
        &self,
        loan_request_id: Uuid,
        acting_party: Uuid,
    ) -> DomainResult<LoanRequest> {
        let request = self.loan_request(loan_request_id).await?;
        if request.requester_id != acting_party {
            return Err(DomainError::unauthorized("Only the requester may cancel a request"));
        }
        if request.status != RequestStatus::Open {
            return Err(DomainError::state(format!("Loan request is {:?}", request.status)));
        }

        let request = self.store.cancel_loan_request(loan_request_id).await?;
        tracing::info!(request_id = %loan_request_id, "Loan request cancelled");
        Ok(request)
    }

    pub async fn list_offers(&self, loan_request_id: Uuid) -> DomainResult<Vec<LoanOffer>> {
        self.loan_request(loan_request_id).await?;
        self.store.loan_offers_for_request(loan_request_id).await
    }

    /// Record the escrow contract deployed for an accepted offer
    pub async fn register_loan_agreement(
        &self,
        offer_id: Uuid,
        contract_address: &str,
        acting_party: Uuid,
    ) -> DomainResult<LoanAgreement> {
        if contract_address.trim().is_empty() {
            return Err(DomainError::validation("Contract address is required"));
        }
        let offer = self.loan_offer(offer_id).await?;
        let request = self.loan_request(offer.loan_request_id).await?;
        if acting_party != offer.lender_id && acting_party != request.requester_id {
            return Err(DomainError::unauthorized(
                "Only the lender or borrower may register the agreement",
            ));
        }
        if offer.status != OfferStatus::Accepted {
            return Err(DomainError::state(format!("Offer is {:?}", offer.status)));
        }

        let now = Utc::now();
        let agreement = LoanAgreement {
            id: Uuid::new_v4(),
            contract_address: contract_address.to_string(),
            loan_request_id: request.id,
            loan_offer_id: offer.id,
            rental_agreement_id: request.rental_agreement_id,
            borrower_id: request.requester_id,
            lender_id: offer.lender_id,
            amount: offer.amount,
            interest_rate: offer.interest_rate,
            duration: offer.duration,
            grace_months: offer.grace_months,
            status: LoanStatus::Initialized,
            start_date: None,
            created_at: now,
            updated_at: now,
        };
        let agreement = self.store.insert_loan_agreement(&agreement).await?;

        tracing::info!(
            loan_id = %agreement.id,
            offer_id = %offer_id,
            contract = %agreement.contract_address,
            "Loan agreement registered"
        );
        Ok(agreement)
    }
}
