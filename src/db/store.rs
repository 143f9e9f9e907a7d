//! Storage seam shared by the services and the reconciler

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainResult;
use crate::loan::{LoanAgreement, LoanStatus};
use crate::matching::{AcceptedOffer, LoanOffer, LoanRequest, OfferStatus, RequestStatus};
use crate::payment::{NewPayment, Payment};
use crate::rental::{CollateralUsage, RentalAgreement, RentalStatus};

/// Which kind of escrow contract an address belongs to
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ContractKind {
    Rental,
    Loan,
}

/// A contract address the reconciler listens to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackedContract {
    pub address: String,
    pub kind: ContractKind,
}

/// Extra write-time checks applied to the payment of an `AgreementWrite`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PaymentGuard {
    /// Only the idempotency key
    #[default]
    KeyOnly,
    /// Month must be exactly one past the highest recorded month of the same type
    Sequential,
    /// Month must not already hold a RENT or RENT_SKIPPED row; when a cap is
    /// given, fewer than `skip_cap` RENT_SKIPPED rows may exist
    OpenRentMonth { skip_cap: Option<i64> },
}

/// Compare-and-set status change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Rental {
        id: Uuid,
        from: Vec<RentalStatus>,
        to: RentalStatus,
    },
    /// Moving to ACTIVE also stamps the loan's start date
    Loan {
        id: Uuid,
        from: Vec<LoanStatus>,
        to: LoanStatus,
    },
    Request {
        id: Uuid,
        from: Vec<RequestStatus>,
        to: RequestStatus,
    },
}

/// One all-or-nothing unit of work: an optional payment plus status changes
#[derive(Debug, Clone, Default)]
pub struct AgreementWrite {
    pub payment: Option<NewPayment>,
    pub guard: PaymentGuard,
    pub transitions: Vec<Transition>,
}

impl AgreementWrite {
    pub fn payment(payment: NewPayment) -> Self {
        Self {
            payment: Some(payment),
            ..Default::default()
        }
    }

    pub fn guarded(mut self, guard: PaymentGuard) -> Self {
        self.guard = guard;
        self
    }

    pub fn transition(mut self, transition: Transition) -> Self {
        self.transitions.push(transition);
        self
    }
}

/// Persistence for agreements, negotiation records and the payment ledger.
///
/// `commit` is the only path that appends payments. It enforces the
/// idempotency key and the compare-and-set transitions inside one
/// transaction: a key collision returns `Conflict`, a failed transition
/// returns `State`, and in both cases nothing is written.
#[async_trait]
pub trait AgreementStore: Send + Sync {
    async fn party_id_by_wallet(&self, wallet_address: &str) -> DomainResult<Option<Uuid>>;

    async fn insert_rental_agreement(&self, agreement: &RentalAgreement)
        -> DomainResult<RentalAgreement>;
    async fn rental_agreement(&self, id: Uuid) -> DomainResult<Option<RentalAgreement>>;
    async fn rental_agreement_by_address(
        &self,
        contract_address: &str,
    ) -> DomainResult<Option<RentalAgreement>>;
    async fn rental_agreements_with_status(
        &self,
        statuses: &[RentalStatus],
    ) -> DomainResult<Vec<RentalAgreement>>;
    /// Compare-and-set on the current duration
    async fn update_rental_terms(
        &self,
        id: Uuid,
        expected_duration: i32,
        duration: i32,
        grace_period: i32,
    ) -> DomainResult<RentalAgreement>;
    async fn collateral_usage(&self, rental_agreement_id: Uuid) -> DomainResult<CollateralUsage>;

    /// Inserts the request only if the rental is ACTIVE and its available
    /// collateral still covers the amount
    async fn insert_loan_request(&self, request: &LoanRequest) -> DomainResult<LoanRequest>;
    async fn loan_request(&self, id: Uuid) -> DomainResult<Option<LoanRequest>>;
    /// OPEN -> CANCELLED, rejecting every PENDING offer
    async fn cancel_loan_request(&self, id: Uuid) -> DomainResult<LoanRequest>;

    async fn insert_loan_offer(&self, offer: &LoanOffer) -> DomainResult<LoanOffer>;
    async fn loan_offer(&self, id: Uuid) -> DomainResult<Option<LoanOffer>>;
    async fn loan_offers_for_request(&self, loan_request_id: Uuid) -> DomainResult<Vec<LoanOffer>>;
    async fn update_offer_status(
        &self,
        id: Uuid,
        from: &[OfferStatus],
        to: OfferStatus,
    ) -> DomainResult<LoanOffer>;
    /// Offer PENDING -> ACCEPTED, request OPEN -> MATCHED, sibling PENDING
    /// offers -> REJECTED, all or nothing
    async fn accept_offer(&self, offer_id: Uuid) -> DomainResult<AcceptedOffer>;

    /// `Conflict` when the offer or contract address already has an agreement
    async fn insert_loan_agreement(&self, agreement: &LoanAgreement) -> DomainResult<LoanAgreement>;
    async fn loan_agreement(&self, id: Uuid) -> DomainResult<Option<LoanAgreement>>;
    async fn loan_agreement_by_address(
        &self,
        contract_address: &str,
    ) -> DomainResult<Option<LoanAgreement>>;
    async fn loan_agreements_with_status(
        &self,
        statuses: &[LoanStatus],
    ) -> DomainResult<Vec<LoanAgreement>>;
    async fn open_loans_for_rental(&self, rental_agreement_id: Uuid) -> DomainResult<i64>;

    async fn commit(&self, write: AgreementWrite) -> DomainResult<Option<Payment>>;
    async fn payments_for(&self, agreement_id: Uuid) -> DomainResult<Vec<Payment>>;

    async fn tracked_contracts(&self) -> DomainResult<Vec<TrackedContract>>;
    async fn ledger_cursor(&self, contract_address: &str) -> DomainResult<Option<String>>;
    async fn save_ledger_cursor(&self, contract_address: &str, cursor: &str) -> DomainResult<()>;
}

/// Sum helper used by both store implementations
pub(crate) fn sum_amounts<'a>(amounts: impl Iterator<Item = &'a Decimal>) -> Decimal {
    amounts.fold(Decimal::ZERO, |acc, amount| acc + *amount)
}
