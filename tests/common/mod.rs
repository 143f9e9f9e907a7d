//! Shared fixtures: in-memory store plus simulated ledger

#![allow(dead_code)]

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use rentvault_server::db::{AgreementStore, MemoryStore};
use rentvault_server::error::DomainResult;
use rentvault_server::ledger::{
    AgreementState, Ledger, LedgerClient, LedgerEvent, LedgerTransaction, SimulatedLedgerClient,
};
use rentvault_server::loan::LoanAgreement;
use rentvault_server::matching::{CreateLoanOfferBody, CreateLoanRequestBody, LoanOffer, LoanRequest};
use rentvault_server::reconciler::{EventReconciler, Outcome};
use rentvault_server::rental::{CreateRentalAgreementRequest, RentalAgreement};
use rentvault_server::state::AppState;

pub const LANDLORD: &str = "GLANDLORD";
pub const RENTER: &str = "GRENTER";
pub const LENDER: &str = "GLENDER";
pub const OTHER_LENDER: &str = "GLENDER2";
pub const FACTORY: &str = "CFACTORY";

/// Simulated ledger whose next submission can have its own event applied
/// by the reconciler before `submit_transaction` returns, the way a fast
/// event stream overtakes the API write
pub struct EagerLedger {
    inner: Arc<SimulatedLedgerClient>,
    reconciler: OnceLock<Arc<EventReconciler>>,
    next_event: Mutex<Option<LedgerEvent>>,
}

impl EagerLedger {
    fn new(inner: Arc<SimulatedLedgerClient>) -> Self {
        Self {
            inner,
            reconciler: OnceLock::new(),
            next_event: Mutex::new(None),
        }
    }

    /// Apply `event`, stamped with the returned reference, during the next submission
    pub async fn apply_on_next_submit(&self, event: LedgerEvent) {
        *self.next_event.lock().await = Some(event);
    }
}

#[async_trait]
impl LedgerClient for EagerLedger {
    async fn get_agreement_state(&self, contract_address: &str) -> DomainResult<AgreementState> {
        self.inner.get_agreement_state(contract_address).await
    }

    async fn submit_transaction(&self, tx: LedgerTransaction) -> DomainResult<String> {
        let reference = self.inner.submit_transaction(tx).await?;
        let pending = self.next_event.lock().await.take();
        if let (Some(mut event), Some(reconciler)) = (pending, self.reconciler.get()) {
            event.tx_reference = reference.clone();
            assert_eq!(reconciler.process(&event).await, Outcome::Applied);
        }
        Ok(reference)
    }

    async fn subscribe(
        &self,
        contract_address: &str,
        cursor: Option<String>,
    ) -> DomainResult<mpsc::Receiver<LedgerEvent>> {
        self.inner.subscribe(contract_address, cursor).await
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub client: Arc<SimulatedLedgerClient>,
    pub eager: Arc<EagerLedger>,
    pub state: AppState,
    pub landlord: Uuid,
    pub renter: Uuid,
    pub lender: Uuid,
    pub other_lender: Uuid,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_ledger_timeout(Duration::from_secs(2)).await
    }

    pub async fn with_ledger_timeout(timeout: Duration) -> Self {
        let store = Arc::new(MemoryStore::new());
        let client = Arc::new(SimulatedLedgerClient::new());

        let landlord = store.register_party(LANDLORD).await;
        let renter = store.register_party(RENTER).await;
        let lender = store.register_party(LENDER).await;
        let other_lender = store.register_party(OTHER_LENDER).await;

        let eager = Arc::new(EagerLedger::new(client.clone()));
        let dyn_store: Arc<dyn AgreementStore> = store.clone();
        let dyn_client: Arc<dyn LedgerClient> = eager.clone();
        let state = AppState::assemble(
            dyn_store,
            Ledger::new(dyn_client, timeout),
            Some(FACTORY.to_string()),
        );
        let _ = eager.reconciler.set(state.reconciler.clone());

        Self {
            store,
            client,
            eager,
            state,
            landlord,
            renter,
            lender,
            other_lender,
        }
    }

    /// 12 months, 3000 deposit, 500 rent, still INITIALIZED
    pub async fn rental(&self, contract: &str) -> RentalAgreement {
        self.state
            .rental_service
            .create_agreement(
                self.landlord,
                CreateRentalAgreementRequest {
                    renter_id: self.renter,
                    name: "Flat 4B".to_string(),
                    contract_address: contract.to_string(),
                    duration: 12,
                    security_deposit: Decimal::from(3000),
                    base_rent: Decimal::from(500),
                    creation_tx: Some(format!("create_{}", contract)),
                },
            )
            .await
            .unwrap()
    }

    pub async fn active_rental(&self, contract: &str) -> RentalAgreement {
        let rental = self.rental(contract).await;
        self.state
            .rental_service
            .pay_deposit(rental.id, self.renter, None)
            .await
            .unwrap()
    }

    /// 1200 for 12 months at 10%: installment 110.00
    pub async fn loan_request(&self, rental: &RentalAgreement, amount: i64) -> LoanRequest {
        self.state
            .matching_service
            .create_loan_request(
                self.renter,
                CreateLoanRequestBody {
                    rental_agreement_id: rental.id,
                    amount: Decimal::from(amount),
                    duration: 12,
                    interest_rate: Decimal::from(10),
                },
            )
            .await
            .unwrap()
    }

    pub async fn offer(&self, request: &LoanRequest, lender: Uuid, grace_months: i32) -> LoanOffer {
        self.state
            .matching_service
            .create_loan_offer(
                lender,
                request.id,
                CreateLoanOfferBody {
                    interest_rate: request.interest_rate,
                    duration: request.duration,
                    amount: request.amount,
                    grace_months,
                },
            )
            .await
            .unwrap()
    }

    /// Rental active, request matched, loan registered but not funded
    pub async fn registered_loan(&self, rental_contract: &str, loan_contract: &str) -> LoanAgreement {
        let rental = self.active_rental(rental_contract).await;
        let request = self.loan_request(&rental, 1200).await;
        let offer = self.offer(&request, self.lender, 0).await;
        self.state
            .matching_service
            .accept_offer(offer.id, self.renter)
            .await
            .unwrap();
        self.state
            .matching_service
            .register_loan_agreement(offer.id, loan_contract, self.lender)
            .await
            .unwrap()
    }

    /// Loan funded and disbursed, ready for repayments
    pub async fn active_loan(&self, rental_contract: &str, loan_contract: &str) -> LoanAgreement {
        let loan = self.registered_loan(rental_contract, loan_contract).await;
        let loans = &self.state.loan_service;
        loans.fund(loan.id, self.lender, None).await.unwrap();
        loans.disburse(loan.id, self.renter, None).await.unwrap()
    }
}

pub fn event(contract: &str, name: &str, tx: &str) -> LedgerEvent {
    LedgerEvent {
        contract_address: contract.to_string(),
        name: name.to_string(),
        tx_reference: tx.to_string(),
        ..Default::default()
    }
}

pub fn installment() -> Decimal {
    Decimal::new(11000, 2)
}

/// Poll `check` until it holds or two seconds pass
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
