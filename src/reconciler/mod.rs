//! Blockchain event reconciler
//!
//! Keeps the relational store in step with the escrow contracts. Each
//! tracked contract gets its own listener task; events are applied through
//! the same idempotent writes the API paths use, so re-delivery is a no-op.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use crate::db::AgreementStore;
use crate::error::{DomainError, DomainResult};
use crate::ledger::{ContractEvent, ContractStatus, Ledger, LedgerEvent};
use crate::loan::{LoanService, LoanStatus};
use crate::rental::{RentalService, RentalStatus};

mod handlers;

/// Parked events per contract awaiting a retry
const MAX_DEFERRED: usize = 64;

/// Result of applying one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    /// Already reflected in the store
    Duplicate,
    /// Not actionable yet (unresolved wallet, unknown contract)
    Skipped(String),
    /// Precondition not met, possibly because of reordering; retried later
    Deferred(String),
    /// Event name this engine does not act on
    Ignored,
    Failed(String),
}

/// Corrections applied by a sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub checked: usize,
    pub corrected: usize,
}

pub struct EventReconciler {
    store: Arc<dyn AgreementStore>,
    ledger: Ledger,
    rentals: RentalService,
    loans: LoanService,
    factory_address: Option<String>,
    listeners: Mutex<HashSet<String>>,
    discovered_tx: mpsc::UnboundedSender<String>,
    discovered_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl EventReconciler {
    pub fn new(
        store: Arc<dyn AgreementStore>,
        ledger: Ledger,
        rentals: RentalService,
        loans: LoanService,
        factory_address: Option<String>,
    ) -> Self {
        let (discovered_tx, discovered_rx) = mpsc::unbounded_channel();
        Self {
            store,
            ledger,
            rentals,
            loans,
            factory_address,
            listeners: Mutex::new(HashSet::new()),
            discovered_tx,
            discovered_rx: Mutex::new(Some(discovered_rx)),
        }
    }

    /// Attach listeners to every known contract plus the factory.
    /// Returns the number of listeners started.
    pub async fn start(self: &Arc<Self>) -> DomainResult<usize> {
        tracing::info!("Starting event reconciler...");

        // Contracts announced by creation events are attached from here
        if let Some(mut discovered) = self.discovered_rx.lock().await.take() {
            let reconciler = Arc::clone(self);
            tokio::spawn(async move {
                while let Some(address) = discovered.recv().await {
                    if let Err(e) = reconciler.track(&address).await {
                        tracing::error!(contract = %address, "Failed to attach listener: {}", e);
                    }
                }
            });
        }

        let mut addresses: Vec<String> = self
            .store
            .tracked_contracts()
            .await?
            .into_iter()
            .map(|c| c.address)
            .collect();
        if let Some(factory) = &self.factory_address {
            addresses.push(factory.clone());
        }

        let mut started = 0;
        for address in addresses {
            match self.track(&address).await {
                Ok(true) => started += 1,
                Ok(false) => {}
                Err(e) => tracing::error!(contract = %address, "Failed to attach listener: {}", e),
            }
        }

        tracing::info!("Event reconciler listening to {} contracts", started);
        Ok(started)
    }

    /// Start listening to a contract; false when already listening
    pub async fn track(self: &Arc<Self>, contract_address: &str) -> DomainResult<bool> {
        {
            let mut listeners = self.listeners.lock().await;
            if !listeners.insert(contract_address.to_string()) {
                return Ok(false);
            }
        }

        let subscribed = async {
            let cursor = self.store.ledger_cursor(contract_address).await?;
            self.ledger.subscribe(contract_address, cursor).await
        }
        .await;

        let rx = match subscribed {
            Ok(rx) => rx,
            Err(e) => {
                self.listeners.lock().await.remove(contract_address);
                return Err(e);
            }
        };

        let reconciler = Arc::clone(self);
        let address = contract_address.to_string();
        tokio::spawn(async move { reconciler.listen(address, rx).await });

        tracing::debug!(contract = %contract_address, "Listener attached");
        Ok(true)
    }

    pub async fn is_tracking(&self, contract_address: &str) -> bool {
        self.listeners.lock().await.contains(contract_address)
    }

    /// Queue a newly created contract for tracking
    fn discover(&self, contract_address: &str) {
        if self.discovered_tx.send(contract_address.to_string()).is_err() {
            tracing::error!(contract = %contract_address, "Discovery channel closed");
        }
    }

    async fn listen(self: Arc<Self>, contract_address: String, mut rx: mpsc::Receiver<LedgerEvent>) {
        let mut deferred: VecDeque<LedgerEvent> = VecDeque::new();

        while let Some(event) = rx.recv().await {
            match self.process(&event).await {
                Outcome::Applied => self.retry_deferred(&mut deferred).await,
                Outcome::Deferred(reason) => {
                    tracing::info!(
                        contract = %contract_address,
                        event = %event.name,
                        %reason,
                        "Deferring event"
                    );
                    if deferred.len() >= MAX_DEFERRED {
                        if let Some(dropped) = deferred.pop_front() {
                            tracing::error!(
                                contract = %contract_address,
                                event = %dropped.name,
                                tx = %dropped.tx_reference,
                                "Deferred queue full; dropping oldest event"
                            );
                        }
                    }
                    deferred.push_back(event.clone());
                }
                _ => {}
            }

            // Hold the cursor back while events are parked so a restart
            // re-delivers them
            if deferred.is_empty() {
                if let Err(e) = self
                    .store
                    .save_ledger_cursor(&contract_address, &event.cursor)
                    .await
                {
                    tracing::error!(contract = %contract_address, "Failed to save cursor: {}", e);
                }
            }
        }

        self.listeners.lock().await.remove(&contract_address);
        tracing::info!(contract = %contract_address, "Event stream closed");
    }

    /// Re-apply parked events until a full pass makes no progress
    async fn retry_deferred(&self, deferred: &mut VecDeque<LedgerEvent>) {
        loop {
            let mut progressed = false;
            let mut still_parked = VecDeque::with_capacity(deferred.len());
            while let Some(event) = deferred.pop_front() {
                match self.process(&event).await {
                    Outcome::Deferred(_) => still_parked.push_back(event),
                    _ => progressed = true,
                }
            }
            *deferred = still_parked;
            if !progressed || deferred.is_empty() {
                break;
            }
        }
    }

    /// Apply one event. Never fails: every error is classified and logged.
    pub async fn process(&self, event: &LedgerEvent) -> Outcome {
        let parsed = match ContractEvent::parse(event) {
            Ok(Some(parsed)) => parsed,
            Ok(None) => return Outcome::Ignored,
            Err(e) => {
                tracing::error!(
                    contract = %event.contract_address,
                    event = %event.name,
                    "Malformed event: {}",
                    e
                );
                return Outcome::Failed(e.to_string());
            }
        };

        let outcome = match self.apply(event, parsed).await {
            Ok(outcome) => outcome,
            Err(DomainError::Conflict(_)) => Outcome::Duplicate,
            Err(DomainError::State(reason)) => Outcome::Deferred(reason),
            Err(e) => Outcome::Failed(e.to_string()),
        };

        match &outcome {
            Outcome::Applied => tracing::info!(
                contract = %event.contract_address,
                event = %event.name,
                tx = %event.tx_reference,
                "Event applied"
            ),
            Outcome::Duplicate => tracing::debug!(
                contract = %event.contract_address,
                event = %event.name,
                tx = %event.tx_reference,
                "Event already applied"
            ),
            Outcome::Skipped(reason) => tracing::warn!(
                contract = %event.contract_address,
                event = %event.name,
                %reason,
                "Event skipped"
            ),
            Outcome::Failed(reason) => tracing::error!(
                contract = %event.contract_address,
                event = %event.name,
                tx = %event.tx_reference,
                %reason,
                "Event failed"
            ),
            Outcome::Deferred(_) | Outcome::Ignored => {}
        }
        outcome
    }

    /// Compare stored statuses with on-chain state and apply terminal
    /// transitions the event stream missed
    pub async fn sweep(&self) -> DomainResult<SweepReport> {
        let mut report = SweepReport::default();

        let rentals = self
            .store
            .rental_agreements_with_status(&[RentalStatus::Initialized, RentalStatus::Active])
            .await?;
        for rental in rentals {
            report.checked += 1;
            let state = match self.ledger.agreement_state(&rental.contract_address).await {
                Ok(state) => state,
                Err(e) => {
                    tracing::warn!(contract = %rental.contract_address, "State check failed: {}", e);
                    continue;
                }
            };
            if state.status == ContractStatus::Closed {
                match self.rentals.apply_close(&rental).await {
                    Ok(_) => report.corrected += 1,
                    Err(e) => tracing::warn!(agreement_id = %rental.id, "Sweep close failed: {}", e),
                }
            }
        }

        let loans = self
            .store
            .loan_agreements_with_status(&LoanStatus::REPAYABLE)
            .await?;
        for loan in loans {
            report.checked += 1;
            let state = match self.ledger.agreement_state(&loan.contract_address).await {
                Ok(state) => state,
                Err(e) => {
                    tracing::warn!(contract = %loan.contract_address, "State check failed: {}", e);
                    continue;
                }
            };
            match state.status {
                ContractStatus::Defaulted => match self.loans.apply_default(&loan).await {
                    Ok(_) => report.corrected += 1,
                    Err(e) => tracing::warn!(loan_id = %loan.id, "Sweep default failed: {}", e),
                },
                ContractStatus::Completed => tracing::warn!(
                    loan_id = %loan.id,
                    "Contract completed but repayments are still missing"
                ),
                _ => {}
            }
        }

        if report.corrected > 0 {
            tracing::info!(
                "Reconciliation sweep corrected {} of {} agreements",
                report.corrected,
                report.checked
            );
        }
        Ok(report)
    }
}
