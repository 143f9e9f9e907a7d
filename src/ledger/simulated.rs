//! In-process ledger used in simulated mode and by the test suites

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use super::{AgreementState, ContractStatus, LedgerClient, LedgerEvent, LedgerTransaction};
use crate::error::{DomainError, DomainResult};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Default)]
struct SimulatedState {
    states: HashMap<String, ContractStatus>,
    history: HashMap<String, Vec<LedgerEvent>>,
    subscribers: HashMap<String, Vec<mpsc::Sender<LedgerEvent>>>,
    submitted: Vec<LedgerTransaction>,
    sequence: u64,
    latency: Option<Duration>,
}

/// Ledger that finalizes every transaction immediately and delivers
/// whatever events are pushed into it with `emit`
#[derive(Default)]
pub struct SimulatedLedgerClient {
    state: Mutex<SimulatedState>,
}

impl SimulatedLedgerClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call, to exercise caller timeouts
    pub async fn set_latency(&self, latency: Option<Duration>) {
        self.state.lock().await.latency = latency;
    }

    pub async fn set_state(&self, contract_address: &str, status: ContractStatus) {
        self.state
            .lock()
            .await
            .states
            .insert(contract_address.to_string(), status);
    }

    pub async fn submitted(&self) -> Vec<LedgerTransaction> {
        self.state.lock().await.submitted.clone()
    }

    /// Publish an event to the contract's subscribers. An empty cursor is
    /// replaced by the next sequence number; the stored event is returned.
    pub async fn emit(&self, mut event: LedgerEvent) -> LedgerEvent {
        let mut state = self.state.lock().await;
        if event.cursor.is_empty() {
            state.sequence += 1;
            event.cursor = format!("{:012}", state.sequence);
        }
        state
            .history
            .entry(event.contract_address.clone())
            .or_default()
            .push(event.clone());

        let senders = match state.subscribers.get_mut(&event.contract_address) {
            Some(senders) => {
                senders.retain(|tx| !tx.is_closed());
                senders.clone()
            }
            None => Vec::new(),
        };
        drop(state);

        for tx in senders {
            if tx.send(event.clone()).await.is_err() {
                tracing::debug!(contract = %event.contract_address, "Subscriber dropped");
            }
        }
        event
    }

    async fn delay(&self) {
        let latency = self.state.lock().await.latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl LedgerClient for SimulatedLedgerClient {
    async fn get_agreement_state(&self, contract_address: &str) -> DomainResult<AgreementState> {
        self.delay().await;
        let state = self.state.lock().await;
        let status = state.states.get(contract_address).copied().ok_or_else(|| {
            DomainError::ExternalLedger {
                message: format!("contract {} not found on ledger", contract_address),
                retryable: false,
            }
        })?;
        Ok(AgreementState {
            contract_address: contract_address.to_string(),
            status,
        })
    }

    async fn submit_transaction(&self, tx: LedgerTransaction) -> DomainResult<String> {
        self.delay().await;
        let mut state = self.state.lock().await;
        state.submitted.push(tx);
        Ok(format!("sim_{}", Uuid::new_v4().simple()))
    }

    async fn subscribe(
        &self,
        contract_address: &str,
        cursor: Option<String>,
    ) -> DomainResult<mpsc::Receiver<LedgerEvent>> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let mut state = self.state.lock().await;

        // Replay what the subscriber has not seen yet
        let backlog: Vec<LedgerEvent> = state
            .history
            .get(contract_address)
            .map(|events| {
                events
                    .iter()
                    .filter(|e| cursor.as_ref().map_or(true, |c| e.cursor > *c))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        for event in backlog {
            if tx.try_send(event).is_err() {
                return Err(DomainError::ExternalLedger {
                    message: format!("backlog for {} exceeds channel capacity", contract_address),
                    retryable: true,
                });
            }
        }

        state
            .subscribers
            .entry(contract_address.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(name: &str) -> LedgerEvent {
        LedgerEvent {
            contract_address: "CSIM".to_string(),
            name: name.to_string(),
            tx_reference: format!("tx-{}", name),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_subscribe_replays_after_cursor() {
        let ledger = SimulatedLedgerClient::new();
        let first = ledger.emit(event("dep_paid")).await;
        ledger.emit(event("rent_paid")).await;

        let mut rx = ledger.subscribe("CSIM", Some(first.cursor)).await.unwrap();
        let replayed = rx.recv().await.unwrap();
        assert_eq!(replayed.name, "rent_paid");

        ledger.emit(event("closed")).await;
        assert_eq!(rx.recv().await.unwrap().name, "closed");
    }

    #[tokio::test]
    async fn test_submit_returns_reference() {
        let ledger = SimulatedLedgerClient::new();
        let tx = LedgerTransaction::new("CSIM", super::super::LedgerAction::PayDeposit);
        let reference = ledger.submit_transaction(tx).await.unwrap();
        assert!(reference.starts_with("sim_"));
        assert_eq!(ledger.submitted().await.len(), 1);
    }
}
