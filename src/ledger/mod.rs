//! Ledger client adapter
//!
//! Boundary to the distributed ledger that holds custody of funds. The rest
//! of the crate talks to it through `LedgerClient` and always via `Ledger`,
//! which puts a timeout on every call.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::{DomainError, DomainResult};

pub mod event;
pub mod simulated;
pub mod soroban;

pub use event::ContractEvent;
pub use simulated::SimulatedLedgerClient;
pub use soroban::SorobanRpcClient;

/// Status reported by an escrow contract
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContractStatus {
    Initialized,
    Ready,
    Active,
    Paid,
    Closed,
    Completed,
    Defaulted,
}

impl ContractStatus {
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol.to_ascii_lowercase().as_str() {
            "initialized" | "init" => Some(ContractStatus::Initialized),
            "ready" => Some(ContractStatus::Ready),
            "active" => Some(ContractStatus::Active),
            "paid" => Some(ContractStatus::Paid),
            "closed" => Some(ContractStatus::Closed),
            "completed" => Some(ContractStatus::Completed),
            "defaulted" => Some(ContractStatus::Defaulted),
            _ => None,
        }
    }
}

/// Snapshot of a contract's on-chain state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct AgreementState {
    pub contract_address: String,
    pub status: ContractStatus,
}

/// Contract call carried by a submitted transaction
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum LedgerAction {
    PayDeposit,
    PayRent { month: i32 },
    SkipRent { month: i32 },
    Extend { additional_months: i32 },
    Close,
    Fund,
    Disburse,
    Repay { month: i32 },
    Default,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct LedgerTransaction {
    pub contract_address: String,
    pub action: LedgerAction,
    /// Client-signed transaction envelope (base64 XDR)
    pub signed_envelope: Option<String>,
}

impl LedgerTransaction {
    pub fn new(contract_address: impl Into<String>, action: LedgerAction) -> Self {
        Self {
            contract_address: contract_address.into(),
            action,
            signed_envelope: None,
        }
    }

    pub fn signed(mut self, envelope: Option<String>) -> Self {
        self.signed_envelope = envelope;
        self
    }
}

/// Raw event as delivered by a contract, before interpretation
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct LedgerEvent {
    pub contract_address: String,
    pub name: String,
    pub party_wallets: Vec<String>,
    pub amounts: Vec<Decimal>,
    pub month: Option<i32>,
    pub duration: Option<i32>,
    /// Contract deployed by a factory creation event
    pub created_contract: Option<String>,
    pub tx_reference: String,
    /// Resume position for this contract's stream
    pub cursor: String,
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn get_agreement_state(&self, contract_address: &str) -> DomainResult<AgreementState>;

    /// Submit a transaction and return its reference once it is final.
    /// A transaction the ledger rejected is a non-retryable error.
    async fn submit_transaction(&self, tx: LedgerTransaction) -> DomainResult<String>;

    /// Event stream for one contract, resuming after `cursor` when given.
    /// Delivery is at-least-once; the stream ends when the receiver drops.
    async fn subscribe(
        &self,
        contract_address: &str,
        cursor: Option<String>,
    ) -> DomainResult<mpsc::Receiver<LedgerEvent>>;
}

/// Run a ledger call under a deadline; elapsed deadlines are retryable
pub async fn with_timeout<T, F>(limit: Duration, operation: &str, call: F) -> DomainResult<T>
where
    F: Future<Output = DomainResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(operation, timeout_ms = limit.as_millis() as u64, "Ledger call timed out");
            Err(DomainError::ledger_timeout(operation))
        }
    }
}

/// Ledger client plus the deadline applied to each call
#[derive(Clone)]
pub struct Ledger {
    client: Arc<dyn LedgerClient>,
    timeout: Duration,
}

impl Ledger {
    pub fn new(client: Arc<dyn LedgerClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub async fn submit(&self, tx: LedgerTransaction) -> DomainResult<String> {
        let contract = tx.contract_address.clone();
        let action = tx.action;
        let reference = with_timeout(
            self.timeout,
            "submit_transaction",
            self.client.submit_transaction(tx),
        )
        .await?;
        tracing::debug!(contract = %contract, ?action, tx = %reference, "Ledger transaction submitted");
        Ok(reference)
    }

    pub async fn agreement_state(&self, contract_address: &str) -> DomainResult<AgreementState> {
        with_timeout(
            self.timeout,
            "get_agreement_state",
            self.client.get_agreement_state(contract_address),
        )
        .await
    }

    pub async fn subscribe(
        &self,
        contract_address: &str,
        cursor: Option<String>,
    ) -> DomainResult<mpsc::Receiver<LedgerEvent>> {
        with_timeout(
            self.timeout,
            "subscribe",
            self.client.subscribe(contract_address, cursor),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_timeout_maps_to_retryable() {
        let result: DomainResult<()> = with_timeout(Duration::from_millis(10), "slow", async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        })
        .await;

        let err = result.unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err, DomainError::ExternalLedger { .. }));
    }

    #[tokio::test]
    async fn test_with_timeout_passes_result_through() {
        let result = with_timeout(Duration::from_secs(1), "fast", async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[test]
    fn test_contract_status_from_symbol() {
        assert_eq!(ContractStatus::from_symbol("ACTIVE"), Some(ContractStatus::Active));
        assert_eq!(ContractStatus::from_symbol("defaulted"), Some(ContractStatus::Defaulted));
        assert_eq!(ContractStatus::from_symbol("unknown"), None);
    }
}
