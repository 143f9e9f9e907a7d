//! Soroban JSON-RPC ledger client
//!
//! Events are polled with `getEvents` per contract and decoded from XDR.
//! Transactions arrive already signed by the acting party's wallet and are
//! relayed with `sendTransaction`.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;
use std::time::Duration;
use stellar_xdr::next::{
    ContractDataDurability, LedgerEntryData, LedgerKey, LedgerKeyContractData, Limits, ReadXdr,
    ScAddress, ScVal, WriteXdr,
};
use tokio::sync::mpsc;
use tokio::time::sleep;

use super::event::{AGREEMENT_CREATED, EXTENDED, REPAID, RENT_PAID, RENT_SKIPPED};
use super::{AgreementState, ContractStatus, LedgerClient, LedgerEvent, LedgerTransaction};
use crate::error::{DomainError, DomainResult};

/// Stroops per unit for token amounts
const AMOUNT_SCALE: u32 = 7;
const XDR_LIMIT: usize = 32_768;
const CHANNEL_CAPACITY: usize = 256;
/// Delay between `getTransaction` polls while a submission is pending
const FINALITY_POLL: Duration = Duration::from_millis(500);

/// Where a submitted transaction stands according to `getTransaction`
#[derive(Debug, Clone, PartialEq, Eq)]
enum Finality {
    Pending,
    Success,
    Failed(String),
}

fn finality(result: &serde_json::Value) -> Finality {
    match result.get("status").and_then(|s| s.as_str()) {
        Some("SUCCESS") => Finality::Success,
        Some("FAILED") => Finality::Failed(
            result
                .get("resultXdr")
                .and_then(|r| r.as_str())
                .unwrap_or("no result")
                .to_string(),
        ),
        // NOT_FOUND until the transaction is included in a ledger
        _ => Finality::Pending,
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetEventsResponse {
    events: Vec<SorobanEvent>,
    latest_ledger: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(untagged)]
enum EventValue {
    Xdr { xdr: String },
    Raw(String),
}

impl EventValue {
    fn xdr(&self) -> &str {
        match self {
            EventValue::Xdr { xdr } => xdr,
            EventValue::Raw(xdr) => xdr,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
struct SorobanEvent {
    id: String,
    ledger: u64,
    contract_id: String,
    topic: Vec<String>,
    value: EventValue,
    #[serde(default)]
    paging_token: Option<String>,
    #[serde(default)]
    tx_hash: Option<String>,
}

pub struct SorobanRpcClient {
    rpc_url: String,
    client: Client,
    poll_interval: Duration,
}

impl SorobanRpcClient {
    pub fn new(rpc_url: String, poll_interval: Duration) -> Self {
        Self {
            rpc_url,
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| Client::new()),
            poll_interval,
        }
    }

    async fn rpc(&self, method: &str, params: serde_json::Value) -> DomainResult<serde_json::Value> {
        rpc_call(&self.client, &self.rpc_url, method, params).await
    }
}

async fn rpc_call(
    client: &Client,
    rpc_url: &str,
    method: &str,
    params: serde_json::Value,
) -> DomainResult<serde_json::Value> {
    let payload = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": method,
        "params": params,
    });

    let resp = client
        .post(rpc_url)
        .json(&payload)
        .send()
        .await?
        .json::<serde_json::Value>()
        .await?;

    if let Some(err) = resp.get("error") {
        return Err(DomainError::ExternalLedger {
            message: format!("RPC error from {}: {}", method, err),
            retryable: false,
        });
    }
    resp.get("result")
        .cloned()
        .ok_or_else(|| DomainError::ExternalLedger {
            message: format!("no result in {} response", method),
            retryable: true,
        })
}

#[async_trait]
impl LedgerClient for SorobanRpcClient {
    async fn get_agreement_state(&self, contract_address: &str) -> DomainResult<AgreementState> {
        let key = instance_key(contract_address)
            .map_err(|e| DomainError::validation(format!("invalid contract address: {}", e)))?;
        let result = self.rpc("getLedgerEntries", json!({ "keys": [key] })).await?;

        let entry = result
            .get("entries")
            .and_then(|entries| entries.as_array())
            .and_then(|entries| entries.first())
            .and_then(|entry| entry.get("xdr"))
            .and_then(|xdr| xdr.as_str())
            .ok_or_else(|| DomainError::ExternalLedger {
                message: format!("contract {} has no instance entry", contract_address),
                retryable: false,
            })?;

        let status = decode_instance_status(entry).map_err(|e| DomainError::ExternalLedger {
            message: format!("undecodable state for {}: {}", contract_address, e),
            retryable: false,
        })?;

        Ok(AgreementState {
            contract_address: contract_address.to_string(),
            status,
        })
    }

    async fn submit_transaction(&self, tx: LedgerTransaction) -> DomainResult<String> {
        let envelope = tx.signed_envelope.ok_or_else(|| {
            DomainError::validation("a signed transaction envelope is required")
        })?;
        let result = self
            .rpc("sendTransaction", json!({ "transaction": envelope }))
            .await?;

        let status = result.get("status").and_then(|s| s.as_str()).unwrap_or("");
        if status == "ERROR" {
            return Err(DomainError::ExternalLedger {
                message: format!(
                    "transaction rejected for {:?} on {}",
                    tx.action, tx.contract_address
                ),
                retryable: false,
            });
        }
        if status == "TRY_AGAIN_LATER" {
            return Err(DomainError::ExternalLedger {
                message: "ledger asked to retry later".to_string(),
                retryable: true,
            });
        }

        let hash = result
            .get("hash")
            .and_then(|h| h.as_str())
            .map(str::to_string)
            .ok_or_else(|| DomainError::ExternalLedger {
                message: "sendTransaction returned no hash".to_string(),
                retryable: true,
            })?;

        // PENDING only means queued. The caller's deadline bounds this loop;
        // a deadline hit leaves the outcome to the contract's event.
        loop {
            let status = self.rpc("getTransaction", json!({ "hash": hash })).await?;
            match finality(&status) {
                Finality::Success => return Ok(hash),
                Finality::Failed(result_xdr) => {
                    return Err(DomainError::ExternalLedger {
                        message: format!(
                            "transaction {} failed for {:?} on {}: {}",
                            hash, tx.action, tx.contract_address, result_xdr
                        ),
                        retryable: false,
                    })
                }
                Finality::Pending => sleep(FINALITY_POLL).await,
            }
        }
    }

    async fn subscribe(
        &self,
        contract_address: &str,
        cursor: Option<String>,
    ) -> DomainResult<mpsc::Receiver<LedgerEvent>> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let mut poller = EventPoller {
            contract_id: contract_address.to_string(),
            rpc_url: self.rpc_url.clone(),
            client: self.client.clone(),
            cursor: cursor.unwrap_or_default(),
            last_seen_ledger: 0,
            poll_interval: self.poll_interval,
        };
        tokio::spawn(async move { poller.run(tx).await });
        Ok(rx)
    }
}

struct EventPoller {
    contract_id: String,
    rpc_url: String,
    client: Client,
    cursor: String,
    last_seen_ledger: u64,
    poll_interval: Duration,
}

impl EventPoller {
    async fn run(&mut self, tx: mpsc::Sender<LedgerEvent>) {
        tracing::info!(contract = %self.contract_id, "Event poller started");

        loop {
            if tx.is_closed() {
                break;
            }
            if let Err(e) = self.poll_once(&tx).await {
                tracing::error!(contract = %self.contract_id, "Error polling events: {}", e);
                sleep(self.poll_interval * 2).await;
            }
            sleep(self.poll_interval).await;
        }

        tracing::info!(contract = %self.contract_id, "Event poller stopped");
    }

    async fn poll_once(&mut self, tx: &mpsc::Sender<LedgerEvent>) -> Result<()> {
        let response = self.fetch_events().await?;

        // A ledger behind the last one we saw means the network was reset
        if self.last_seen_ledger > 0 && response.latest_ledger < self.last_seen_ledger {
            tracing::warn!(
                contract = %self.contract_id,
                "Ledger went backwards: latest {} < seen {}. Resetting cursor.",
                response.latest_ledger,
                self.last_seen_ledger
            );
            self.cursor.clear();
            self.last_seen_ledger = 0;
            return Ok(());
        }
        self.last_seen_ledger = self.last_seen_ledger.max(response.latest_ledger);

        for raw in &response.events {
            let cursor = raw.paging_token.clone().unwrap_or_else(|| raw.id.clone());
            match decode_event(raw, &cursor) {
                Ok(Some(event)) => {
                    if tx.send(event).await.is_err() {
                        return Ok(());
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::error!(
                    contract = %self.contract_id,
                    event_id = %raw.id,
                    "Undecodable event: {}",
                    e
                ),
            }
            self.cursor = cursor;
        }
        Ok(())
    }

    async fn fetch_events(&self) -> Result<GetEventsResponse> {
        let params = json!({
            "startLedger": if self.cursor.is_empty() { json!(1) } else { serde_json::Value::Null },
            "filters": [
                {
                    "type": "contract",
                    "contractIds": [self.contract_id]
                }
            ],
            "pagination": {
                "cursor": if self.cursor.is_empty() { serde_json::Value::Null } else { json!(self.cursor) },
                "limit": 100
            }
        });

        let result = rpc_call(&self.client, &self.rpc_url, "getEvents", params)
            .await
            .map_err(|e| anyhow!("{}", e))?;
        Ok(serde_json::from_value(result)?)
    }
}

fn decode_event(raw: &SorobanEvent, cursor: &str) -> Result<Option<LedgerEvent>> {
    let topics = decode_topics(&raw.topic)?;
    let name = match topics.first() {
        Some(ScVal::Symbol(s)) => s.to_string(),
        _ => return Ok(None),
    };

    let value_xdr = general_purpose::STANDARD.decode(raw.value.xdr())?;
    let data = ScVal::from_xdr(&value_xdr, Limits::len(XDR_LIMIT))?;
    let args = match &data {
        ScVal::Vec(Some(args)) => args.to_vec(),
        ScVal::Void => Vec::new(),
        other => vec![other.clone()],
    };

    let mut event = LedgerEvent {
        contract_address: raw.contract_id.clone(),
        tx_reference: raw
            .tx_hash
            .clone()
            .unwrap_or_else(|| format!("{}:{}", raw.ledger, raw.id)),
        cursor: cursor.to_string(),
        ..Default::default()
    };

    let mut integers = Vec::new();
    for arg in &args {
        match arg {
            ScVal::Address(_) => event.party_wallets.push(scval_to_address(arg)?),
            ScVal::I128(_) => event.amounts.push(scval_to_amount(arg)?),
            ScVal::U32(_) | ScVal::I32(_) | ScVal::U64(_) | ScVal::I64(_) => {
                integers.push(scval_to_i32(arg)?)
            }
            _ => {}
        }
    }

    match name.as_str() {
        // [contract, landlord, renter, deposit, rent, duration]
        AGREEMENT_CREATED => {
            if event.party_wallets.is_empty() {
                return Err(anyhow!("agr_new without a contract address"));
            }
            event.created_contract = Some(event.party_wallets.remove(0));
            event.duration = integers.first().copied();
        }
        RENT_PAID | RENT_SKIPPED | REPAID => event.month = integers.first().copied(),
        // [new total duration]
        EXTENDED => event.duration = integers.first().copied(),
        _ => {}
    }
    event.name = name;

    Ok(Some(event))
}

fn decode_topics(topics: &[String]) -> Result<Vec<ScVal>> {
    let mut res = Vec::new();
    for t in topics {
        let bytes = general_purpose::STANDARD.decode(t)?;
        res.push(ScVal::from_xdr(&bytes, Limits::len(XDR_LIMIT))?);
    }
    Ok(res)
}

/// Ledger key of a contract's instance storage, base64 XDR
fn instance_key(contract_address: &str) -> Result<String> {
    let contract = ScAddress::from_str(contract_address)?;
    let key = LedgerKey::ContractData(LedgerKeyContractData {
        contract,
        key: ScVal::LedgerKeyContractInstance,
        durability: ContractDataDurability::Persistent,
    });
    let bytes = key.to_xdr(Limits::none())?;
    Ok(general_purpose::STANDARD.encode(bytes))
}

/// Reads the `status` symbol from a contract instance entry
fn decode_instance_status(entry_xdr: &str) -> Result<ContractStatus> {
    let bytes = general_purpose::STANDARD.decode(entry_xdr)?;
    let data = LedgerEntryData::from_xdr(&bytes, Limits::len(XDR_LIMIT))?;

    let storage = match data {
        LedgerEntryData::ContractData(entry) => match entry.val {
            ScVal::ContractInstance(instance) => instance.storage,
            _ => None,
        },
        _ => None,
    }
    .ok_or_else(|| anyhow!("entry is not a contract instance"))?;

    for item in storage.iter() {
        let is_status = matches!(&item.key, ScVal::Symbol(s) if s.to_string() == "status");
        if !is_status {
            continue;
        }
        if let ScVal::Symbol(value) = &item.val {
            return ContractStatus::from_symbol(&value.to_string())
                .ok_or_else(|| anyhow!("unknown contract status {}", value.to_string()));
        }
    }
    Err(anyhow!("contract instance has no status"))
}

fn scval_to_i32(val: &ScVal) -> Result<i32> {
    match val {
        ScVal::U32(v) => Ok(i32::try_from(*v)?),
        ScVal::I32(v) => Ok(*v),
        ScVal::U64(v) => Ok(i32::try_from(*v)?),
        ScVal::I64(v) => Ok(i32::try_from(*v)?),
        _ => Err(anyhow!("Expected integer")),
    }
}

fn scval_to_amount(val: &ScVal) -> Result<Decimal> {
    match val {
        ScVal::I128(v) => {
            let raw = (i128::from(v.hi) << 64) | i128::from(v.lo);
            Ok(Decimal::try_from_i128_with_scale(raw, AMOUNT_SCALE)?)
        }
        _ => Err(anyhow!("Expected I128")),
    }
}

fn scval_to_address(val: &ScVal) -> Result<String> {
    match val {
        ScVal::Address(addr) => Ok(addr.to_string()),
        _ => Err(anyhow!("Expected Address")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stellar_xdr::next::{Int128Parts, ScSymbol, ScVec};

    fn encode(val: &ScVal) -> String {
        general_purpose::STANDARD.encode(val.to_xdr(Limits::none()).unwrap())
    }

    fn symbol(name: &str) -> ScVal {
        ScVal::Symbol(ScSymbol(name.try_into().unwrap()))
    }

    #[test]
    fn test_finality_of_get_transaction() {
        assert_eq!(finality(&json!({ "status": "SUCCESS" })), Finality::Success);
        assert_eq!(finality(&json!({ "status": "NOT_FOUND" })), Finality::Pending);
        assert_eq!(
            finality(&json!({ "status": "FAILED", "resultXdr": "AAAA" })),
            Finality::Failed("AAAA".to_string())
        );
    }

    #[test]
    fn test_scval_to_amount_scales_stroops() {
        let val = ScVal::I128(Int128Parts {
            hi: 0,
            lo: 5_000_000_000,
        });
        assert_eq!(scval_to_amount(&val).unwrap(), Decimal::from(500));
    }

    #[test]
    fn test_decode_rent_event() {
        let args: Vec<ScVal> = vec![
            ScVal::U32(2),
            ScVal::I128(Int128Parts {
                hi: 0,
                lo: 5_000_000_000,
            }),
        ];
        let raw = SorobanEvent {
            id: "0000001-1".to_string(),
            ledger: 10,
            contract_id: "CRENTAL".to_string(),
            topic: vec![encode(&symbol("rent_paid"))],
            value: EventValue::Xdr {
                xdr: encode(&ScVal::Vec(Some(ScVec(args.try_into().unwrap())))),
            },
            paging_token: None,
            tx_hash: Some("abc".to_string()),
        };

        let event = decode_event(&raw, "0000001-1").unwrap().unwrap();
        assert_eq!(event.name, "rent_paid");
        assert_eq!(event.month, Some(2));
        assert_eq!(event.amounts, vec![Decimal::from(500)]);
        assert_eq!(event.tx_reference, "abc");
        assert_eq!(event.cursor, "0000001-1");
    }
}
