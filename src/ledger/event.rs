//! Interpretation of raw contract events

use rust_decimal::Decimal;

use super::LedgerEvent;
use crate::error::{DomainError, DomainResult};

/// Contract event names
pub const AGREEMENT_CREATED: &str = "agr_new";
pub const DEPOSIT_PAID: &str = "dep_paid";
pub const RENT_PAID: &str = "rent_paid";
pub const RENT_SKIPPED: &str = "rent_skip";
pub const LOAN_FUNDED: &str = "loan_fund";
pub const LOAN_DISBURSED: &str = "loan_disb";
pub const REPAID: &str = "repaid";
pub const EXTENDED: &str = "extended";
pub const CLOSED: &str = "closed";
pub const DEFAULTED: &str = "defaulted";

/// Terms announced when a factory deploys a rental contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RentalTerms {
    pub landlord_wallet: String,
    pub renter_wallet: String,
    pub security_deposit: Decimal,
    pub base_rent: Decimal,
    pub duration: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractEvent {
    AgreementCreated {
        contract: String,
        rental_terms: Option<RentalTerms>,
    },
    DepositPaid { payer: String, amount: Decimal },
    RentPaid { payer: String, month: i32, amount: Decimal },
    RentSkipped { payer: String, month: i32, amount: Decimal },
    LoanFunded { lender: String, amount: Decimal },
    LoanDisbursed { borrower: String },
    Repaid { borrower: String, month: i32, amount: Decimal },
    /// Rental term lengthened; carries the new total duration
    Extended { duration: i32 },
    Closed,
    Defaulted,
}

fn wallet(event: &LedgerEvent, index: usize) -> DomainResult<String> {
    event.party_wallets.get(index).cloned().ok_or_else(|| {
        DomainError::validation(format!("{} event is missing party #{}", event.name, index))
    })
}

fn amount(event: &LedgerEvent, index: usize) -> DomainResult<Decimal> {
    event.amounts.get(index).copied().ok_or_else(|| {
        DomainError::validation(format!("{} event is missing amount #{}", event.name, index))
    })
}

fn month(event: &LedgerEvent) -> DomainResult<i32> {
    match event.month {
        Some(month) if month >= 1 => Ok(month),
        Some(month) => Err(DomainError::validation(format!(
            "{} event has invalid month {}",
            event.name, month
        ))),
        None => Err(DomainError::validation(format!("{} event is missing a month", event.name))),
    }
}

impl ContractEvent {
    /// `Ok(None)` for event names this engine does not act on
    pub fn parse(event: &LedgerEvent) -> DomainResult<Option<Self>> {
        let parsed = match event.name.as_str() {
            AGREEMENT_CREATED => {
                let contract = event.created_contract.clone().ok_or_else(|| {
                    DomainError::validation("agr_new event without a created contract")
                })?;
                let rental_terms = match (event.party_wallets.len(), event.amounts.len(), event.duration) {
                    (2.., 2.., Some(duration)) => Some(RentalTerms {
                        landlord_wallet: wallet(event, 0)?,
                        renter_wallet: wallet(event, 1)?,
                        security_deposit: amount(event, 0)?,
                        base_rent: amount(event, 1)?,
                        duration,
                    }),
                    _ => None,
                };
                ContractEvent::AgreementCreated {
                    contract,
                    rental_terms,
                }
            }
            DEPOSIT_PAID => ContractEvent::DepositPaid {
                payer: wallet(event, 0)?,
                amount: amount(event, 0)?,
            },
            RENT_PAID => ContractEvent::RentPaid {
                payer: wallet(event, 0)?,
                month: month(event)?,
                amount: amount(event, 0)?,
            },
            RENT_SKIPPED => ContractEvent::RentSkipped {
                payer: wallet(event, 0)?,
                month: month(event)?,
                amount: amount(event, 0)?,
            },
            LOAN_FUNDED => ContractEvent::LoanFunded {
                lender: wallet(event, 0)?,
                amount: amount(event, 0)?,
            },
            LOAN_DISBURSED => ContractEvent::LoanDisbursed {
                borrower: wallet(event, 0)?,
            },
            REPAID => ContractEvent::Repaid {
                borrower: wallet(event, 0)?,
                month: month(event)?,
                amount: amount(event, 0)?,
            },
            EXTENDED => match event.duration {
                Some(duration) if duration >= 1 => ContractEvent::Extended { duration },
                _ => {
                    return Err(DomainError::validation(
                        "extended event without a valid duration",
                    ))
                }
            },
            CLOSED => ContractEvent::Closed,
            DEFAULTED => ContractEvent::Defaulted,
            _ => return Ok(None),
        };
        Ok(Some(parsed))
    }
}
