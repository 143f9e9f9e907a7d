//! Payment models: the append-only financial record of every agreement

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::{DomainError, DomainResult};

/// Stored payment type column
#[derive(
    Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[sqlx(type_name = "payment_type", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentType {
    SecurityDeposit,
    Rent,
    RentSkipped,
    LoanRepayment,
    LoanInitialization,
    ContractCreation,
}

impl PaymentType {
    /// Month-keyed types settle one schedule month each
    pub fn is_monthly(&self) -> bool {
        matches!(
            self,
            PaymentType::Rent | PaymentType::RentSkipped | PaymentType::LoanRepayment
        )
    }
}

/// Which agreement a payment belongs to
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum AgreementRef {
    Rental(Uuid),
    Loan(Uuid),
}

impl AgreementRef {
    pub fn id(&self) -> Uuid {
        match self {
            AgreementRef::Rental(id) | AgreementRef::Loan(id) => *id,
        }
    }
}

/// A payment variant together with the fields that variant requires.
///
/// Months are only carried by the month-keyed variants, so a security deposit
/// with a month (or a rent payment without one) cannot be constructed.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentKind {
    SecurityDeposit,
    Rent { month: i32 },
    RentSkipped { month: i32 },
    LoanRepayment { month: i32 },
    LoanInitialization,
    ContractCreation,
}

impl PaymentKind {
    pub fn payment_type(&self) -> PaymentType {
        match self {
            PaymentKind::SecurityDeposit => PaymentType::SecurityDeposit,
            PaymentKind::Rent { .. } => PaymentType::Rent,
            PaymentKind::RentSkipped { .. } => PaymentType::RentSkipped,
            PaymentKind::LoanRepayment { .. } => PaymentType::LoanRepayment,
            PaymentKind::LoanInitialization => PaymentType::LoanInitialization,
            PaymentKind::ContractCreation => PaymentType::ContractCreation,
        }
    }

    pub fn month(&self) -> Option<i32> {
        match self {
            PaymentKind::Rent { month }
            | PaymentKind::RentSkipped { month }
            | PaymentKind::LoanRepayment { month } => Some(*month),
            _ => None,
        }
    }

    /// Rebuild a kind from its stored columns
    pub fn from_parts(payment_type: PaymentType, month: Option<i32>) -> DomainResult<Self> {
        let kind = match (payment_type, month) {
            (PaymentType::SecurityDeposit, None) => PaymentKind::SecurityDeposit,
            (PaymentType::Rent, Some(month)) => PaymentKind::Rent { month },
            (PaymentType::RentSkipped, Some(month)) => PaymentKind::RentSkipped { month },
            (PaymentType::LoanRepayment, Some(month)) => PaymentKind::LoanRepayment { month },
            (PaymentType::LoanInitialization, None) => PaymentKind::LoanInitialization,
            (PaymentType::ContractCreation, None) => PaymentKind::ContractCreation,
            (t, Some(_)) => {
                return Err(DomainError::validation(format!(
                    "{:?} payments do not carry a month",
                    t
                )))
            }
            (t, None) => {
                return Err(DomainError::validation(format!(
                    "{:?} payments require a month",
                    t
                )))
            }
        };
        if let Some(month) = kind.month() {
            if month < 1 {
                return Err(DomainError::validation("Month must be at least 1"));
            }
        }
        Ok(kind)
    }

    fn allowed_for(&self, agreement: &AgreementRef) -> bool {
        match (self, agreement) {
            (PaymentKind::ContractCreation, _) => true,
            (
                PaymentKind::SecurityDeposit | PaymentKind::Rent { .. } | PaymentKind::RentSkipped { .. },
                AgreementRef::Rental(_),
            ) => true,
            (
                PaymentKind::LoanRepayment { .. } | PaymentKind::LoanInitialization,
                AgreementRef::Loan(_),
            ) => true,
            _ => false,
        }
    }
}

/// The (agreementId, type, month) tuple that deduplicates financial events
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdempotencyKey {
    pub agreement_id: Uuid,
    pub payment_type: PaymentType,
    pub month: Option<i32>,
}

impl IdempotencyKey {
    pub fn new(agreement: AgreementRef, kind: PaymentKind) -> Self {
        Self {
            agreement_id: agreement.id(),
            payment_type: kind.payment_type(),
            month: kind.month(),
        }
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.month {
            Some(month) => write!(f, "{}/{:?}/{}", self.agreement_id, self.payment_type, month),
            None => write!(f, "{}/{:?}", self.agreement_id, self.payment_type),
        }
    }
}

/// A validated payment waiting to be appended to the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPayment {
    pub agreement: AgreementRef,
    pub kind: PaymentKind,
    pub payer_id: Uuid,
    pub recipient_id: Uuid,
    pub amount: Decimal,
    pub tx_reference: String,
}

impl NewPayment {
    pub fn new(
        agreement: AgreementRef,
        kind: PaymentKind,
        payer_id: Uuid,
        recipient_id: Uuid,
        amount: Decimal,
        tx_reference: impl Into<String>,
    ) -> DomainResult<Self> {
        if !kind.allowed_for(&agreement) {
            return Err(DomainError::validation(format!(
                "{:?} payments cannot be recorded against {:?}",
                kind.payment_type(),
                agreement
            )));
        }
        if let Some(month) = kind.month() {
            if month < 1 {
                return Err(DomainError::validation("Month must be at least 1"));
            }
        }
        let zero_allowed = kind == PaymentKind::ContractCreation;
        if amount < Decimal::ZERO || (amount.is_zero() && !zero_allowed) {
            return Err(DomainError::validation("Payment amount must be positive"));
        }
        let tx_reference = tx_reference.into();
        if tx_reference.trim().is_empty() {
            return Err(DomainError::validation("Transaction reference is required"));
        }

        Ok(Self {
            agreement,
            kind,
            payer_id,
            recipient_id,
            amount,
            tx_reference,
        })
    }

    pub fn key(&self) -> IdempotencyKey {
        IdempotencyKey::new(self.agreement, self.kind)
    }
}

/// Payment row as stored
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq, Eq)]
pub struct Payment {
    pub id: Uuid,
    pub rental_agreement_id: Option<Uuid>,
    pub loan_agreement_id: Option<Uuid>,
    pub payer_id: Uuid,
    pub recipient_id: Uuid,
    pub amount: Decimal,
    pub tx_reference: String,
    pub payment_type: PaymentType,
    pub month: Option<i32>,
    pub payment_date: DateTime<Utc>,
}

impl Payment {
    pub fn from_new(new: &NewPayment, payment_date: DateTime<Utc>) -> Self {
        let (rental_agreement_id, loan_agreement_id) = match new.agreement {
            AgreementRef::Rental(id) => (Some(id), None),
            AgreementRef::Loan(id) => (None, Some(id)),
        };
        Self {
            id: Uuid::new_v4(),
            rental_agreement_id,
            loan_agreement_id,
            payer_id: new.payer_id,
            recipient_id: new.recipient_id,
            amount: new.amount,
            tx_reference: new.tx_reference.clone(),
            payment_type: new.kind.payment_type(),
            month: new.kind.month(),
            payment_date,
        }
    }

    pub fn agreement_id(&self) -> Option<Uuid> {
        self.rental_agreement_id.or(self.loan_agreement_id)
    }

    pub fn kind(&self) -> DomainResult<PaymentKind> {
        PaymentKind::from_parts(self.payment_type, self.month)
    }

    pub fn key(&self) -> Option<IdempotencyKey> {
        self.agreement_id().map(|agreement_id| IdempotencyKey {
            agreement_id,
            payment_type: self.payment_type,
            month: self.month,
        })
    }
}

/// Payment history with read-time aggregates
#[derive(Debug, Serialize, Clone)]
pub struct PaymentHistory {
    pub agreement_id: Uuid,
    pub payments: Vec<Payment>,
    pub totals: BTreeMap<PaymentType, Decimal>,
    pub total: Decimal,
    pub next_due_month: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> (Uuid, Uuid, Uuid) {
        (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4())
    }

    #[test]
    fn test_month_required_only_for_monthly_variants() {
        assert!(PaymentKind::from_parts(PaymentType::Rent, None).is_err());
        assert!(PaymentKind::from_parts(PaymentType::SecurityDeposit, Some(1)).is_err());
        assert!(PaymentKind::from_parts(PaymentType::LoanRepayment, Some(0)).is_err());
        assert_eq!(
            PaymentKind::from_parts(PaymentType::LoanRepayment, Some(3)).unwrap(),
            PaymentKind::LoanRepayment { month: 3 }
        );
    }

    #[test]
    fn test_variant_must_match_agreement_kind() {
        let (agreement, payer, recipient) = ids();
        let rent_on_loan = NewPayment::new(
            AgreementRef::Loan(agreement),
            PaymentKind::Rent { month: 1 },
            payer,
            recipient,
            Decimal::from(500),
            "tx1",
        );
        assert!(matches!(rent_on_loan, Err(DomainError::Validation(_))));

        let deposit = NewPayment::new(
            AgreementRef::Rental(agreement),
            PaymentKind::SecurityDeposit,
            payer,
            recipient,
            Decimal::from(3000),
            "tx2",
        )
        .unwrap();
        assert_eq!(
            deposit.key(),
            IdempotencyKey {
                agreement_id: agreement,
                payment_type: PaymentType::SecurityDeposit,
                month: None,
            }
        );
    }

    #[test]
    fn test_amount_must_be_positive_except_contract_creation() {
        let (agreement, payer, recipient) = ids();
        assert!(NewPayment::new(
            AgreementRef::Loan(agreement),
            PaymentKind::LoanRepayment { month: 1 },
            payer,
            recipient,
            Decimal::ZERO,
            "tx",
        )
        .is_err());
        assert!(NewPayment::new(
            AgreementRef::Rental(agreement),
            PaymentKind::ContractCreation,
            payer,
            recipient,
            Decimal::ZERO,
            "tx",
        )
        .is_ok());
    }

    #[test]
    fn test_stored_row_round_trips_kind() {
        let (agreement, payer, recipient) = ids();
        let new = NewPayment::new(
            AgreementRef::Rental(agreement),
            PaymentKind::RentSkipped { month: 4 },
            payer,
            recipient,
            Decimal::from(500),
            "0xabc",
        )
        .unwrap();
        let row = Payment::from_new(&new, Utc::now());
        assert_eq!(row.rental_agreement_id, Some(agreement));
        assert_eq!(row.loan_agreement_id, None);
        assert_eq!(row.kind().unwrap(), PaymentKind::RentSkipped { month: 4 });
        assert_eq!(row.key(), Some(new.key()));
    }
}
