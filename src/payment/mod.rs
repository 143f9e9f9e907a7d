//! Payment ledger: append-only financial record of every agreement

pub mod ledger;
pub mod model;

pub use ledger::{next_due_month, payments_by_month, total_paid, PaymentLedger};
pub use model::*;
