//! Loan agreements collateralised by rental deposits

pub mod model;
pub mod service;

pub use model::*;
pub use service::LoanService;
