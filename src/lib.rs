//! RentVault Backend Library
//!
//! Rental agreements whose security deposits collateralise peer-to-peer
//! loans, mirrored against on-chain escrow contracts.

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod ledger;
pub mod loan;
pub mod matching;
pub mod middleware;
pub mod models;
pub mod payment;
pub mod reconciler;
pub mod rental;
pub mod routes;
pub mod schedule;
pub mod state;
pub mod status;
