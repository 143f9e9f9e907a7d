//! API handlers for the RentVault backend

pub mod loan;
pub mod matching;
pub mod rental;
pub mod status;

pub use loan::*;
pub use matching::*;
pub use rental::*;
pub use status::*;
