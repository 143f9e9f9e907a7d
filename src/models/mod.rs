//! Response envelope shared by every handler

use serde::{Deserialize, Serialize};

/// API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Body for actions that only relay a signed ledger transaction
#[derive(Debug, Deserialize, Default)]
pub struct SignedTxRequest {
    #[serde(default)]
    pub signed_tx: Option<String>,
}
