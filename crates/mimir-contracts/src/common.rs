// Common DTOs for the public API
//
// These types are shared across multiple API endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Machine-readable error envelope returned by every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

/// Stable error code plus human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Stable machine-readable code, e.g. "invalid_state".
    #[schema(example = "not_found")]
    pub code: String,
    /// Human-readable description of the failure.
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
            },
        }
    }
}
