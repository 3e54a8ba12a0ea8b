//! Call response types.

use super::RequestId;
use serde::{Deserialize, Serialize};

/// Call result value (JSON).
pub type CallResult = serde_json::Value;

/// The response to a [`CallRequest`](super::CallRequest).
///
/// - `id`: the request id this response corresponds to
/// - `result`: the result value (present on success)
/// - `error`: error message (present on failure)
/// - `success`: whether the call succeeded on the remote side
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallResponse {
    /// Request identifier this response corresponds to
    pub id: RequestId,
    /// Result value (present on success)
    pub result: Option<CallResult>,
    /// Error message (present on failure)
    pub error: Option<String>,
    /// Whether the call succeeded
    pub success: bool,
}

impl CallResponse {
    /// Creates a successful response.
    pub fn success(id: RequestId, result: CallResult) -> Self {
        CallResponse {
            id,
            result: Some(result),
            error: None,
            success: true,
        }
    }

    /// Creates an error response.
    pub fn error(id: RequestId, error: impl Into<String>) -> Self {
        CallResponse {
            id,
            result: None,
            error: Some(error.into()),
            success: false,
        }
    }
}
