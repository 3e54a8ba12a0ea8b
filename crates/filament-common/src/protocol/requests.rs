use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

pub type RequestId = u64;
pub type CallParams = serde_json::Value;

static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// One outbound call to a `service.action` endpoint.
///
/// `level` is the call depth of the issuing context: a request made directly
/// by application code has level 1, a request made while handling another
/// request has the parent's level plus one. Receivers propagate it so the
/// depth guard works across node boundaries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallRequest {
    pub id: RequestId,
    pub service: String,
    pub action: String,
    pub params: CallParams,
    pub level: u32,
    pub timeout_ms: Option<u64>,
}

impl CallRequest {
    pub fn new(service: impl Into<String>, action: impl Into<String>, params: CallParams) -> Self {
        CallRequest {
            id: generate_request_id(),
            service: service.into(),
            action: action.into(),
            params,
            level: 1,
            timeout_ms: None,
        }
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_level(mut self, level: u32) -> Self {
        self.level = level;
        self
    }

    /// Qualified endpoint name, e.g. `"math.add"`.
    pub fn endpoint(&self) -> String {
        format!("{}.{}", self.service, self.action)
    }
}

fn generate_request_id() -> RequestId {
    // Try to use system time as the base
    let timestamp = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);

    // Always increment the counter to ensure uniqueness
    let counter = REQUEST_ID_COUNTER.fetch_add(1, Ordering::SeqCst);

    // Combine timestamp and counter: upper 32 bits of the timestamp,
    // lower 32 bits of the counter
    (timestamp & 0xFFFFFFFF00000000) | (counter & 0xFFFFFFFF)
}
