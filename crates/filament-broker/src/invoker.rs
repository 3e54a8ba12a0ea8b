//! Call orchestration.
//!
//! One [`CallInvoker::call`] runs the whole outbound pipeline: depth guard,
//! target selection (prefer-local rule, then the balancing strategy over a
//! consistent registry snapshot), circuit-breaker admission, dispatch with a
//! deadline, and retry with exponential backoff. Outcome bookkeeping flows
//! back into the breaker and the registry; nothing else mutates shared state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::warn;

use filament_common::protocol::error::{FilamentError, Result};
use filament_common::protocol::{CallParams, CallRequest};
use filament_common::transport::Transporter;

use crate::breaker::{Admission, CircuitBreaker, EndpointKey, FailureKind};
use crate::config::ResilienceConfig;
use crate::registry::NodeRegistry;
use crate::strategy::Strategy;

/// Async handler of a locally registered action.
pub type ActionHandler = Arc<dyn Fn(CallParams) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Wraps an async closure into an [`ActionHandler`].
pub fn handler<F, Fut>(f: F) -> ActionHandler
where
    F: Fn(CallParams) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(move |params| -> BoxFuture<'static, Result<Value>> { Box::pin(f(params)) })
}

/// Table of actions hosted by the local node, keyed by `service.action`.
#[derive(Default)]
pub struct LocalActions {
    handlers: parking_lot::RwLock<HashMap<String, ActionHandler>>,
}

impl LocalActions {
    pub fn insert(&self, service: &str, action: &str, handler: ActionHandler) {
        self.handlers
            .write()
            .insert(format!("{}.{}", service, action), handler);
    }

    pub fn get(&self, service: &str, action: &str) -> Option<ActionHandler> {
        self.handlers
            .read()
            .get(&format!("{}.{}", service, action))
            .cloned()
    }
}

/// Chosen call target for one attempt.
struct Target {
    node_id: String,
    address: Option<String>,
    local: bool,
}

/// One attempt's failure, with the node it hit (if any) so the next attempt
/// can exclude it from selection.
struct AttemptError {
    node: Option<String>,
    error: FilamentError,
}

impl From<FilamentError> for AttemptError {
    fn from(error: FilamentError) -> Self {
        Self { node: None, error }
    }
}

/// Orchestrates outbound calls.
pub struct CallInvoker {
    config: Arc<ResilienceConfig>,
    registry: Arc<RwLock<NodeRegistry>>,
    strategy: Arc<Mutex<Strategy>>,
    breaker: Arc<CircuitBreaker>,
    transporter: Arc<dyn Transporter>,
    actions: Arc<LocalActions>,
}

impl CallInvoker {
    pub fn new(
        config: Arc<ResilienceConfig>,
        registry: Arc<RwLock<NodeRegistry>>,
        strategy: Arc<Mutex<Strategy>>,
        breaker: Arc<CircuitBreaker>,
        transporter: Arc<dyn Transporter>,
        actions: Arc<LocalActions>,
    ) -> Self {
        Self {
            config,
            registry,
            strategy,
            breaker,
            transporter,
            actions,
        }
    }

    /// Invokes `service.action` at call depth `depth` (1 for a fresh call).
    ///
    /// Transient failures are retried up to `requestRetry` times; every retry
    /// re-selects a target, excluding the node that just failed, and waits an
    /// exponentially growing backoff first. The last error is surfaced typed.
    pub async fn call(
        &self,
        service: &str,
        action: &str,
        params: CallParams,
        depth: u32,
    ) -> Result<Value> {
        let config = &self.config;
        // A maxCallLevel of zero means unlimited depth
        if config.max_call_level > 0 && depth >= config.max_call_level {
            return Err(FilamentError::MaxCallLevel(config.max_call_level));
        }

        let mut delay = config.backoff.delay;
        let mut exclude: Option<String> = None;
        let mut attempt: u32 = 0;
        loop {
            match self
                .attempt(service, action, &params, depth, exclude.as_deref())
                .await
            {
                Ok(value) => return Ok(value),
                Err(AttemptError { node, error }) => {
                    if attempt >= config.request_retry || !error.is_transient() {
                        return Err(error);
                    }
                    attempt += 1;
                    warn!(
                        "Call '{}.{}' failed ({}), retrying ({} attempts left)",
                        service,
                        action,
                        error,
                        config.request_retry - attempt + 1
                    );
                    exclude = node;
                    // The failed attempt has fully unwound before we sleep;
                    // attempts never overlap
                    tokio::time::sleep(delay).await;
                    delay = config.backoff.next(delay);
                }
            }
        }
    }

    /// One attempt: select, admit, dispatch, record.
    async fn attempt(
        &self,
        service: &str,
        action: &str,
        params: &CallParams,
        depth: u32,
        exclude: Option<&str>,
    ) -> std::result::Result<Value, AttemptError> {
        let target = self.select_target(service, action, exclude).await?;
        let key = EndpointKey::new(service, action, target.node_id.clone());

        let admission = match self.breaker.try_acquire(&key, Instant::now()) {
            Ok(admission) => admission,
            Err(error) => {
                return Err(AttemptError {
                    node: Some(target.node_id),
                    error,
                })
            }
        };

        match self.dispatch(service, action, params, depth, &target).await {
            Ok(value) => {
                self.breaker.record_success(&key, admission, Instant::now());
                self.registry
                    .write()
                    .await
                    .touch(&target.node_id, Instant::now());
                Ok(value)
            }
            Err(error) => {
                self.breaker
                    .record_failure(&key, admission, failure_kind(&error), Instant::now());
                if !target.local && matches!(error, FilamentError::NodeUnavailable { .. }) {
                    self.registry.write().await.mark_unreachable(&target.node_id);
                }
                Err(AttemptError {
                    node: Some(target.node_id),
                    error,
                })
            }
        }
    }

    /// Resolves the call target from a consistent registry snapshot taken
    /// before any suspension point.
    async fn select_target(
        &self,
        service: &str,
        action: &str,
        exclude: Option<&str>,
    ) -> Result<Target> {
        let config = &self.config;

        // Snapshot: eligible instances, their addresses, and whether the
        // service exists at all
        let (mut candidates, known_anywhere, local_id, addresses) = {
            let registry = self.registry.read().await;
            let candidates = registry.eligible_instances(service);
            let known_anywhere = !registry.list_instances(service).is_empty();
            let addresses: HashMap<String, Option<String>> = candidates
                .iter()
                .map(|instance| {
                    (
                        instance.node_id.clone(),
                        registry.node_address(&instance.node_id),
                    )
                })
                .collect();
            (
                candidates,
                known_anywhere,
                registry.local_id().to_string(),
                addresses,
            )
        };

        if !known_anywhere {
            return Err(FilamentError::ServiceNotFound(service.to_string()));
        }

        if let Some(excluded) = exclude {
            candidates.retain(|instance| instance.node_id != excluded);
        }
        if candidates.is_empty() {
            return Err(FilamentError::NodeUnavailable {
                node: exclude.unwrap_or("-").to_string(),
                detail: format!("no eligible instance of '{}' left", service),
            });
        }

        let local_hosted = candidates
            .iter()
            .any(|instance| instance.node_id == local_id);

        // Prefer-local override: the local instance wins outright unless its
        // breaker would reject this action
        if config.prefer_local && local_hosted {
            let key = EndpointKey::new(service, action, local_id.clone());
            if self.breaker.would_admit(&key, Instant::now()) {
                return Ok(Target {
                    node_id: local_id,
                    address: None,
                    local: true,
                });
            }
            candidates.retain(|instance| instance.node_id != local_id);
            if candidates.is_empty() {
                // Local breaker open and nobody else hosts the service
                return Err(FilamentError::ServiceNotFound(service.to_string()));
            }
        }

        let node_id = if config.disable_balancer {
            // Balancer disabled: any known instance will do, local first
            if candidates
                .iter()
                .any(|instance| instance.node_id == local_id)
            {
                local_id.clone()
            } else {
                candidates[0].node_id.clone()
            }
        } else {
            let mut strategy = self.strategy.lock().await;
            match strategy.pick(service, &candidates) {
                Some(instance) => instance.node_id.clone(),
                None => return Err(FilamentError::ServiceNotFound(service.to_string())),
            }
        };

        let local = node_id == local_id;
        let address = if local {
            None
        } else {
            addresses.get(&node_id).cloned().flatten()
        };
        Ok(Target {
            node_id,
            address,
            local,
        })
    }

    /// Dispatches one attempt. This is the only point that touches the
    /// transport adapter; the deadline (when nonzero) bounds the whole
    /// dispatch and cancels it on expiry.
    async fn dispatch(
        &self,
        service: &str,
        action: &str,
        params: &CallParams,
        depth: u32,
        target: &Target,
    ) -> Result<Value> {
        let timeout = self.config.request_timeout;

        if target.local {
            let handler = self.actions.get(service, action).ok_or_else(|| {
                FilamentError::Rejected(format!(
                    "action '{}.{}' is not registered on the local node",
                    service, action
                ))
            })?;
            let invocation = handler(params.clone());
            return if timeout.is_zero() {
                invocation.await
            } else {
                tokio::time::timeout(timeout, invocation)
                    .await
                    .map_err(|_| FilamentError::RequestTimeout(timeout.as_millis() as u64))?
            };
        }

        let address = target.address.clone().ok_or_else(|| {
            FilamentError::NodeUnavailable {
                node: target.node_id.clone(),
                detail: "node advertised no address".to_string(),
            }
        })?;

        let mut request =
            CallRequest::new(service, action, params.clone()).with_level(depth + 1);
        if !timeout.is_zero() {
            request = request.with_timeout(timeout.as_millis() as u64);
        }

        let dispatch = self.transporter.request(&address, &request);
        let response = if timeout.is_zero() {
            dispatch.await
        } else {
            tokio::time::timeout(timeout, dispatch)
                .await
                .map_err(|_| FilamentError::RequestTimeout(timeout.as_millis() as u64))?
        };

        let response = response.map_err(|error| match error {
            // Connection-level problems mean the candidate was unreachable
            FilamentError::Connection(detail) | FilamentError::Transport(detail) => {
                FilamentError::NodeUnavailable {
                    node: target.node_id.clone(),
                    detail,
                }
            }
            FilamentError::Io(io_error) => FilamentError::NodeUnavailable {
                node: target.node_id.clone(),
                detail: io_error.to_string(),
            },
            other => other,
        })?;

        if response.success {
            Ok(response.result.unwrap_or(Value::Null))
        } else {
            Err(FilamentError::Rejected(
                response
                    .error
                    .unwrap_or_else(|| "Unknown error".to_string()),
            ))
        }
    }
}

/// Breaker bookkeeping classification: deadline expiries are timeouts,
/// everything else is a reject/error.
fn failure_kind(error: &FilamentError) -> FailureKind {
    match error {
        FilamentError::RequestTimeout(_) => FailureKind::Timeout,
        _ => FailureKind::Reject,
    }
}
