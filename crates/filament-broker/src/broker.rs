//! Broker façade.
//!
//! [`Broker`] assembles the control plane from a [`BrokerConfig`]: it
//! resolves the four pluggable facilities once, seeds the registry with the
//! local node, owns the local action table, and exposes the call and gossip
//! entry points. Adapter resolution failures abort construction — there is
//! no partially configured broker.

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use filament_common::cache::{Cacher, NullCacher};
use filament_common::protocol::error::{FilamentError, Result};
use filament_common::protocol::{CallParams, CallRequest, CallResponse, Disconnect, Heartbeat};
use filament_common::serializer::Serializer;
use filament_common::transport::{NullTransporter, Transporter};

use crate::breaker::CircuitBreaker;
use crate::config::{BrokerConfig, ResilienceConfig};
use crate::heartbeat::HeartbeatMonitor;
use crate::invoker::{ActionHandler, CallInvoker, LocalActions};
use crate::registry::NodeRegistry;
use crate::resolve::ConfigResolver;

/// One mesh node: registry, heartbeats, balancing, breaker and invoker wired
/// together behind a single handle. Cheap to share via `Arc`.
pub struct Broker {
    config: Arc<ResilienceConfig>,
    registry: Arc<RwLock<NodeRegistry>>,
    breaker: Arc<CircuitBreaker>,
    transporter: Arc<dyn Transporter>,
    cacher: Arc<dyn Cacher>,
    serializer: Arc<Serializer>,
    actions: Arc<LocalActions>,
    invoker: CallInvoker,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker").finish_non_exhaustive()
    }
}

impl Broker {
    /// Builds a broker from its configuration. Every facility descriptor is
    /// resolved here; an unrecognized adapter aborts startup.
    pub fn new(config: BrokerConfig) -> Result<Self> {
        let resilience = Arc::new(config.resilience()?);

        let serializer = match &config.serializer {
            Some(descriptor) => ConfigResolver::serializer(descriptor)?,
            None => Arc::new(Serializer::json()),
        };
        let transporter: Arc<dyn Transporter> = match &config.transporter {
            Some(descriptor) => ConfigResolver::transporter(descriptor, &serializer)?,
            None => Arc::new(NullTransporter),
        };
        let cacher: Arc<dyn Cacher> = match &config.cacher {
            Some(descriptor) => ConfigResolver::cacher(descriptor)?,
            None => Arc::new(NullCacher),
        };
        let strategy = ConfigResolver::strategy(&config.registry.strategy)?;

        let registry = Arc::new(RwLock::new(NodeRegistry::new(
            &resilience,
            config.metadata.clone(),
        )));
        let breaker = Arc::new(CircuitBreaker::new(resilience.breaker.clone()));
        let actions = Arc::new(LocalActions::default());

        let invoker = CallInvoker::new(
            resilience.clone(),
            registry.clone(),
            Arc::new(Mutex::new(strategy.clone())),
            breaker.clone(),
            transporter.clone(),
            actions.clone(),
        );

        info!(
            "Broker '{}' created in namespace '{}' (transporter: {}, cacher: {}, serializer: {}, strategy: {})",
            resilience.node_id,
            resilience.namespace,
            transporter.name(),
            cacher.name(),
            serializer.name(),
            strategy.name(),
        );

        Ok(Self {
            config: resilience,
            registry,
            breaker,
            transporter,
            cacher,
            serializer,
            actions,
            invoker,
            monitor: Mutex::new(None),
        })
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    /// The resolved cache adapter.
    pub fn cacher(&self) -> Arc<dyn Cacher> {
        self.cacher.clone()
    }

    /// The resolved serializer.
    pub fn serializer(&self) -> Arc<Serializer> {
        self.serializer.clone()
    }

    /// Registers a service on the local node with its action handlers. The
    /// service is advertised in the next heartbeat.
    pub async fn register_service(&self, service: &str, actions: Vec<(&str, ActionHandler)>) {
        let action_names: Vec<String> = actions.iter().map(|(name, _)| name.to_string()).collect();
        for (name, handler) in actions {
            self.actions.insert(service, name, handler);
        }
        self.registry
            .write()
            .await
            .register_local_service(service, action_names);
    }

    /// Starts the heartbeat monitor. Idempotent.
    pub async fn start(&self) {
        let mut monitor = self.monitor.lock().await;
        if monitor.is_some() {
            return;
        }
        *monitor = Some(
            HeartbeatMonitor::new(
                self.config.clone(),
                self.registry.clone(),
                self.breaker.clone(),
                self.transporter.clone(),
            )
            .spawn(),
        );
        info!("Broker '{}' started", self.config.node_id);
    }

    /// Stops the heartbeat monitor and says goodbye to every known peer so
    /// they drop this node without waiting for the timeout.
    pub async fn stop(&self) {
        if let Some(handle) = self.monitor.lock().await.take() {
            handle.abort();
        }

        let peers = self.registry.read().await.remote_addresses();
        let packet = Disconnect {
            namespace: self.config.namespace.clone(),
            node_id: self.config.node_id.clone(),
        };
        let goodbyes = peers.iter().map(|addr| {
            let packet = &packet;
            async move { (addr.clone(), self.transporter.publish_disconnect(addr, packet).await) }
        });
        for (addr, result) in join_all(goodbyes).await {
            if let Err(error) = result {
                debug!("Disconnect to {} failed: {}", addr, error);
            }
        }
        info!("Broker '{}' stopped", self.config.node_id);
    }

    /// Calls `"service.action"` at depth 1.
    pub async fn call(&self, endpoint: &str, params: CallParams) -> Result<Value> {
        self.call_with_depth(endpoint, params, 1).await
    }

    /// Calls `"service.action"` at an explicit call depth. Handlers making
    /// nested calls pass the depth their inbound request carried.
    pub async fn call_with_depth(
        &self,
        endpoint: &str,
        params: CallParams,
        depth: u32,
    ) -> Result<Value> {
        let (service, action) = split_endpoint(endpoint)?;
        self.invoker.call(service, action, params, depth).await
    }

    /// Inbound call dispatch: a peer picked this node as the target. Errors
    /// are folded into the response, never surfaced as transport failures.
    pub async fn handle_request(&self, request: CallRequest) -> CallResponse {
        let handler = match self.actions.get(&request.service, &request.action) {
            Some(handler) => handler,
            None => {
                return CallResponse::error(
                    request.id,
                    format!("Action '{}' is not available on this node", request.endpoint()),
                )
            }
        };
        match handler(request.params.clone()).await {
            Ok(value) => CallResponse::success(request.id, value),
            Err(error) => CallResponse::error(request.id, error.to_string()),
        }
    }

    /// Inbound heartbeat. Packets from a foreign namespace or from this node
    /// itself are dropped.
    pub async fn handle_heartbeat(&self, beat: Heartbeat) {
        if beat.namespace != self.config.namespace {
            debug!(
                "Dropping heartbeat from '{}': namespace '{}' is not '{}'",
                beat.node_id, beat.namespace, self.config.namespace
            );
            return;
        }
        if beat.node_id == self.config.node_id {
            return;
        }
        self.registry
            .write()
            .await
            .upsert_heartbeat(&beat, Instant::now());
    }

    /// Inbound disconnect notice.
    pub async fn handle_disconnect(&self, packet: Disconnect) {
        if packet.namespace != self.config.namespace {
            return;
        }
        self.registry.write().await.remove_node(&packet.node_id);
    }

    /// Marks a node unreachable on behalf of a transport integration that
    /// saw its connection drop.
    pub async fn mark_node_unreachable(&self, node_id: &str) {
        self.registry.write().await.mark_unreachable(node_id);
    }

    /// Read access to the registry, for introspection and embedding.
    pub fn registry(&self) -> Arc<RwLock<NodeRegistry>> {
        self.registry.clone()
    }

    /// The circuit breaker, for introspection.
    pub fn breaker(&self) -> Arc<CircuitBreaker> {
        self.breaker.clone()
    }
}

/// Splits `"service.action"` at the last dot, so service names may be
/// namespaced (`"v1.users.get"` → service `"v1.users"`, action `"get"`).
fn split_endpoint(endpoint: &str) -> Result<(&str, &str)> {
    match endpoint.rsplit_once('.') {
        Some((service, action)) if !service.is_empty() && !action.is_empty() => {
            Ok((service, action))
        }
        _ => Err(FilamentError::ServiceNotFound(endpoint.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_endpoint() {
        assert_eq!(split_endpoint("math.add").unwrap(), ("math", "add"));
        assert_eq!(
            split_endpoint("v1.users.get").unwrap(),
            ("v1.users", "get")
        );
        assert!(split_endpoint("math").is_err());
        assert!(split_endpoint(".add").is_err());
        assert!(split_endpoint("math.").is_err());
    }
}
