//! Node and service-instance registry.
//!
//! The registry is the authoritative, process-local table of known nodes and
//! the service instances they host. It is mutated by heartbeat events,
//! node-loss detection and the invoker's success-path liveness refresh, and
//! rebuilt from incoming heartbeats after a restart — nothing is persisted.

use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use filament_common::protocol::{Heartbeat, ServiceAdvert};

use crate::config::ResilienceConfig;

/// Liveness status of a node.
///
/// Exactly one node is `Local`; it is exempt from staleness eviction.
/// `Suspect` nodes have missed heartbeats but not yet timed out and remain
/// eligible for balancing; `Unreachable` nodes are excluded until their next
/// heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Local,
    Alive,
    Suspect,
    Unreachable,
}

impl NodeStatus {
    /// Whether a node in this status may receive calls.
    pub fn is_eligible(self) -> bool {
        !matches!(self, NodeStatus::Unreachable)
    }
}

/// One known mesh participant.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: String,
    pub metadata: Map<String, Value>,
    pub last_heartbeat_at: Instant,
    pub sequence: u64,
    pub status: NodeStatus,
}

impl Node {
    /// Dial target advertised by the node, if any.
    pub fn address(&self) -> Option<&str> {
        self.metadata.get("address").and_then(Value::as_str)
    }
}

/// A (service, node) binding advertising a set of callable actions.
///
/// The registry never holds two instances with the same (service, node) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInstance {
    pub service: String,
    pub node_id: String,
    pub actions: BTreeSet<String>,
}

/// Authoritative table of nodes and service instances.
///
/// Callers share it behind `Arc<tokio::sync::RwLock<_>>`; every method is a
/// short critical section so no lock is ever held across a suspension point.
pub struct NodeRegistry {
    local_id: String,
    heartbeat_timeout: std::time::Duration,
    disable_balancer: bool,
    nodes: HashMap<String, Node>,
    /// service name -> instances, one per hosting node
    instances: HashMap<String, Vec<ServiceInstance>>,
}

impl NodeRegistry {
    pub fn new(config: &ResilienceConfig, local_metadata: Map<String, Value>) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            config.node_id.clone(),
            Node {
                id: config.node_id.clone(),
                metadata: local_metadata,
                last_heartbeat_at: Instant::now(),
                sequence: 0,
                status: NodeStatus::Local,
            },
        );
        Self {
            local_id: config.node_id.clone(),
            heartbeat_timeout: config.heartbeat_timeout,
            disable_balancer: config.disable_balancer,
            nodes,
            instances: HashMap::new(),
        }
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.get(node_id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Metadata of the local node, gossiped in every heartbeat.
    pub fn local_metadata(&self) -> &Map<String, Value> {
        self.nodes
            .get(&self.local_id)
            .map(|node| &node.metadata)
            .expect("local node is never removed")
    }

    /// Registers a service hosted by the local node. Re-registering replaces
    /// the advertised action set.
    pub fn register_local_service(&mut self, service: &str, actions: Vec<String>) {
        let local_id = self.local_id.clone();
        self.upsert_instance(service, &local_id, actions.into_iter().collect());
        info!("Service '{}' registered on local node '{}'", service, local_id);
    }

    /// Applies a full-state heartbeat: refreshes the node's liveness and
    /// replaces its advertised instance set (adding the new, removing the
    /// withdrawn). Creates the node on first contact.
    pub fn upsert_heartbeat(&mut self, beat: &Heartbeat, now: Instant) {
        if beat.node_id == self.local_id {
            return;
        }

        match self.nodes.get_mut(&beat.node_id) {
            Some(node) => {
                // Sequence 1 is a restarted sender; anything else below the
                // last seen sequence is a reordered packet and is dropped.
                if beat.sequence < node.sequence && beat.sequence > 1 {
                    debug!(
                        "Dropping reordered heartbeat from '{}' (seq {} < {})",
                        beat.node_id, beat.sequence, node.sequence
                    );
                    return;
                }
                node.metadata = beat.metadata.clone();
                node.last_heartbeat_at = now;
                node.sequence = beat.sequence;
                node.status = NodeStatus::Alive;
            }
            None => {
                info!("Node '{}' joined the mesh", beat.node_id);
                self.nodes.insert(
                    beat.node_id.clone(),
                    Node {
                        id: beat.node_id.clone(),
                        metadata: beat.metadata.clone(),
                        last_heartbeat_at: now,
                        sequence: beat.sequence,
                        status: NodeStatus::Alive,
                    },
                );
            }
        }

        self.replace_instances(&beat.node_id, &beat.services);
    }

    /// Refreshes a node's liveness from a successful call. Cheaper than a
    /// heartbeat: the advertised instance set is left untouched.
    pub fn touch(&mut self, node_id: &str, now: Instant) {
        if let Some(node) = self.nodes.get_mut(node_id) {
            node.last_heartbeat_at = now;
            if node.status != NodeStatus::Local {
                node.status = NodeStatus::Alive;
            }
        }
    }

    /// Refreshes the local node's own heartbeat stamp.
    pub fn touch_local(&mut self, now: Instant) {
        if let Some(node) = self.nodes.get_mut(&self.local_id) {
            node.last_heartbeat_at = now;
        }
    }

    /// Marks a node unreachable; its instances stay registered but are
    /// excluded from balancing until the next heartbeat or call success.
    pub fn mark_unreachable(&mut self, node_id: &str) {
        if node_id == self.local_id {
            return;
        }
        if let Some(node) = self.nodes.get_mut(node_id) {
            if node.status != NodeStatus::Unreachable {
                warn!("Node '{}' is unreachable", node_id);
                node.status = NodeStatus::Unreachable;
            }
        }
    }

    /// Removes a node and every instance it hosts (explicit disconnect).
    pub fn remove_node(&mut self, node_id: &str) -> bool {
        if node_id == self.local_id {
            return false;
        }
        if self.nodes.remove(node_id).is_none() {
            return false;
        }
        self.drop_instances_of(node_id);
        info!("Node '{}' left the mesh", node_id);
        true
    }

    /// All registered instances of a service, regardless of node status.
    pub fn list_instances(&self, service: &str) -> Vec<ServiceInstance> {
        self.instances.get(service).cloned().unwrap_or_default()
    }

    /// Instances whose hosting node may receive calls, sorted by node id for
    /// deterministic strategy cursors.
    pub fn eligible_instances(&self, service: &str) -> Vec<ServiceInstance> {
        let mut eligible: Vec<ServiceInstance> = self
            .instances
            .get(service)
            .map(|instances| {
                instances
                    .iter()
                    .filter(|instance| {
                        self.nodes
                            .get(&instance.node_id)
                            .map(|node| node.status.is_eligible())
                            .unwrap_or(false)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        eligible.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        eligible
    }

    /// Dial target of a node, if it advertised one.
    pub fn node_address(&self, node_id: &str) -> Option<String> {
        self.nodes
            .get(node_id)
            .and_then(|node| node.address())
            .map(str::to_string)
    }

    /// Dial targets of all remote nodes, for gossip fan-out.
    pub fn remote_addresses(&self) -> Vec<String> {
        self.nodes
            .values()
            .filter(|node| node.status != NodeStatus::Local)
            .filter_map(|node| node.address())
            .map(str::to_string)
            .collect()
    }

    /// Services and actions hosted by the local node, for heartbeat payloads.
    pub fn local_adverts(&self) -> Vec<ServiceAdvert> {
        let mut adverts: Vec<ServiceAdvert> = self
            .instances
            .values()
            .flatten()
            .filter(|instance| instance.node_id == self.local_id)
            .map(|instance| ServiceAdvert {
                service: instance.service.clone(),
                actions: instance.actions.iter().cloned().collect(),
            })
            .collect();
        adverts.sort_by(|a, b| a.service.cmp(&b.service));
        adverts
    }

    /// Staleness sweep: downgrades nodes past half the timeout to `Suspect`
    /// and evicts nodes past the full timeout together with their instances.
    /// Besides explicit disconnect this is the only path that deletes
    /// entries. A no-op while the balancer is disabled.
    pub fn evict_stale(&mut self, now: Instant) -> Vec<String> {
        if self.disable_balancer {
            return Vec::new();
        }

        let mut evicted = Vec::new();
        for node in self.nodes.values_mut() {
            if node.status == NodeStatus::Local {
                continue;
            }
            let elapsed = now.saturating_duration_since(node.last_heartbeat_at);
            if elapsed > self.heartbeat_timeout {
                evicted.push(node.id.clone());
            } else if elapsed > self.heartbeat_timeout / 2 && node.status == NodeStatus::Alive {
                debug!("Node '{}' is overdue for a heartbeat", node.id);
                node.status = NodeStatus::Suspect;
            }
        }

        for node_id in &evicted {
            self.nodes.remove(node_id);
            self.drop_instances_of(node_id);
            warn!(
                "Node '{}' evicted: no heartbeat for more than {:?}",
                node_id, self.heartbeat_timeout
            );
        }
        evicted
    }

    fn upsert_instance(&mut self, service: &str, node_id: &str, actions: BTreeSet<String>) {
        let instances = self.instances.entry(service.to_string()).or_default();
        match instances
            .iter_mut()
            .find(|instance| instance.node_id == node_id)
        {
            Some(existing) => existing.actions = actions,
            None => instances.push(ServiceInstance {
                service: service.to_string(),
                node_id: node_id.to_string(),
                actions,
            }),
        }
    }

    /// Replaces a node's advertised instance set with the heartbeat payload.
    fn replace_instances(&mut self, node_id: &str, adverts: &[ServiceAdvert]) {
        // Withdraw services no longer advertised
        let advertised: BTreeSet<&str> =
            adverts.iter().map(|advert| advert.service.as_str()).collect();
        for (service, instances) in self.instances.iter_mut() {
            if !advertised.contains(service.as_str()) {
                instances.retain(|instance| instance.node_id != node_id);
            }
        }
        self.instances.retain(|_, instances| !instances.is_empty());

        for advert in adverts {
            self.upsert_instance(
                &advert.service,
                node_id,
                advert.actions.iter().cloned().collect(),
            );
        }
    }

    fn drop_instances_of(&mut self, node_id: &str) {
        for instances in self.instances.values_mut() {
            instances.retain(|instance| instance.node_id != node_id);
        }
        self.instances.retain(|_, instances| !instances.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrokerConfig;
    use std::time::Duration;

    fn registry() -> NodeRegistry {
        let config = BrokerConfig {
            node_id: Some("local".to_string()),
            heartbeat_interval: 5,
            heartbeat_timeout: 15,
            ..BrokerConfig::default()
        };
        NodeRegistry::new(&config.resilience().unwrap(), Map::new())
    }

    fn beat(node_id: &str, sequence: u64, services: &[(&str, &[&str])]) -> Heartbeat {
        let mut metadata = Map::new();
        metadata.insert(
            "address".to_string(),
            Value::String(format!("{}:7100", node_id)),
        );
        Heartbeat {
            namespace: "dev".to_string(),
            node_id: node_id.to_string(),
            sequence,
            services: services
                .iter()
                .map(|(service, actions)| {
                    ServiceAdvert::new(*service, actions.iter().map(|a| a.to_string()).collect())
                })
                .collect(),
            metadata,
        }
    }

    #[test]
    fn test_local_node_exists() {
        let registry = registry();
        assert_eq!(registry.local_id(), "local");
        assert_eq!(registry.node("local").unwrap().status, NodeStatus::Local);
    }

    #[test]
    fn test_first_heartbeat_creates_node_and_instances() {
        let mut registry = registry();
        registry.upsert_heartbeat(&beat("node-a", 1, &[("math", &["add", "sub"])]), Instant::now());

        assert_eq!(registry.node("node-a").unwrap().status, NodeStatus::Alive);
        let instances = registry.list_instances("math");
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].node_id, "node-a");
        assert!(instances[0].actions.contains("add"));
        assert_eq!(registry.node_address("node-a"), Some("node-a:7100".to_string()));
    }

    #[test]
    fn test_heartbeat_is_full_state_not_delta() {
        let mut registry = registry();
        registry.upsert_heartbeat(
            &beat("node-a", 1, &[("math", &["add"]), ("users", &["get"])]),
            Instant::now(),
        );
        // Second heartbeat withdraws "users" and adds "posts"
        registry.upsert_heartbeat(
            &beat("node-a", 2, &[("math", &["add"]), ("posts", &["list"])]),
            Instant::now(),
        );

        assert_eq!(registry.list_instances("math").len(), 1);
        assert_eq!(registry.list_instances("posts").len(), 1);
        assert!(registry.list_instances("users").is_empty());
    }

    #[test]
    fn test_no_duplicate_service_node_pair() {
        let mut registry = registry();
        registry.upsert_heartbeat(&beat("node-a", 1, &[("math", &["add"])]), Instant::now());
        registry.upsert_heartbeat(&beat("node-a", 2, &[("math", &["add", "sub"])]), Instant::now());

        let instances = registry.list_instances("math");
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].actions.len(), 2);
    }

    #[test]
    fn test_reordered_heartbeat_dropped() {
        let mut registry = registry();
        registry.upsert_heartbeat(&beat("node-a", 5, &[("math", &["add"])]), Instant::now());
        registry.upsert_heartbeat(&beat("node-a", 3, &[("stale", &["x"])]), Instant::now());

        assert!(registry.list_instances("stale").is_empty());
        assert_eq!(registry.node("node-a").unwrap().sequence, 5);
    }

    #[test]
    fn test_restarted_node_accepted() {
        let mut registry = registry();
        registry.upsert_heartbeat(&beat("node-a", 40, &[("math", &["add"])]), Instant::now());
        // Restart: sequence goes back to 1
        registry.upsert_heartbeat(&beat("node-a", 1, &[("users", &["get"])]), Instant::now());

        assert!(registry.list_instances("math").is_empty());
        assert_eq!(registry.list_instances("users").len(), 1);
    }

    #[test]
    fn test_evict_stale_after_timeout() {
        let mut registry = registry();
        let t0 = Instant::now();
        registry.upsert_heartbeat(&beat("node-a", 1, &[("math", &["add"])]), t0);

        // 16 seconds of silence with a 15 second timeout
        let evicted = registry.evict_stale(t0 + Duration::from_secs(16));
        assert_eq!(evicted, vec!["node-a".to_string()]);
        assert!(registry.node("node-a").is_none());
        assert!(registry.list_instances("math").is_empty());
    }

    #[test]
    fn test_regular_heartbeats_prevent_eviction() {
        let mut registry = registry();
        let t0 = Instant::now();
        registry.upsert_heartbeat(&beat("node-a", 1, &[("math", &["add"])]), t0);

        // Heartbeat every 5 seconds for a minute, sweeping after each
        for i in 1..=12u64 {
            let now = t0 + Duration::from_secs(5 * i);
            registry.upsert_heartbeat(&beat("node-a", 1 + i, &[("math", &["add"])]), now);
            assert!(registry.evict_stale(now).is_empty());
        }
        assert!(registry.node("node-a").is_some());
    }

    #[test]
    fn test_suspect_before_eviction() {
        let mut registry = registry();
        let t0 = Instant::now();
        registry.upsert_heartbeat(&beat("node-a", 1, &[("math", &["add"])]), t0);

        // Past half the timeout: suspect but still eligible
        let evicted = registry.evict_stale(t0 + Duration::from_secs(8));
        assert!(evicted.is_empty());
        assert_eq!(registry.node("node-a").unwrap().status, NodeStatus::Suspect);
        assert_eq!(registry.eligible_instances("math").len(), 1);
    }

    #[test]
    fn test_local_node_never_evicted() {
        let mut registry = registry();
        registry.register_local_service("math", vec!["add".to_string()]);

        let evicted = registry.evict_stale(Instant::now() + Duration::from_secs(3600));
        assert!(evicted.is_empty());
        assert!(registry.node("local").is_some());
        assert_eq!(registry.list_instances("math").len(), 1);
    }

    #[test]
    fn test_eviction_disabled_with_balancer() {
        let config = BrokerConfig {
            node_id: Some("local".to_string()),
            disable_balancer: true,
            ..BrokerConfig::default()
        };
        let mut registry = NodeRegistry::new(&config.resilience().unwrap(), Map::new());
        let t0 = Instant::now();
        registry.upsert_heartbeat(&beat("node-a", 1, &[("math", &["add"])]), t0);

        assert!(registry.evict_stale(t0 + Duration::from_secs(3600)).is_empty());
        assert!(registry.node("node-a").is_some());
    }

    #[test]
    fn test_mark_unreachable_excludes_from_eligible() {
        let mut registry = registry();
        registry.upsert_heartbeat(&beat("node-a", 1, &[("math", &["add"])]), Instant::now());

        registry.mark_unreachable("node-a");
        assert_eq!(registry.list_instances("math").len(), 1);
        assert!(registry.eligible_instances("math").is_empty());

        // The next heartbeat restores eligibility
        registry.upsert_heartbeat(&beat("node-a", 2, &[("math", &["add"])]), Instant::now());
        assert_eq!(registry.eligible_instances("math").len(), 1);
    }

    #[test]
    fn test_remove_node_on_disconnect() {
        let mut registry = registry();
        registry.upsert_heartbeat(&beat("node-a", 1, &[("math", &["add"])]), Instant::now());

        assert!(registry.remove_node("node-a"));
        assert!(registry.node("node-a").is_none());
        assert!(registry.list_instances("math").is_empty());
        assert!(!registry.remove_node("node-a"));
        assert!(!registry.remove_node("local"));
    }

    #[test]
    fn test_eligible_instances_sorted_by_node_id() {
        let mut registry = registry();
        registry.upsert_heartbeat(&beat("node-c", 1, &[("math", &["add"])]), Instant::now());
        registry.upsert_heartbeat(&beat("node-a", 1, &[("math", &["add"])]), Instant::now());
        registry.upsert_heartbeat(&beat("node-b", 1, &[("math", &["add"])]), Instant::now());

        let order: Vec<String> = registry
            .eligible_instances("math")
            .into_iter()
            .map(|instance| instance.node_id)
            .collect();
        assert_eq!(order, vec!["node-a", "node-b", "node-c"]);
    }

    #[test]
    fn test_local_adverts() {
        let mut registry = registry();
        registry.register_local_service("math", vec!["add".to_string(), "sub".to_string()]);
        registry.register_local_service("users", vec!["get".to_string()]);
        registry.upsert_heartbeat(&beat("node-a", 1, &[("posts", &["list"])]), Instant::now());

        let adverts = registry.local_adverts();
        assert_eq!(adverts.len(), 2);
        assert_eq!(adverts[0].service, "math");
        assert_eq!(adverts[1].service, "users");
    }
}
