//! Broker configuration.
//!
//! [`BrokerConfig`] is the deserialized configuration surface; field names
//! follow the documented camelCase schema. [`ResilienceConfig`] is the
//! validated, immutable snapshot handed to every component constructor —
//! there is no ambient global configuration.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};

use filament_common::protocol::error::{FilamentError, Result};

use crate::resolve::{
    CacherDescriptor, ConfigDescriptor, SerializerDescriptor, StrategyDescriptor,
    TransporterDescriptor,
};

/// Top-level broker configuration.
///
/// Every field has a default; `BrokerConfig::default()` describes a
/// single-node mesh with no transporter, no cacher, JSON serialization and a
/// disabled circuit breaker.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BrokerConfig {
    /// Isolates independent meshes sharing the same transport
    pub namespace: String,
    /// Local node identity; autogenerated when absent
    #[serde(rename = "nodeID")]
    pub node_id: Option<String>,
    /// Local node attributes gossiped in heartbeats; the TCP transport reads
    /// the `"address"` key as this node's dial target
    pub metadata: Map<String, Value>,
    /// Transport adapter descriptor; `None` means single-node mode
    pub transporter: Option<TransporterDescriptor>,
    /// Cache adapter descriptor; `None` disables caching
    pub cacher: Option<CacherDescriptor>,
    /// Serializer descriptor; `None` means JSON
    pub serializer: Option<SerializerDescriptor>,
    /// Call deadline in milliseconds; 0 means no deadline
    pub request_timeout: u64,
    /// Retry attempts after a transient call failure
    pub request_retry: u32,
    /// Call-depth bound; 0 means unlimited
    pub max_call_level: u32,
    /// Heartbeat emission period, in seconds
    pub heartbeat_interval: u64,
    /// Staleness threshold for remote nodes, in seconds
    pub heartbeat_timeout: u64,
    /// Disables staleness eviction and strategy selection; calls go to any
    /// known instance
    pub disable_balancer: bool,
    pub registry: RegistryOptions,
    pub circuit_breaker: CircuitBreakerOptions,
    pub retry_backoff: RetryBackoffOptions,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            namespace: "dev".to_string(),
            node_id: None,
            metadata: Map::new(),
            transporter: None,
            cacher: None,
            serializer: None,
            request_timeout: 0,
            request_retry: 0,
            max_call_level: 0,
            heartbeat_interval: 5,
            heartbeat_timeout: 15,
            disable_balancer: false,
            registry: RegistryOptions::default(),
            circuit_breaker: CircuitBreakerOptions::default(),
            retry_backoff: RetryBackoffOptions::default(),
        }
    }
}

/// Registry / balancing options.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RegistryOptions {
    /// Balancing strategy descriptor
    pub strategy: StrategyDescriptor,
    /// Always prefer a local instance over remote candidates
    pub prefer_local: bool,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            strategy: ConfigDescriptor::name("RoundRobin"),
            prefer_local: true,
        }
    }
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CircuitBreakerOptions {
    pub enabled: bool,
    /// Failures within the window before the breaker trips
    pub max_failures: u32,
    /// Delay before an open breaker admits a probe, in milliseconds
    pub half_open_time: u64,
    /// Rolling failure window, in seconds
    pub window_time: u64,
    /// A request timeout counts as a failure
    pub failure_on_timeout: bool,
    /// A rejected or errored response counts as a failure
    pub failure_on_reject: bool,
}

impl Default for CircuitBreakerOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            max_failures: 3,
            half_open_time: 10_000,
            window_time: 60,
            failure_on_timeout: true,
            failure_on_reject: true,
        }
    }
}

/// Exponential backoff between retry attempts.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryBackoffOptions {
    /// First retry waits this long, in milliseconds
    pub delay: u64,
    /// Backoff cap, in milliseconds
    pub max_delay: u64,
    /// Each retry waits `previous * factor`
    pub factor: f64,
}

impl Default for RetryBackoffOptions {
    fn default() -> Self {
        Self {
            delay: 100,
            max_delay: 2000,
            factor: 2.0,
        }
    }
}

/// Immutable resilience snapshot derived from a validated [`BrokerConfig`].
///
/// A zero `request_timeout` means no deadline; a zero `max_call_level` means
/// unlimited depth.
#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    pub namespace: String,
    pub node_id: String,
    pub request_timeout: Duration,
    pub request_retry: u32,
    pub max_call_level: u32,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub disable_balancer: bool,
    pub prefer_local: bool,
    pub breaker: BreakerSettings,
    pub backoff: BackoffSettings,
}

/// Circuit breaker thresholds with durations pre-computed.
#[derive(Debug, Clone)]
pub struct BreakerSettings {
    pub enabled: bool,
    pub max_failures: u32,
    pub half_open_time: Duration,
    pub window_time: Duration,
    pub failure_on_timeout: bool,
    pub failure_on_reject: bool,
}

/// Retry backoff settings with durations pre-computed.
#[derive(Debug, Clone)]
pub struct BackoffSettings {
    pub delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
}

impl BackoffSettings {
    /// Next backoff after `current`, capped at `max_delay`.
    pub fn next(&self, current: Duration) -> Duration {
        let grown = current.mul_f64(self.factor.max(1.0));
        grown.min(self.max_delay)
    }
}

impl BrokerConfig {
    /// Validates the timing and threshold fields and freezes them into a
    /// [`ResilienceConfig`]. An invalid configuration aborts startup; there
    /// is no degraded mode.
    pub fn resilience(&self) -> Result<ResilienceConfig> {
        if self.heartbeat_interval == 0 {
            return Err(FilamentError::ConfigResolution(
                "heartbeatInterval must be at least 1 second".to_string(),
            ));
        }
        // A timeout at or below the interval would declare every node stale
        // right after its own heartbeat.
        if self.heartbeat_timeout <= self.heartbeat_interval {
            return Err(FilamentError::ConfigResolution(format!(
                "heartbeatTimeout ({}s) must be greater than heartbeatInterval ({}s)",
                self.heartbeat_timeout, self.heartbeat_interval
            )));
        }
        if self.circuit_breaker.enabled && self.circuit_breaker.max_failures == 0 {
            return Err(FilamentError::ConfigResolution(
                "circuitBreaker.maxFailures must be at least 1".to_string(),
            ));
        }
        if self.circuit_breaker.enabled && self.circuit_breaker.window_time == 0 {
            return Err(FilamentError::ConfigResolution(
                "circuitBreaker.windowTime must be at least 1 second".to_string(),
            ));
        }

        let node_id = match &self.node_id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => generate_node_id(),
        };

        Ok(ResilienceConfig {
            namespace: self.namespace.clone(),
            node_id,
            request_timeout: Duration::from_millis(self.request_timeout),
            request_retry: self.request_retry,
            max_call_level: self.max_call_level,
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval),
            heartbeat_timeout: Duration::from_secs(self.heartbeat_timeout),
            disable_balancer: self.disable_balancer,
            prefer_local: self.registry.prefer_local,
            breaker: BreakerSettings {
                enabled: self.circuit_breaker.enabled,
                max_failures: self.circuit_breaker.max_failures,
                half_open_time: Duration::from_millis(self.circuit_breaker.half_open_time),
                window_time: Duration::from_secs(self.circuit_breaker.window_time),
                failure_on_timeout: self.circuit_breaker.failure_on_timeout,
                failure_on_reject: self.circuit_breaker.failure_on_reject,
            },
            backoff: BackoffSettings {
                delay: Duration::from_millis(self.retry_backoff.delay),
                max_delay: Duration::from_millis(self.retry_backoff.max_delay),
                factor: self.retry_backoff.factor,
            },
        })
    }
}

/// Autogenerated local node identity: process id plus a short random suffix,
/// so restarts and co-located brokers never collide.
fn generate_node_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("node-{}-{}", std::process::id(), &suffix[..8])
}
