//! Filament Broker — the service-mesh control plane.
//!
//! A broker is one node in the mesh. It knows which nodes exist and which
//! service instances they host ([`registry::NodeRegistry`]), announces itself
//! and watches the others through periodic heartbeats
//! ([`heartbeat::HeartbeatMonitor`]), picks a target for every outbound call
//! ([`strategy::Strategy`]), shields callers from failing endpoints
//! ([`breaker::CircuitBreaker`]) and orchestrates dispatch, timeout and retry
//! ([`invoker::CallInvoker`]).
//!
//! The pluggable facilities — transporter, cacher, serializer and balancing
//! strategy — are resolved once per configuration load by
//! [`resolve::ConfigResolver`] and replaced wholesale on reconfiguration,
//! never patched in place.
//!
//! # Example
//!
//! ```no_run
//! use filament_broker::{Broker, BrokerConfig};
//! use filament_broker::invoker::handler;
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = Broker::new(BrokerConfig::default())?;
//! broker
//!     .register_service(
//!         "math",
//!         vec![("add", handler(|params| async move {
//!             let a = params["a"].as_i64().unwrap_or(0);
//!             let b = params["b"].as_i64().unwrap_or(0);
//!             Ok(json!(a + b))
//!         }))],
//!     )
//!     .await;
//! broker.start().await;
//!
//! let sum = broker.call("math.add", json!({"a": 2, "b": 3})).await?;
//! assert_eq!(sum, json!(5));
//! broker.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod breaker;
pub mod broker;
pub mod config;
pub mod heartbeat;
pub mod invoker;
pub mod registry;
pub mod resolve;
pub mod strategy;

pub use breaker::{Admission, BreakerState, CircuitBreaker, EndpointKey, FailureKind};
pub use broker::Broker;
pub use config::{BrokerConfig, ResilienceConfig};
pub use heartbeat::HeartbeatMonitor;
pub use invoker::{ActionHandler, CallInvoker};
pub use registry::{Node, NodeRegistry, NodeStatus, ServiceInstance};
pub use resolve::{ConfigDescriptor, ConfigResolver};
pub use strategy::Strategy;

pub use filament_common::cache::cache_key;
pub use filament_common::protocol::{FilamentError, Result};
