//! Heartbeat emission and staleness detection.
//!
//! The monitor runs on its own periodic timer, fully decoupled from the call
//! path. Each tick gossips the local node's full state to every known peer,
//! sweeps stale nodes out of the registry and prunes quiet breaker entries.
//! Registry locks are never held across a publish.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::debug;

use filament_common::protocol::Heartbeat;
use filament_common::transport::Transporter;

use crate::breaker::CircuitBreaker;
use crate::config::ResilienceConfig;
use crate::registry::NodeRegistry;

/// Closed breaker entries with no activity for this long are collected on
/// the heartbeat tick.
const BREAKER_IDLE: Duration = Duration::from_secs(300);

/// Periodic heartbeat task.
pub struct HeartbeatMonitor {
    config: Arc<ResilienceConfig>,
    registry: Arc<RwLock<NodeRegistry>>,
    breaker: Arc<CircuitBreaker>,
    transporter: Arc<dyn Transporter>,
    sequence: AtomicU64,
}

impl HeartbeatMonitor {
    pub fn new(
        config: Arc<ResilienceConfig>,
        registry: Arc<RwLock<NodeRegistry>>,
        breaker: Arc<CircuitBreaker>,
        transporter: Arc<dyn Transporter>,
    ) -> Self {
        Self {
            config,
            registry,
            breaker,
            transporter,
            sequence: AtomicU64::new(0),
        }
    }

    /// Starts the monitor task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(self) {
        let mut interval = tokio::time::interval(self.config.heartbeat_interval);
        loop {
            interval.tick().await;
            self.tick().await;
        }
    }

    /// One monitor pass: emit, evict, prune. Public so embedders (and tests)
    /// can drive the monitor without the timer.
    pub async fn tick(&self) {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;

        // Snapshot the local state and the peer list; the lock is released
        // before any publish suspends
        let (beat, peers) = {
            let mut registry = self.registry.write().await;
            registry.touch_local(Instant::now());
            let beat = Heartbeat {
                namespace: self.config.namespace.clone(),
                node_id: self.config.node_id.clone(),
                sequence,
                services: registry.local_adverts(),
                metadata: registry.local_metadata().clone(),
            };
            (beat, registry.remote_addresses())
        };

        let mut peers = peers;
        if let Some(seed) = self.transporter.seed() {
            if !peers.contains(&seed) {
                peers.push(seed);
            }
        }

        let publishes = peers.iter().map(|addr| {
            let beat = &beat;
            async move { (addr.clone(), self.transporter.publish_heartbeat(addr, beat).await) }
        });
        for (addr, result) in join_all(publishes).await {
            if let Err(error) = result {
                debug!("Heartbeat to {} failed: {}", addr, error);
            }
        }

        // Staleness sweep; the registry logs evictions itself
        self.registry.write().await.evict_stale(Instant::now());
        self.breaker.prune_idle(BREAKER_IDLE, Instant::now());
    }
}
