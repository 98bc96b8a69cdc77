//! Gossip Module
//!
//! Peer-to-peer anti-entropy: the inbound service, the periodic gossip loop
//! with indirect probing, and the seed bootstrapper.

pub mod protocol;
mod bootstrap;
mod cluster;
mod peer;
mod select;
mod service;

pub use bootstrap::ClusterBootstrapper;
pub use cluster::{Cluster, RoundOutcome};
pub use peer::{with_deadline, PeerClient, PeerClientFactory};
pub use protocol::{
    ForwardCall, ForwardRequest, ForwardResponse, FrameHeader, Message, Ping1Request,
    Ping1Response, Ping2Request, Ping2Response,
};
pub use select::{choose_forwarder, random_pick_node};
pub use service::GossipService;

use std::time::Duration;

/// Tuning knobs of the gossip engine
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterOptions {
    /// Interval between gossip rounds in milliseconds
    pub gossip_interval_ms: u64,
    /// Chance of probing a non-live node when live ones exist
    pub gossip_non_live_nodes_probability: f64,
    /// Deadline of a direct call in milliseconds
    pub ping_timeout_ms: u64,
    /// Deadline of a forwarded call in milliseconds
    pub forward_timeout_ms: u64,
    /// First bootstrap pause in milliseconds
    pub bootstrap_backoff_initial_ms: u64,
    /// Largest bootstrap pause in milliseconds
    pub bootstrap_backoff_max_ms: u64,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            gossip_interval_ms: 1000,
            gossip_non_live_nodes_probability: 0.1,
            ping_timeout_ms: 200,
            forward_timeout_ms: 500,
            bootstrap_backoff_initial_ms: 200,
            bootstrap_backoff_max_ms: 5000,
        }
    }
}

impl ClusterOptions {
    pub fn gossip_interval(&self) -> Duration {
        Duration::from_millis(self.gossip_interval_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn forward_timeout(&self) -> Duration {
        Duration::from_millis(self.forward_timeout_ms)
    }

    pub fn bootstrap_backoff_initial(&self) -> Duration {
        Duration::from_millis(self.bootstrap_backoff_initial_ms)
    }

    pub fn bootstrap_backoff_max(&self) -> Duration {
        Duration::from_millis(self.bootstrap_backoff_max_ms)
    }

    /// Pause after a round that overran the interval
    pub fn overrun_backoff(&self) -> Duration {
        self.gossip_interval() / 4
    }

    /// Sleep before the next round, given how long the last one took.
    ///
    /// The remainder of the interval, or `overrun_backoff` once a round has
    /// used the whole interval up.
    pub fn next_pause(&self, elapsed: Duration) -> Duration {
        let interval = self.gossip_interval();
        if elapsed >= interval {
            self.overrun_backoff()
        } else {
            interval - elapsed
        }
    }

    /// How long `Cluster::stop` waits for the loop to exit
    pub fn stop_timeout(&self) -> Duration {
        (self.gossip_interval() * 2).max(Duration::from_secs(1))
    }
}
