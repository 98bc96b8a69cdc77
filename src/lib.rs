//! WolfGossip - Gossip-Based Cluster Membership
//!
//! A peer-to-peer membership service: every node keeps a versioned view of
//! the whole cluster and reconciles it with one random peer per round.
//!
//! # Architecture
//!
//! Each node owns a membership table of versioned node information. Once
//! per gossip interval it picks a peer and runs a three-message push-pull
//! exchange (Ping1 / Ping2) that ships only the properties the other side
//! is missing. A peer that cannot be reached directly is probed through a
//! live forwarder before it is declared dead.
//!
//! # Features
//!
//! - Last-writer-wins property merge keyed by node epoch and property version
//! - Delta-only anti-entropy exchange
//! - Indirect probing through a forwarder before marking a peer dead
//! - Static or launcher-based seed discovery with bootstrap back-off
//! - State-change notifications over a broadcast channel
//! - Read-only HTTP API for the membership table

pub mod api;
pub mod config;
pub mod discovery;
pub mod error;
pub mod gossip;
pub mod network;
pub mod state;

pub use config::WolfGossipConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::WolfGossipConfig;
    pub use crate::discovery::{SeedProvider, StaticSeeds};
    pub use crate::error::{Error, Result};
    pub use crate::gossip::{
        Cluster, ClusterBootstrapper, ClusterOptions, GossipService, PeerClient, PeerClientFactory,
    };
    pub use crate::network::{NetworkClientFactory, NetworkServer};
    pub use crate::state::{Endpoint, Node, NodeInformation, NodeState, NodeStateChanged};
}
