//! Membership Table
//!
//! The full set of nodes this process knows about, plus the three-phase
//! handshake (`syn` / `ack1` / `ack2`) that reconciles it with a peer.
//!
//! Every operation takes the single table lock, does its work and releases
//! it before any state-change event is published. The lock is never held
//! across a network call.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};

use super::node_info::{
    Endpoint, NodeInformation, NodeInformationSynopsis, NodeState, VersionedProperty,
    NODE_STATE_KEY,
};
use crate::error::{Error, Result};
use crate::gossip::protocol::{Ping1Request, Ping1Response, Ping2Request, Ping2Response};

/// Capacity of the state-change broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 1024;

type Table = HashMap<Endpoint, NodeInformation>;

/// A node's liveness changed in the local table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStateChanged {
    pub endpoint: Endpoint,
    pub previous: NodeState,
    pub current: NodeState,
}

/// Local membership table
pub struct Node {
    /// This node's endpoint
    endpoint: Endpoint,
    /// All known nodes (including self)
    table: Mutex<Table>,
    /// State-change notifications
    events: broadcast::Sender<NodeStateChanged>,
}

impl Node {
    /// Create a table holding only the self entry
    pub fn new(self_info: NodeInformation) -> Self {
        Self::with_seeds(self_info, Vec::<Endpoint>::new())
    }

    /// Create a table holding the self entry and a placeholder per seed
    pub fn with_seeds<I, E>(self_info: NodeInformation, seeds: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: Into<Endpoint>,
    {
        let endpoint = self_info.endpoint.clone();
        let mut table = HashMap::new();
        table.insert(endpoint.clone(), self_info);

        for seed in seeds {
            let seed = seed.into();
            if seed == endpoint {
                tracing::debug!("Skipping seed {} (that's us)", seed);
                continue;
            }
            table
                .entry(seed.clone())
                .or_insert_with(|| NodeInformation::create_seed_node(seed));
        }

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            endpoint,
            table: Mutex::new(table),
            events,
        }
    }

    /// Add a placeholder for every seed not in the table yet.
    ///
    /// Returns how many were added.
    pub async fn add_seeds<I, E>(&self, seeds: I) -> usize
    where
        I: IntoIterator<Item = E>,
        E: Into<Endpoint>,
    {
        let mut table = self.table.lock().await;
        let mut added = 0;
        for seed in seeds {
            let seed = seed.into();
            if seed != self.endpoint && !table.contains_key(&seed) {
                table.insert(seed.clone(), NodeInformation::create_seed_node(seed));
                added += 1;
            }
        }
        added
    }

    /// Get this node's endpoint
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Subscribe to state-change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<NodeStateChanged> {
        self.events.subscribe()
    }

    /// Number of entries, self included
    pub async fn len(&self) -> usize {
        self.table.lock().await.len()
    }

    /// Live peers, self excluded
    pub async fn live_endpoints(&self) -> Vec<Endpoint> {
        let table = self.table.lock().await;
        table
            .values()
            .filter(|n| n.endpoint != self.endpoint && n.node_state() == NodeState::Live)
            .map(|n| n.endpoint.clone())
            .collect()
    }

    /// Unknown or dead peers, self excluded
    pub async fn non_live_endpoints(&self) -> Vec<Endpoint> {
        let table = self.table.lock().await;
        table
            .values()
            .filter(|n| n.endpoint != self.endpoint && n.node_state() != NodeState::Live)
            .map(|n| n.endpoint.clone())
            .collect()
    }

    /// Synopsis of every entry, self included
    pub async fn nodes_synopsis(&self) -> Vec<NodeInformationSynopsis> {
        let table = self.table.lock().await;
        table.values().map(NodeInformation::synopsis).collect()
    }

    /// Snapshot of every entry
    pub async fn known_nodes(&self) -> Vec<NodeInformation> {
        let table = self.table.lock().await;
        let mut nodes: Vec<NodeInformation> = table.values().cloned().collect();
        nodes.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        nodes
    }

    /// Get a single entry
    pub async fn get(&self, endpoint: &Endpoint) -> Option<NodeInformation> {
        self.table.lock().await.get(endpoint).cloned()
    }

    /// Get this node's own entry
    pub async fn self_info(&self) -> Option<NodeInformation> {
        self.get(&self.endpoint).await
    }

    /// Set a node's state, bumping the `node_state` version.
    pub async fn assign_node_state(&self, endpoint: &Endpoint, state: NodeState) -> Result<()> {
        let event = {
            let mut table = self.table.lock().await;
            let node = table
                .get_mut(endpoint)
                .ok_or_else(|| Error::NodeNotFound(endpoint.to_string()))?;
            let previous = node.set_node_state(state);
            (previous != state).then(|| NodeStateChanged {
                endpoint: endpoint.clone(),
                previous,
                current: state,
            })
        };

        if let Some(event) = event {
            self.publish(vec![event]);
        }
        Ok(())
    }

    /// Set an application property on the self entry.
    ///
    /// Returns the version the property was written at.
    pub async fn set_local_property(&self, key: &str, value: &str) -> Result<u64> {
        if key == NODE_STATE_KEY {
            return Err(Error::Internal(format!("{} is a reserved property", NODE_STATE_KEY)));
        }
        let mut table = self.table.lock().await;
        let node = table
            .get_mut(&self.endpoint)
            .ok_or_else(|| Error::NodeNotFound(self.endpoint.to_string()))?;
        Ok(node.set_property(key, value))
    }

    /// First handshake step, run by the receiver of a Ping1.
    pub async fn syn(&self, request: &Ping1Request) -> Ping1Response {
        let table = self.table.lock().await;
        let mut response = Ping1Response::default();

        let mut seen = HashSet::new();
        for synopsis in &request.nodes_synopsis {
            seen.insert(&synopsis.endpoint);
            compare_synopsis(
                &table,
                synopsis,
                Some(&mut response.required_nodes_synopsis),
                &mut response.updated_nodes,
            );
        }

        // Entries the peer never mentioned: this is how membership spreads
        for node in table.values() {
            if !seen.contains(&node.endpoint) {
                response.updated_nodes.push(node.clone());
            }
        }

        tracing::trace!(
            "Syn: {} synopses in, {} required, {} updated",
            request.nodes_synopsis.len(),
            response.required_nodes_synopsis.len(),
            response.updated_nodes.len()
        );

        response
    }

    /// Second handshake step, run by the initiator on the Ping1 response.
    pub async fn ack1(&self, response: &Ping1Response) -> Ping2Request {
        let mut events = Vec::new();
        let mut request = Ping2Request::default();
        {
            let mut table = self.table.lock().await;
            merge_nodes(&mut table, &response.updated_nodes, &mut events);
            mark_live(&mut table, &self.endpoint, &mut events);

            for synopsis in &response.required_nodes_synopsis {
                compare_synopsis(&table, synopsis, None, &mut request.updated_nodes);
            }
        }
        self.publish(events);

        tracing::trace!(
            "Ack1: merged {} nodes, sending {} nodes",
            response.updated_nodes.len(),
            request.updated_nodes.len()
        );

        request
    }

    /// Final handshake step, run by the receiver of a Ping2.
    pub async fn ack2(&self, request: &Ping2Request) -> Ping2Response {
        let mut events = Vec::new();
        {
            let mut table = self.table.lock().await;
            merge_nodes(&mut table, &request.updated_nodes, &mut events);
            mark_live(&mut table, &self.endpoint, &mut events);
        }
        self.publish(events);

        tracing::trace!("Ack2: merged {} nodes", request.updated_nodes.len());

        Ping2Response::default()
    }

    /// Merge a batch of entries into the table
    pub async fn merge(&self, nodes: &[NodeInformation]) {
        let mut events = Vec::new();
        {
            let mut table = self.table.lock().await;
            merge_nodes(&mut table, nodes, &mut events);
        }
        self.publish(events);
    }

    fn publish(&self, events: Vec<NodeStateChanged>) {
        for event in events {
            tracing::debug!(
                endpoint = %event.endpoint,
                "Node state changed {} -> {}",
                event.previous,
                event.current
            );
            // No subscribers is fine
            let _ = self.events.send(event);
        }
    }
}

/// Compare one incoming synopsis against the local entry.
///
/// Asks go to `required` (dropped when `None`), local data the peer lacks
/// goes to `updated`.
fn compare_synopsis(
    table: &Table,
    incoming: &NodeInformationSynopsis,
    required: Option<&mut Vec<NodeInformationSynopsis>>,
    updated: &mut Vec<NodeInformation>,
) {
    let ask = match table.get(&incoming.endpoint) {
        None => Some(NodeInformationSynopsis {
            endpoint: incoming.endpoint.clone(),
            node_version: 0,
            last_known_property_version: 0,
        }),
        Some(local) if local.node_version < incoming.node_version => Some(NodeInformationSynopsis {
            endpoint: incoming.endpoint.clone(),
            node_version: local.node_version,
            last_known_property_version: 0,
        }),
        Some(local) if local.node_version > incoming.node_version => {
            updated.push(local.clone());
            None
        }
        Some(local) => {
            let local_version = local.last_known_property_version();
            if local_version < incoming.last_known_property_version {
                Some(local.synopsis())
            } else {
                if local_version > incoming.last_known_property_version {
                    updated.push(local.get_delta(incoming));
                }
                None
            }
        }
    };

    if let (Some(ask), Some(required)) = (ask, required) {
        required.push(ask);
    }
}

fn merge_nodes(table: &mut Table, nodes: &[NodeInformation], events: &mut Vec<NodeStateChanged>) {
    for incoming in nodes {
        match table.get_mut(&incoming.endpoint) {
            Some(local) => {
                let previous = local.node_state();
                local.update(incoming);
                let current = local.node_state();
                if previous != current {
                    events.push(NodeStateChanged {
                        endpoint: local.endpoint.clone(),
                        previous,
                        current,
                    });
                }
            }
            None => {
                let mut node = incoming.clone();
                node.properties
                    .entry(NODE_STATE_KEY.to_string())
                    .or_insert_with(|| VersionedProperty::state(NodeState::Unknown, 0));
                let current = node.node_state();
                tracing::debug!(endpoint = %node.endpoint, "Learned about new node ({})", current);
                if current != NodeState::Unknown {
                    events.push(NodeStateChanged {
                        endpoint: node.endpoint.clone(),
                        previous: NodeState::Unknown,
                        current,
                    });
                }
                table.insert(node.endpoint.clone(), node);
            }
        }
    }
}

/// A completed exchange proves we are reachable
fn mark_live(table: &mut Table, endpoint: &Endpoint, events: &mut Vec<NodeStateChanged>) {
    if let Some(node) = table.get_mut(endpoint) {
        let previous = node.set_node_state(NodeState::Live);
        if previous != NodeState::Live {
            events.push(NodeStateChanged {
                endpoint: endpoint.clone(),
                previous,
                current: NodeState::Live,
            });
        }
    }
}
