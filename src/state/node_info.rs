//! Node Information
//!
//! One entry of the membership table: a peer's endpoint, its epoch and a
//! small set of versioned properties. The liveness of the peer is itself a
//! property (`node_state`) so it is versioned and gossiped like any other.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

/// Reserved property key holding the node's [`NodeState`]
pub const NODE_STATE_KEY: &str = "node_state";

/// Liveness of a node as seen by the local process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeState {
    /// Never successfully contacted
    Unknown,
    /// Reachable and participating
    Live,
    /// Presumed failed
    Dead,
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeState::Unknown => write!(f, "UNKNOWN"),
            NodeState::Live => write!(f, "LIVE"),
            NodeState::Dead => write!(f, "DEAD"),
        }
    }
}

/// Peer address, the unique key of the membership table.
///
/// Endpoints compare case-insensitively, so the host part is lowercased on
/// construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Endpoint(String);

impl Endpoint {
    /// Create a normalized endpoint
    pub fn new(address: impl AsRef<str>) -> Self {
        Self(address.as_ref().trim().to_ascii_lowercase())
    }

    /// Borrow the address
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Endpoint {
    fn from(s: String) -> Self {
        Endpoint::new(s)
    }
}

impl From<&str> for Endpoint {
    fn from(s: &str) -> Self {
        Endpoint::new(s)
    }
}

impl From<Endpoint> for String {
    fn from(e: Endpoint) -> Self {
        e.0
    }
}

/// Value carried by a versioned property
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyValue {
    /// Node liveness (only under [`NODE_STATE_KEY`])
    State(NodeState),
    /// Free-form application metadata
    Text(String),
}

impl std::fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PropertyValue::State(s) => write!(f, "{}", s),
            PropertyValue::Text(t) => write!(f, "{}", t),
        }
    }
}

/// A property value together with its monotonic version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedProperty {
    pub value: PropertyValue,
    pub version: u64,
}

impl VersionedProperty {
    pub fn new(value: PropertyValue, version: u64) -> Self {
        Self { value, version }
    }

    pub fn state(state: NodeState, version: u64) -> Self {
        Self::new(PropertyValue::State(state), version)
    }

    pub fn text(value: impl Into<String>, version: u64) -> Self {
        Self::new(PropertyValue::Text(value.into()), version)
    }
}

/// Compact digest of a [`NodeInformation`] exchanged instead of full data
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeInformationSynopsis {
    pub endpoint: Endpoint,
    pub node_version: u64,
    pub last_known_property_version: u64,
}

/// What [`NodeInformation::update`] did with the incoming entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Same epoch, properties merged one by one
    Merged { applied: usize },
    /// Newer epoch, local entry replaced wholesale
    Replaced,
    /// Older epoch, incoming entry dropped
    Discarded,
}

/// Epoch of this process: wall-clock milliseconds captured on first use.
pub fn process_epoch() -> u64 {
    static EPOCH: OnceLock<u64> = OnceLock::new();
    *EPOCH.get_or_init(|| chrono::Utc::now().timestamp_millis().max(1) as u64)
}

/// Known state of a single node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInformation {
    /// Peer address
    pub endpoint: Endpoint,
    /// Incarnation of the peer; a higher epoch supersedes all older data
    pub node_version: u64,
    /// Versioned properties, always including `node_state` for table entries
    pub properties: BTreeMap<String, VersionedProperty>,
}

impl NodeInformation {
    /// Entry for the local process: current epoch, `Live` at version 1
    pub fn create_self_node(endpoint: impl Into<Endpoint>) -> Self {
        Self::create_self_node_with_epoch(endpoint, process_epoch())
    }

    /// Entry for the local process with an explicit epoch
    pub fn create_self_node_with_epoch(endpoint: impl Into<Endpoint>, epoch: u64) -> Self {
        let mut properties = BTreeMap::new();
        properties.insert(
            NODE_STATE_KEY.to_string(),
            VersionedProperty::state(NodeState::Live, 1),
        );
        Self {
            endpoint: endpoint.into(),
            node_version: epoch,
            properties,
        }
    }

    /// Placeholder for a seed we have not talked to yet
    pub fn create_seed_node(endpoint: impl Into<Endpoint>) -> Self {
        let mut properties = BTreeMap::new();
        properties.insert(
            NODE_STATE_KEY.to_string(),
            VersionedProperty::state(NodeState::Unknown, 0),
        );
        Self {
            endpoint: endpoint.into(),
            node_version: 0,
            properties,
        }
    }

    /// Entry with no properties, used as the base of deltas
    fn empty(endpoint: Endpoint, node_version: u64) -> Self {
        Self {
            endpoint,
            node_version,
            properties: BTreeMap::new(),
        }
    }

    pub fn node_state_property(&self) -> Option<&VersionedProperty> {
        self.properties.get(NODE_STATE_KEY)
    }

    /// Current liveness, `Unknown` when the entry carries no state
    pub fn node_state(&self) -> NodeState {
        match self.node_state_property() {
            Some(VersionedProperty {
                value: PropertyValue::State(state),
                ..
            }) => *state,
            _ => NodeState::Unknown,
        }
    }

    /// Highest version across all properties (0 if empty)
    pub fn last_known_property_version(&self) -> u64 {
        self.properties
            .values()
            .map(|p| p.version)
            .max()
            .unwrap_or(0)
    }

    /// Raise the `node_state` version above every other property.
    pub fn bump_version(&mut self) {
        let next = self.last_known_property_version() + 1;
        let state = self.node_state();
        self.properties
            .entry(NODE_STATE_KEY.to_string())
            .and_modify(|p| p.version = next)
            .or_insert_with(|| VersionedProperty::state(state, next));
    }

    /// Set the node state and bump its version.
    ///
    /// Returns the previous state.
    pub fn set_node_state(&mut self, state: NodeState) -> NodeState {
        let previous = self.node_state();
        let next = self.last_known_property_version() + 1;
        self.properties.insert(
            NODE_STATE_KEY.to_string(),
            VersionedProperty::state(state, next),
        );
        previous
    }

    /// Set a text property at a version newer than anything known.
    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) -> u64 {
        let next = self.last_known_property_version() + 1;
        self.properties
            .insert(key.into(), VersionedProperty::text(value, next));
        next
    }

    pub fn synopsis(&self) -> NodeInformationSynopsis {
        NodeInformationSynopsis {
            endpoint: self.endpoint.clone(),
            node_version: self.node_version,
            last_known_property_version: self.last_known_property_version(),
        }
    }

    /// What this node must send to a peer that reported `peer`.
    pub fn get_delta(&self, peer: &NodeInformationSynopsis) -> NodeInformation {
        let mut delta = Self::empty(self.endpoint.clone(), self.node_version);

        if self.node_version < peer.node_version {
            tracing::warn!(
                endpoint = %self.endpoint,
                "Peer claims epoch {} newer than our {}, sending empty delta",
                peer.node_version,
                self.node_version
            );
        } else if self.node_version > peer.node_version {
            delta.properties = self.properties.clone();
        } else {
            delta.properties = self
                .properties
                .iter()
                .filter(|(_, p)| p.version > peer.last_known_property_version)
                .map(|(k, p)| (k.clone(), p.clone()))
                .collect();
        }

        delta
    }

    /// Merge `other` into this entry.
    ///
    /// Same epoch merges per property (higher version wins, equal versions
    /// are no-ops, unknown keys are added). A newer epoch replaces the entry.
    /// An older epoch is dropped.
    pub fn update(&mut self, other: &NodeInformation) -> UpdateOutcome {
        if self.node_version == other.node_version {
            let mut applied = 0;
            for (key, incoming) in &other.properties {
                match self.properties.get(key) {
                    Some(local) if local.version < incoming.version => {
                        tracing::debug!(
                            endpoint = %self.endpoint,
                            "Property {} updated to {} (v{})",
                            key, incoming.value, incoming.version
                        );
                        self.properties.insert(key.clone(), incoming.clone());
                        applied += 1;
                    }
                    Some(local) if local.version > incoming.version => {
                        tracing::debug!(
                            endpoint = %self.endpoint,
                            "Discard incoming property {} because our version is higher ({} > {})",
                            key, local.version, incoming.version
                        );
                    }
                    Some(local) => {
                        tracing::trace!(
                            endpoint = %self.endpoint,
                            "Discard incoming property {} because the version is the same ({})",
                            key, local.version
                        );
                    }
                    None => {
                        tracing::debug!(
                            endpoint = %self.endpoint,
                            "Property {} added with {} (v{})",
                            key, incoming.value, incoming.version
                        );
                        self.properties.insert(key.clone(), incoming.clone());
                        applied += 1;
                    }
                }
            }
            UpdateOutcome::Merged { applied }
        } else if self.node_version < other.node_version {
            tracing::debug!(
                endpoint = %self.endpoint,
                "Epoch advanced {} -> {}, replacing entry",
                self.node_version,
                other.node_version
            );
            self.node_version = other.node_version;
            self.properties = other.properties.clone();
            UpdateOutcome::Replaced
        } else {
            tracing::debug!(
                endpoint = %self.endpoint,
                "Discard incoming node information because our epoch is higher ({} > {})",
                self.node_version,
                other.node_version
            );
            UpdateOutcome::Discarded
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENDPOINT: &str = "127.0.0.1:12251";
    const EPOCH: u64 = 1_700_000_000_000;

    fn self_node_with(props: &[(&str, &str, u64)]) -> NodeInformation {
        let mut n = NodeInformation::create_self_node_with_epoch(ENDPOINT, EPOCH);
        for (k, v, version) in props {
            n.properties
                .insert(k.to_string(), VersionedProperty::text(*v, *version));
        }
        n
    }

    #[test]
    fn test_self_node_initial_state() {
        let n = NodeInformation::create_self_node(ENDPOINT);
        assert_eq!(n.endpoint.as_str(), ENDPOINT);
        assert_eq!(n.node_state(), NodeState::Live);
        assert_eq!(n.node_version, process_epoch());
        assert_eq!(n.last_known_property_version(), 1);
        assert_eq!(n.properties.len(), 1);
    }

    #[test]
    fn test_seed_node_initial_state() {
        let n = NodeInformation::create_seed_node(ENDPOINT);
        assert_eq!(n.node_state(), NodeState::Unknown);
        assert_eq!(n.node_version, 0);
        assert_eq!(n.last_known_property_version(), 0);
        assert_eq!(n.properties.len(), 1);
    }

    #[test]
    fn test_endpoint_is_case_insensitive() {
        assert_eq!(Endpoint::new("Node-A:7946"), Endpoint::new("node-a:7946"));
    }

    #[test]
    fn test_bump_version() {
        let mut n = self_node_with(&[("test_key", "test_value", 5)]);
        assert_eq!(n.last_known_property_version(), 5);

        n.bump_version();
        assert_eq!(n.last_known_property_version(), 6);

        n.properties
            .insert("test_key2".into(), VersionedProperty::text("test_value2", 9));
        assert_eq!(n.last_known_property_version(), 9);

        n.bump_version();
        assert_eq!(n.last_known_property_version(), 10);

        n.properties.get_mut("test_key").unwrap().version = 7;
        assert_eq!(n.last_known_property_version(), 10);

        n.bump_version();
        assert_eq!(n.last_known_property_version(), 11);
        assert_eq!(n.node_state_property().unwrap().version, 11);
    }

    #[test]
    fn test_get_synopsis() {
        let n = self_node_with(&[("test_key", "test_value", 5), ("test_key2", "test_value2", 9)]);
        let s = n.synopsis();
        assert_eq!(s.endpoint.as_str(), ENDPOINT);
        assert_eq!(s.node_version, EPOCH);
        assert_eq!(s.last_known_property_version, 9);
    }

    #[test]
    fn test_set_node_state_bumps_version() {
        let mut n = self_node_with(&[("role", "db", 4)]);
        let previous = n.set_node_state(NodeState::Dead);
        assert_eq!(previous, NodeState::Live);
        assert_eq!(n.node_state(), NodeState::Dead);
        assert_eq!(n.node_state_property().unwrap().version, 5);
    }

    #[test]
    fn test_update_initial_seed_node() {
        let mut n = NodeInformation::create_seed_node(ENDPOINT);
        let mut n2 = NodeInformation::create_self_node_with_epoch(ENDPOINT, EPOCH);

        assert_eq!(n.update(&n2), UpdateOutcome::Replaced);
        assert_eq!(n.node_version, n2.node_version);
        assert_eq!(n.node_state(), n2.node_state());
        assert_eq!(n.last_known_property_version(), 1);

        n2.properties
            .insert("test_key".into(), VersionedProperty::text("test_value", 5));
        n2.properties
            .insert("test_key2".into(), VersionedProperty::text("test_value2", 9));
        n2.bump_version();

        assert_eq!(n.update(&n2), UpdateOutcome::Merged { applied: 3 });
        assert_eq!(n, n2);
    }

    #[test]
    fn test_update_with_older_epoch_is_discarded() {
        let mut n = self_node_with(&[("test_key", "test_value", 5), ("test_key2", "test_value2", 9)]);
        let mut older = NodeInformation::create_self_node_with_epoch(ENDPOINT, EPOCH - 1);
        older
            .properties
            .insert("test_key".into(), VersionedProperty::text("newer?", 50));

        let origin = n.clone();
        assert_eq!(n.update(&older), UpdateOutcome::Discarded);
        assert_eq!(n, origin);
    }

    #[test]
    fn test_update_with_newer_epoch_replaces() {
        let mut n = self_node_with(&[("test_key", "test_value", 5), ("test_key2", "test_value2", 9)]);
        let mut newer = NodeInformation::create_self_node_with_epoch(ENDPOINT, EPOCH + 1);
        newer
            .properties
            .insert("test_key".into(), VersionedProperty::text("test_value", 2));

        assert_eq!(n.update(&newer), UpdateOutcome::Replaced);
        assert_eq!(n, newer);
        assert!(!n.properties.contains_key("test_key2"));
    }

    #[test]
    fn test_update_delta_with_additions_and_stale_values() {
        let mut n = self_node_with(&[("k1", "v", 5), ("k2", "v2", 9), ("k3", "v3", 10)]);
        let origin = n.clone();

        let mut incoming = NodeInformation::create_self_node_with_epoch(ENDPOINT, EPOCH);
        incoming.properties.clear();
        incoming
            .properties
            .insert("k1".into(), VersionedProperty::text("v1", 11));
        incoming
            .properties
            .insert("k3".into(), VersionedProperty::text("v3_old", 6));
        incoming
            .properties
            .insert("k4".into(), VersionedProperty::text("v4", 12));

        assert_eq!(n.update(&incoming), UpdateOutcome::Merged { applied: 2 });
        assert_eq!(n.node_version, EPOCH);
        assert_eq!(n.properties["k1"], incoming.properties["k1"]);
        assert_eq!(n.properties["k2"], origin.properties["k2"]);
        assert_eq!(n.properties["k3"], origin.properties["k3"]);
        assert_eq!(n.properties["k4"], incoming.properties["k4"]);
        // four application properties plus node_state
        assert_eq!(n.properties.len(), 5);
        assert_eq!(n.last_known_property_version(), 12);
    }

    #[test]
    fn test_get_delta_for_stale_epoch_returns_everything() {
        let n = self_node_with(&[("test_key", "test_value", 5), ("test_key2", "test_value2", 9)]);
        let peer = NodeInformationSynopsis {
            endpoint: Endpoint::new(ENDPOINT),
            node_version: EPOCH - 1,
            last_known_property_version: 100,
        };

        assert_eq!(n.get_delta(&peer), n);
    }

    #[test]
    fn test_get_delta_for_same_epoch_is_minimal() {
        let n = self_node_with(&[("test_key", "test_value", 5), ("test_key2", "test_value2", 9)]);
        let peer = NodeInformationSynopsis {
            endpoint: Endpoint::new(ENDPOINT),
            node_version: EPOCH,
            last_known_property_version: 6,
        };

        let delta = n.get_delta(&peer);
        assert_eq!(delta.properties.len(), 1);
        assert_eq!(delta.properties["test_key2"], n.properties["test_key2"]);
    }

    #[test]
    fn test_get_delta_never_includes_known_versions() {
        let n = self_node_with(&[("a", "1", 2), ("b", "2", 3), ("c", "3", 7), ("d", "4", 8)]);
        for v in 0..10 {
            let peer = NodeInformationSynopsis {
                endpoint: Endpoint::new(ENDPOINT),
                node_version: EPOCH,
                last_known_property_version: v,
            };
            let delta = n.get_delta(&peer);
            assert!(delta.properties.values().all(|p| p.version > v));
            let expected = n.properties.values().filter(|p| p.version > v).count();
            assert_eq!(delta.properties.len(), expected);
        }
    }

    #[test]
    fn test_get_delta_for_newer_peer_epoch_is_empty() {
        let n = self_node_with(&[("test_key", "test_value", 5)]);
        let peer = NodeInformationSynopsis {
            endpoint: Endpoint::new(ENDPOINT),
            node_version: EPOCH + 1,
            last_known_property_version: 0,
        };

        let delta = n.get_delta(&peer);
        assert!(delta.properties.is_empty());
        assert_eq!(delta.node_version, EPOCH);
    }

    #[test]
    fn test_exchanging_deltas_converges() {
        // b is a replica that has seen the owner's history up to version 3
        let mut a = self_node_with(&[("x", "x1", 3), ("y", "y1", 8), ("z", "z1", 5)]);
        let mut b = self_node_with(&[("x", "x1", 3)]);

        let a_to_b = a.get_delta(&b.synopsis());
        let b_to_a = b.get_delta(&a.synopsis());
        assert_eq!(a_to_b.properties.len(), 2);
        assert!(b_to_a.properties.is_empty());

        b.update(&a_to_b);
        a.update(&b_to_a);
        assert_eq!(a, b);
    }

    #[test]
    fn test_full_exchange_keeps_higher_version_of_every_property() {
        let mut a = self_node_with(&[("x", "a-x", 3), ("y", "a-y", 8)]);
        let mut b = self_node_with(&[("x", "b-x", 6), ("z", "b-z", 4)]);

        let full = |n: &NodeInformation| NodeInformationSynopsis {
            last_known_property_version: 0,
            ..n.synopsis()
        };
        let a_to_b = a.get_delta(&full(&b));
        let b_to_a = b.get_delta(&full(&a));
        b.update(&a_to_b);
        a.update(&b_to_a);

        assert_eq!(a, b);
        assert_eq!(a.properties["x"], VersionedProperty::text("b-x", 6));
        assert_eq!(a.properties["y"], VersionedProperty::text("a-y", 8));
        assert_eq!(a.properties["z"], VersionedProperty::text("b-z", 4));
    }

    #[test]
    fn test_update_never_lowers_versions() {
        let mut n = self_node_with(&[("a", "1", 4), ("b", "2", 9)]);
        let before: Vec<u64> = n.properties.values().map(|p| p.version).collect();

        let mut incoming = n.clone();
        incoming.properties.insert("a".into(), VersionedProperty::text("old", 1));
        incoming.properties.insert("b".into(), VersionedProperty::text("old", 3));
        n.update(&incoming);

        let after: Vec<u64> = n.properties.values().map(|p| p.version).collect();
        assert!(before.iter().zip(after.iter()).all(|(b, a)| a >= b));
    }
}
