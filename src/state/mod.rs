//! State Management Module
//!
//! Versioned node information and the membership table built from it.

mod node;
mod node_info;

pub use node::{Node, NodeStateChanged};
pub use node_info::{
    process_epoch, Endpoint, NodeInformation, NodeInformationSynopsis, NodeState, PropertyValue,
    UpdateOutcome, VersionedProperty, NODE_STATE_KEY,
};
