//! Gossip Protocol
//!
//! Request/response payloads of the three RPCs (Ping1, Ping2, Forward) and
//! the wire message that carries them between nodes.

use serde::{Deserialize, Serialize};

use crate::state::{Endpoint, NodeInformation, NodeInformationSynopsis};

/// Syn: the initiator's synopsis of every node it knows
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping1Request {
    pub nodes_synopsis: Vec<NodeInformationSynopsis>,
}

/// Syn answer: what the receiver wants, and what it has that we lack
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping1Response {
    pub required_nodes_synopsis: Vec<NodeInformationSynopsis>,
    pub updated_nodes: Vec<NodeInformation>,
}

/// Ack1: the data the receiver asked for
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping2Request {
    pub updated_nodes: Vec<NodeInformation>,
}

/// Ack2: empty acknowledgement
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping2Response {}

/// A call relayed through a forwarder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForwardCall {
    Ping1(Ping1Request),
    Ping2(Ping2Request),
}

impl ForwardCall {
    pub fn method_name(&self) -> &'static str {
        match self {
            ForwardCall::Ping1(_) => "Ping1",
            ForwardCall::Ping2(_) => "Ping2",
        }
    }
}

/// Ask a forwarder to call `target_endpoint` on our behalf
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardRequest {
    pub target_endpoint: Endpoint,
    pub call: ForwardCall,
}

/// Result of a relayed call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForwardResponse {
    Ping1(Ping1Response),
    Ping2(Ping2Response),
    /// The relayed call failed at the forwarder
    Error(String),
}

/// Protocol messages for node communication
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    Ping1Request(Ping1Request),
    Ping1Response(Ping1Response),
    Ping2Request(Ping2Request),
    Ping2Response(Ping2Response),
    ForwardRequest(ForwardRequest),
    ForwardResponse(ForwardResponse),

    /// Error response
    Error { message: String },
}

impl Message {
    /// Serialize message to bytes
    pub fn serialize(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize message from bytes
    pub fn deserialize(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }

    /// Get the message type name (for logging)
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::Ping1Request(_) => "Ping1Request",
            Message::Ping1Response(_) => "Ping1Response",
            Message::Ping2Request(_) => "Ping2Request",
            Message::Ping2Response(_) => "Ping2Response",
            Message::ForwardRequest(_) => "ForwardRequest",
            Message::ForwardResponse(_) => "ForwardResponse",
            Message::Error { .. } => "Error",
        }
    }
}

/// Frame header for length-prefixed messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Body length
    pub length: u32,
    /// CRC32 of the body
    pub checksum: u32,
}

impl FrameHeader {
    /// Header size in bytes
    pub const SIZE: usize = 8;

    /// Create a new frame header
    pub fn new(data: &[u8]) -> Self {
        Self {
            length: data.len() as u32,
            checksum: crc32fast::hash(data),
        }
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.length.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        bytes
    }

    /// Deserialize header from bytes
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        Self {
            length: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            checksum: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }
}
