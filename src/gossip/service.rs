//! Gossip Service
//!
//! Server side of the protocol: answers Ping1/Ping2 from the local table and
//! relays Forward requests to their target.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::peer::PeerClientFactory;
use super::protocol::{
    ForwardCall, ForwardRequest, ForwardResponse, Message, Ping1Request, Ping1Response,
    Ping2Request, Ping2Response,
};
use super::ClusterOptions;
use crate::state::Node;

/// Inbound RPC handler
pub struct GossipService {
    node: Arc<Node>,
    factory: Arc<dyn PeerClientFactory>,
    /// Deadline of the call a forwarder makes to the target
    relay_timeout: Duration,
    cancel: CancellationToken,
}

impl GossipService {
    pub fn new(
        node: Arc<Node>,
        factory: Arc<dyn PeerClientFactory>,
        options: &ClusterOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            node,
            factory,
            relay_timeout: options.ping_timeout(),
            cancel,
        }
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    pub async fn ping1(&self, request: &Ping1Request) -> Ping1Response {
        self.node.syn(request).await
    }

    pub async fn ping2(&self, request: &Ping2Request) -> Ping2Response {
        self.node.ack2(request).await
    }

    /// Relay a call to `request.target_endpoint`.
    ///
    /// Failures are reported in the response, never as an error.
    pub async fn forward(&self, request: ForwardRequest) -> ForwardResponse {
        let target = request.target_endpoint;
        let method = request.call.method_name();
        tracing::debug!(endpoint = %target, "Forwarding {}", method);

        let client = self.factory.client(&target);
        let result = match request.call {
            ForwardCall::Ping1(call) => client
                .ping1(call, self.relay_timeout, &self.cancel)
                .await
                .map(ForwardResponse::Ping1),
            ForwardCall::Ping2(call) => client
                .ping2(call, self.relay_timeout, &self.cancel)
                .await
                .map(ForwardResponse::Ping2),
        };

        result.unwrap_or_else(|e| {
            tracing::debug!(endpoint = %target, "Forwarded {} failed: {}", method, e);
            ForwardResponse::Error(format!("{} to {} failed: {}", method, target, e))
        })
    }

    /// Answer one wire message
    pub async fn handle(&self, message: Message) -> Message {
        match message {
            Message::Ping1Request(request) => Message::Ping1Response(self.ping1(&request).await),
            Message::Ping2Request(request) => Message::Ping2Response(self.ping2(&request).await),
            Message::ForwardRequest(request) => Message::ForwardResponse(self.forward(request).await),
            other => Message::Error {
                message: format!("Unexpected message: {}", other.type_name()),
            },
        }
    }
}
