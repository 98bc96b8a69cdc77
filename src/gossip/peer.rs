//! Peer Client
//!
//! The transport boundary of the gossip engine. The engine only talks to
//! other nodes through `PeerClient`; the TCP implementation lives in
//! `crate::network`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::protocol::{
    ForwardRequest, ForwardResponse, Ping1Request, Ping1Response, Ping2Request, Ping2Response,
};
use crate::error::{Error, Result};
use crate::state::Endpoint;

/// Outbound RPCs to a single peer.
///
/// Every call honours its deadline and the cancellation token; a timeout is
/// reported as `Error::ConnectionTimeout`, cancellation as `Error::Cancelled`.
#[async_trait]
pub trait PeerClient: Send + Sync {
    /// Endpoint this client talks to
    fn endpoint(&self) -> &Endpoint;

    async fn ping1(
        &self,
        request: Ping1Request,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<Ping1Response>;

    async fn ping2(
        &self,
        request: Ping2Request,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<Ping2Response>;

    async fn forward(
        &self,
        request: ForwardRequest,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<ForwardResponse>;
}

/// Builds a client for an endpoint
pub trait PeerClientFactory: Send + Sync {
    fn client(&self, endpoint: &Endpoint) -> Arc<dyn PeerClient>;
}

impl<F> PeerClientFactory for F
where
    F: Fn(&Endpoint) -> Arc<dyn PeerClient> + Send + Sync,
{
    fn client(&self, endpoint: &Endpoint) -> Arc<dyn PeerClient> {
        self(endpoint)
    }
}

/// Run `call` under a deadline, giving up early on cancellation
pub async fn with_deadline<T, F>(
    endpoint: &Endpoint,
    deadline: Duration,
    cancel: &CancellationToken,
    call: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = tokio::time::timeout(deadline, call) => match result {
            Ok(inner) => inner,
            Err(_) => Err(Error::ConnectionTimeout(endpoint.to_string())),
        },
    }
}
