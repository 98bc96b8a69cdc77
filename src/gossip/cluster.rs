//! Gossip Loop
//!
//! One background task per node. Each round picks a peer and runs the
//! three-message exchange with it. A peer that cannot be reached directly is
//! probed through a live forwarder before it is declared dead.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::peer::PeerClientFactory;
use super::protocol::{ForwardCall, ForwardRequest, ForwardResponse, Ping1Request, Ping1Response};
use super::select::{choose_forwarder, random_pick_node};
use super::ClusterOptions;
use crate::error::{Error, Result};
use crate::state::{Endpoint, Node, NodeState};

/// What a single gossip round did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundOutcome {
    /// Nobody to gossip with
    Idle,
    /// Direct exchange succeeded
    Synced { peer: Endpoint },
    /// Peer was reached through a forwarder
    SyncedViaForwarder { peer: Endpoint, forwarder: Endpoint },
    /// Peer unreachable both ways and marked dead
    MarkedDead { peer: Endpoint },
    /// A local failure ended the round; the peer is left as it was
    Aborted { peer: Endpoint },
    /// Shutdown interrupted the round
    Cancelled,
}

/// Gossip loop driver
pub struct Cluster {
    node: Arc<Node>,
    options: ClusterOptions,
    factory: Arc<dyn PeerClientFactory>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Cluster {
    pub fn new(node: Arc<Node>, options: ClusterOptions, factory: Arc<dyn PeerClientFactory>) -> Self {
        Self {
            node,
            options,
            factory,
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    /// Token cancelled by `stop`; share it with anything that should stop with the loop
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawn the background loop
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::ShuttingDown);
        }

        let mut task = self.task.lock().await;
        if task.is_some() {
            return Err(Error::Internal("gossip loop already running".into()));
        }

        let cluster = Arc::clone(self);
        *task = Some(tokio::spawn(async move { cluster.run().await }));

        tracing::info!(
            endpoint = %self.node.endpoint(),
            "Gossip loop started (interval {}ms)",
            self.options.gossip_interval_ms
        );
        Ok(())
    }

    /// Cancel the loop and wait for it to exit
    pub async fn stop(&self) {
        self.cancel.cancel();

        let handle = self.task.lock().await.take();
        let Some(mut handle) = handle else {
            return;
        };

        match tokio::time::timeout(self.options.stop_timeout(), &mut handle).await {
            Ok(Ok(())) => tracing::info!("Gossip loop stopped"),
            Ok(Err(e)) => tracing::error!("Gossip loop task failed: {}", e),
            Err(_) => {
                tracing::warn!("Gossip loop did not stop in time, aborting");
                handle.abort();
            }
        }
    }

    async fn run(&self) {
        let interval = self.options.gossip_interval();

        loop {
            let started = Instant::now();

            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => break,
                outcome = self.run_round() => outcome,
            };
            if outcome == RoundOutcome::Cancelled {
                break;
            }
            tracing::trace!("Gossip round finished: {:?}", outcome);

            let elapsed = started.elapsed();
            if elapsed >= interval {
                tracing::warn!(
                    "Gossip round took {:?}, longer than the {:?} interval",
                    elapsed,
                    interval
                );
            }
            let pause = self.options.next_pause(elapsed);

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }

    /// Run one gossip round
    pub async fn run_round(&self) -> RoundOutcome {
        let live = self.node.live_endpoints().await;
        let non_live = self.node.non_live_endpoints().await;

        let peer = random_pick_node(
            &live,
            &non_live,
            self.options.gossip_non_live_nodes_probability,
            &mut rand::thread_rng(),
        );
        let Some(peer) = peer else {
            tracing::debug!("No peers to gossip with");
            return RoundOutcome::Idle;
        };

        // Only transport failures say anything about the peer
        let direct_error = match self.exchange_direct(&peer).await {
            Ok(()) => return RoundOutcome::Synced { peer },
            Err(Error::Cancelled) => return RoundOutcome::Cancelled,
            Err(e) if !e.is_retryable() => {
                tracing::error!(endpoint = %peer, "Gossip round aborted: {}", e);
                return RoundOutcome::Aborted { peer };
            }
            Err(e) => e,
        };
        tracing::warn!(endpoint = %peer, "Direct gossip failed: {}", direct_error);

        let indirect_error = match self.exchange_indirect(&peer, &live).await {
            Ok(forwarder) => {
                tracing::info!(endpoint = %peer, "Reached peer through {}", forwarder);
                return RoundOutcome::SyncedViaForwarder { peer, forwarder };
            }
            Err(Error::Cancelled) => return RoundOutcome::Cancelled,
            Err(e @ Error::NoForwarder(_)) => e,
            Err(e) if !e.is_retryable() => {
                tracing::error!(endpoint = %peer, "Gossip round aborted: {}", e);
                return RoundOutcome::Aborted { peer };
            }
            Err(e) => e,
        };
        tracing::warn!(endpoint = %peer, "Indirect gossip failed: {}", indirect_error);

        if let Err(e) = self.node.assign_node_state(&peer, NodeState::Dead).await {
            tracing::error!(endpoint = %peer, "Could not mark peer dead: {}", e);
        }
        RoundOutcome::MarkedDead { peer }
    }

    async fn exchange_direct(&self, peer: &Endpoint) -> Result<()> {
        let client = self.factory.client(peer);
        let deadline = self.options.ping_timeout();

        let request = Ping1Request {
            nodes_synopsis: self.node.nodes_synopsis().await,
        };
        let response = client.ping1(request, deadline, &self.cancel).await?;
        let ack = self.node.ack1(&response).await;
        client.ping2(ack, deadline, &self.cancel).await?;
        Ok(())
    }

    /// Returns the forwarder used
    async fn exchange_indirect(&self, peer: &Endpoint, live: &[Endpoint]) -> Result<Endpoint> {
        let forwarder = choose_forwarder(live, peer, &mut rand::thread_rng())
            .ok_or_else(|| Error::NoForwarder(peer.to_string()))?;
        let client = self.factory.client(&forwarder);
        let deadline = self.options.forward_timeout();

        let request = ForwardRequest {
            target_endpoint: peer.clone(),
            call: ForwardCall::Ping1(Ping1Request {
                nodes_synopsis: self.node.nodes_synopsis().await,
            }),
        };
        let response: Ping1Response = match client.forward(request, deadline, &self.cancel).await? {
            ForwardResponse::Ping1(response) => response,
            ForwardResponse::Error(message) => return Err(Error::Remote(message)),
            other => {
                return Err(Error::InvalidResponse(format!(
                    "expected a Ping1 reply, got {:?}",
                    other
                )))
            }
        };

        let ack = self.node.ack1(&response).await;
        let request = ForwardRequest {
            target_endpoint: peer.clone(),
            call: ForwardCall::Ping2(ack),
        };
        match client.forward(request, deadline, &self.cancel).await? {
            ForwardResponse::Ping2(_) => Ok(forwarder),
            ForwardResponse::Error(message) => Err(Error::Remote(message)),
            other => Err(Error::InvalidResponse(format!(
                "expected a Ping2 reply, got {:?}",
                other
            ))),
        }
    }
}
