//! Cluster Bootstrap
//!
//! Joins an existing cluster by completing one handshake with any seed
//! before the gossip loop starts.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::peer::PeerClientFactory;
use super::protocol::Ping1Request;
use super::ClusterOptions;
use crate::discovery::SeedProvider;
use crate::error::{Error, Result};
use crate::state::{Endpoint, Node, NodeInformation};

pub struct ClusterBootstrapper {
    self_info: NodeInformation,
    seeds: Arc<dyn SeedProvider>,
    options: ClusterOptions,
}

impl ClusterBootstrapper {
    pub fn new(self_info: NodeInformation, seeds: Arc<dyn SeedProvider>, options: ClusterOptions) -> Self {
        Self {
            self_info,
            seeds,
            options,
        }
    }

    /// Build a node and join the cluster with it.
    pub async fn bootstrap(
        &self,
        factory: &dyn PeerClientFactory,
        cancel: &CancellationToken,
    ) -> Result<Node> {
        let node = Node::new(self.self_info.clone());
        self.join(&node, factory, cancel).await?;
        Ok(node)
    }

    /// Loop over the seeds until one handshake succeeds.
    ///
    /// Seeds are re-read on every pass and kept in the table as
    /// placeholders, so the gossip loop keeps probing the ones that did not
    /// answer. Between failed passes the bootstrapper backs off
    /// exponentially up to `bootstrap_backoff_max_ms`. A node without seeds
    /// other than itself starts a cluster of its own, except that an empty
    /// answer from a provider whose empty answers are not final is retried.
    ///
    /// `node` may already be serving inbound requests.
    pub async fn join(
        &self,
        node: &Node,
        factory: &dyn PeerClientFactory,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut backoff = self.options.bootstrap_backoff_initial();
        let mut pass = 0u64;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            pass += 1;

            match self.seeds.seeds().await {
                Ok(found) if found.is_empty() && !self.seeds.empty_is_final() => {
                    tracing::info!("Discovery has no seeds yet (pass {}), retrying in {:?}", pass, backoff);
                }
                Ok(found) => {
                    let seeds = self.remote_seeds(found);
                    if seeds.is_empty() {
                        tracing::info!(
                            endpoint = %node.endpoint(),
                            "No seeds to join, starting a new cluster"
                        );
                        return Ok(());
                    }

                    node.add_seeds(seeds.iter().cloned()).await;
                    for seed in &seeds {
                        match self.handshake(node, seed, factory, cancel).await {
                            Ok(()) => {
                                tracing::info!(endpoint = %seed, "Bootstrapped through seed");
                                return Ok(());
                            }
                            Err(Error::Cancelled) => return Err(Error::Cancelled),
                            Err(e) => {
                                tracing::warn!(endpoint = %seed, "Failed to bootstrap through seed: {}", e);
                            }
                        }
                    }
                    tracing::warn!("No seed reachable (pass {}), retrying in {:?}", pass, backoff);
                }
                Err(e) => {
                    tracing::warn!("Seed discovery failed (pass {}): {}, retrying in {:?}", pass, e, backoff);
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(self.options.bootstrap_backoff_max());
        }
    }

    /// Self plus a placeholder per seed, without contacting anyone.
    ///
    /// The gossip loop reaches the seeds on its own from there.
    pub async fn seed_node(&self) -> Result<Node> {
        let seeds = self.remote_seeds(self.seeds.seeds().await?);
        Ok(Node::with_seeds(self.self_info.clone(), seeds))
    }

    /// Discovered seeds minus ourselves, sorted and deduplicated
    fn remote_seeds(&self, found: Vec<String>) -> Vec<Endpoint> {
        let mut seeds: Vec<Endpoint> = found
            .into_iter()
            .map(Endpoint::from)
            .filter(|seed| *seed != self.self_info.endpoint)
            .collect();
        seeds.sort();
        seeds.dedup();
        seeds
    }

    async fn handshake(
        &self,
        node: &Node,
        seed: &Endpoint,
        factory: &dyn PeerClientFactory,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let client = factory.client(seed);
        let deadline = self.options.ping_timeout();

        let request = Ping1Request {
            nodes_synopsis: node.nodes_synopsis().await,
        };
        let response = client.ping1(request, deadline, cancel).await?;
        let ack = node.ack1(&response).await;
        client.ping2(ack, deadline, cancel).await?;
        Ok(())
    }
}
