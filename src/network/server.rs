//! Network Server
//!
//! TCP server answering gossip requests from other nodes.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use super::{read_message, write_message};
use crate::error::{Error, Result};
use crate::gossip::GossipService;

/// Network server for cluster communication
pub struct NetworkServer {
    listener: TcpListener,
    service: Arc<GossipService>,
    cancel: CancellationToken,
}

impl NetworkServer {
    /// Bind the listening socket
    pub async fn bind(
        bind_address: &str,
        service: Arc<GossipService>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let listener = TcpListener::bind(bind_address).await?;
        Ok(Self {
            listener,
            service,
            cancel,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until cancelled
    pub async fn run(self) -> Result<()> {
        tracing::info!("Gossip server listening on {}", self.local_addr()?);

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((socket, addr)) => {
                            let peer_addr = addr.to_string();
                            let service = self.service.clone();
                            let cancel = self.cancel.clone();

                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(socket, &peer_addr, service, cancel).await {
                                    tracing::warn!("Connection error from {}: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = self.cancel.cancelled() => break,
            }
        }

        tracing::info!("Gossip server stopped");
        Ok(())
    }
}

/// Answer requests on one connection until the peer hangs up
async fn handle_connection(
    mut socket: TcpStream,
    peer_addr: &str,
    service: Arc<GossipService>,
    cancel: CancellationToken,
) -> Result<()> {
    socket.set_nodelay(true)?;
    let (mut reader, mut writer) = socket.split();

    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            message = read_message(&mut reader) => message,
        };

        match message {
            Ok(message) => {
                tracing::trace!("Received {} from {}", message.type_name(), peer_addr);
                let reply = service.handle(message).await;
                write_message(&mut writer, &reply).await?;
            }
            Err(Error::Io(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                // Connection closed
                break;
            }
            Err(e) => return Err(e),
        }
    }

    Ok(())
}
