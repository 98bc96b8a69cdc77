//! Network Client
//!
//! TCP `PeerClient`: one connection per call, bounded by a connect timeout
//! and the call's own deadline.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::{read_message, write_message};
use crate::error::{Error, Result};
use crate::gossip::{
    with_deadline, ForwardRequest, ForwardResponse, Message, PeerClient, PeerClientFactory,
    Ping1Request, Ping1Response, Ping2Request, Ping2Response,
};
use crate::state::Endpoint;

/// Network client for one peer
pub struct NetworkClient {
    endpoint: Endpoint,
    /// Connection timeout
    connect_timeout: Duration,
}

impl NetworkClient {
    /// Create a new network client
    pub fn new(endpoint: Endpoint, connect_timeout: Duration) -> Self {
        Self {
            endpoint,
            connect_timeout,
        }
    }

    /// Send a message and wait for the reply
    pub async fn send(
        &self,
        message: Message,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<Message> {
        tracing::trace!(endpoint = %self.endpoint, "Sending {}", message.type_name());

        let reply = with_deadline(&self.endpoint, deadline, cancel, async {
            let mut stream = self.connect().await?;
            let (mut reader, mut writer) = stream.split();
            write_message(&mut writer, &message).await?;
            read_message(&mut reader).await
        })
        .await?;

        match reply {
            Message::Error { message } => Err(Error::Remote(message)),
            reply => Ok(reply),
        }
    }

    /// Connect to the peer
    async fn connect(&self) -> Result<TcpStream> {
        let address = self.endpoint.as_str();
        let result = timeout(self.connect_timeout, TcpStream::connect(address)).await;

        match result {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true)?;
                Ok(stream)
            }
            Ok(Err(e)) => Err(Error::ConnectionFailed {
                address: address.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(Error::ConnectionTimeout(address.to_string())),
        }
    }
}

fn unexpected(expected: &str, reply: &Message) -> Error {
    Error::InvalidResponse(format!("expected {}, got {}", expected, reply.type_name()))
}

#[async_trait]
impl PeerClient for NetworkClient {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn ping1(
        &self,
        request: Ping1Request,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<Ping1Response> {
        match self.send(Message::Ping1Request(request), deadline, cancel).await? {
            Message::Ping1Response(response) => Ok(response),
            other => Err(unexpected("Ping1Response", &other)),
        }
    }

    async fn ping2(
        &self,
        request: Ping2Request,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<Ping2Response> {
        match self.send(Message::Ping2Request(request), deadline, cancel).await? {
            Message::Ping2Response(response) => Ok(response),
            other => Err(unexpected("Ping2Response", &other)),
        }
    }

    async fn forward(
        &self,
        request: ForwardRequest,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<ForwardResponse> {
        match self.send(Message::ForwardRequest(request), deadline, cancel).await? {
            Message::ForwardResponse(response) => Ok(response),
            other => Err(unexpected("ForwardResponse", &other)),
        }
    }
}

/// Hands out `NetworkClient`s
#[derive(Debug, Clone)]
pub struct NetworkClientFactory {
    connect_timeout: Duration,
}

impl NetworkClientFactory {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl PeerClientFactory for NetworkClientFactory {
    fn client(&self, endpoint: &Endpoint) -> Arc<dyn PeerClient> {
        Arc::new(NetworkClient::new(endpoint.clone(), self.connect_timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connection_failure() {
        // Bind then drop to get a port nobody listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let client = NetworkClient::new(Endpoint::new(&address), Duration::from_millis(100));
        let result = client
            .ping1(Ping1Request::default(), Duration::from_millis(500), &CancellationToken::new())
            .await;
        assert!(result.unwrap_err().is_retryable());
    }

    #[tokio::test]
    async fn test_remote_error_and_wrong_reply() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let replies = [
                Message::Error { message: "boom".into() },
                Message::Ping2Response(Ping2Response::default()),
            ];
            for reply in replies {
                let (mut socket, _) = listener.accept().await.unwrap();
                let (mut reader, mut writer) = socket.split();
                read_message(&mut reader).await.unwrap();
                write_message(&mut writer, &reply).await.unwrap();
            }
        });

        let client = NetworkClient::new(Endpoint::new(&address), Duration::from_millis(500));
        let cancel = CancellationToken::new();
        let deadline = Duration::from_secs(2);

        let first = client.ping1(Ping1Request::default(), deadline, &cancel).await;
        assert!(matches!(first, Err(Error::Remote(msg)) if msg == "boom"));

        let second = client.ping1(Ping1Request::default(), deadline, &cancel).await;
        assert!(matches!(second, Err(Error::InvalidResponse(_))));
    }
}
