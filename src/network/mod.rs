//! Network Module
//!
//! TCP transport for the gossip protocol. Every message travels in a frame
//! made of an 8-byte header (body length, CRC32 of the body) followed by the
//! bincode-encoded `Message`.

mod client;
mod server;

pub use client::{NetworkClient, NetworkClientFactory};
pub use server::NetworkServer;

use crate::error::{Error, Result};
use crate::gossip::{FrameHeader, Message};

/// Largest body accepted from the wire
pub const MAX_FRAME_LENGTH: u32 = 16 * 1024 * 1024;

/// Read a framed message from a reader
pub async fn read_message<R: tokio::io::AsyncRead + Unpin>(reader: &mut R) -> Result<Message> {
    use tokio::io::AsyncReadExt;

    // Read header
    let mut header_bytes = [0u8; FrameHeader::SIZE];
    reader.read_exact(&mut header_bytes).await?;
    let header = FrameHeader::from_bytes(&header_bytes);

    if header.length > MAX_FRAME_LENGTH {
        return Err(Error::Network(format!(
            "Frame of {} bytes exceeds the {} byte limit",
            header.length, MAX_FRAME_LENGTH
        )));
    }

    // Read body
    let mut body = vec![0u8; header.length as usize];
    reader.read_exact(&mut body).await?;

    // Verify checksum
    if crc32fast::hash(&body) != header.checksum {
        return Err(Error::Network("Message checksum mismatch".into()));
    }

    Ok(Message::deserialize(&body)?)
}

/// Write a framed message to a writer
pub async fn write_message<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut W,
    message: &Message,
) -> Result<()> {
    use tokio::io::AsyncWriteExt;

    let body = message.serialize()?;
    let header = FrameHeader::new(&body);

    writer.write_all(&header.to_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gossip::{Ping1Request, Ping2Response};
    use crate::state::{Endpoint, NodeInformationSynopsis};

    #[tokio::test]
    async fn test_frame_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let message = Message::Ping1Request(Ping1Request {
            nodes_synopsis: vec![NodeInformationSynopsis {
                endpoint: Endpoint::new("10.0.0.1:7946"),
                node_version: 7,
                last_known_property_version: 3,
            }],
        });

        write_message(&mut a, &message).await.unwrap();
        write_message(&mut a, &Message::Ping2Response(Ping2Response::default()))
            .await
            .unwrap();

        match read_message(&mut b).await.unwrap() {
            Message::Ping1Request(request) => assert_eq!(request.nodes_synopsis[0].node_version, 7),
            other => panic!("Wrong message type: {}", other.type_name()),
        }
        assert!(matches!(read_message(&mut b).await.unwrap(), Message::Ping2Response(_)));
    }

    #[tokio::test]
    async fn test_corrupted_frame() {
        use tokio::io::AsyncWriteExt;

        let (mut a, mut b) = tokio::io::duplex(4096);
        let body = Message::Error { message: "x".into() }.serialize().unwrap();
        let mut header = FrameHeader::new(&body);
        header.checksum ^= 1;

        a.write_all(&header.to_bytes()).await.unwrap();
        a.write_all(&body).await.unwrap();

        assert!(matches!(read_message(&mut b).await, Err(Error::Network(_))));
    }
}
