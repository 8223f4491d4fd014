//! Byte bridge between a gateway client and its upstream connection

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, instrument};

/// Copy data bidirectionally until both directions close
///
/// Each side's write half is shut down once its source reaches EOF, so a
/// half-close is forwarded. Returns `(bytes client->upstream, bytes upstream->client)`.
#[instrument(skip(client, upstream))]
pub async fn copy_bidirectional<C, U>(client: C, upstream: U) -> (u64, u64)
where
    C: AsyncRead + AsyncWrite + Unpin + Send,
    U: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut upstream_read, mut upstream_write) = tokio::io::split(upstream);

    let client_to_upstream = async {
        let result = tokio::io::copy(&mut client_read, &mut upstream_write).await;
        let _ = upstream_write.shutdown().await;
        result
    };

    let upstream_to_client = async {
        let result = tokio::io::copy(&mut upstream_read, &mut client_write).await;
        let _ = client_write.shutdown().await;
        result
    };

    let (sent, received) = tokio::join!(client_to_upstream, upstream_to_client);

    let bytes_sent = sent.unwrap_or_else(|e| {
        debug!("Client to upstream copy ended: {}", e);
        0
    });
    let bytes_received = received.unwrap_or_else(|e| {
        debug!("Upstream to client copy ended: {}", e);
        0
    });

    debug!(bytes_sent, bytes_received, "Tunnel closed");
    (bytes_sent, bytes_received)
}
