//! Byte-stream transport (stdin/stdout).
//!
//! Bytes are read in chunks and fed to a [`Framer`]. Every complete message
//! is handled on its own task so a slow tool call never blocks the ones
//! behind it. Replies funnel through a single writer task that owns the
//! output stream.

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::error::GatewayError;
use crate::framer::{Framer, Framing};
use crate::server::McpServer;

const READ_CHUNK: usize = 8 * 1024;

/// Serve MCP over stdin/stdout until EOF or `shutdown`, then close every
/// backend connection and the store.
pub async fn run_stdio(server: Arc<McpServer>, shutdown: impl Future<Output = ()>) -> Result<(), GatewayError> {
    tracing::info!("Starting MCP server with stdio transport");
    let served = serve_stream(server.clone(), tokio::io::stdin(), tokio::io::stdout(), shutdown).await;
    server.shutdown().await;
    served
}

/// Serve MCP over an arbitrary byte stream pair.
pub async fn serve_stream<R, W>(
    server: Arc<McpServer>,
    mut reader: R,
    writer: W,
    shutdown: impl Future<Output = ()>,
) -> Result<(), GatewayError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (reply_tx, reply_rx) = mpsc::unbounded_channel::<(Framing, Value)>();
    let writer_task = tokio::spawn(write_replies(writer, reply_rx));

    let mut framer = Framer::new();
    let mut handlers = JoinSet::new();
    let mut buf = vec![0u8; READ_CHUNK];
    let mut interrupted = false;
    let mut output_closed = false;
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            read = reader.read(&mut buf) => {
                let n = read?;
                if n == 0 {
                    tracing::debug!(pending = framer.pending(), "Input closed");
                    break;
                }
                for message in framer.push(&buf[..n]) {
                    let server = server.clone();
                    let reply_tx = reply_tx.clone();
                    let framing = framer.framing();
                    handlers.spawn(async move {
                        let Some(response) = server.handle_message(message, None).await else {
                            return;
                        };
                        match serde_json::to_value(&response) {
                            Ok(reply) => {
                                if reply_tx.send((framing, reply)).is_err() {
                                    tracing::warn!(id = ?response.id, "Output closed, reply dropped");
                                }
                            }
                            Err(e) => tracing::error!(error = %e, "Failed to serialize response"),
                        }
                    });
                }
            }
            Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "Message handler panicked");
                }
            }
            _ = reply_tx.closed() => {
                tracing::warn!("Output closed, ending session");
                output_closed = true;
                break;
            }
            _ = &mut shutdown => {
                tracing::info!("Shutdown requested");
                interrupted = true;
                break;
            }
        }
    }

    if interrupted || output_closed {
        handlers.abort_all();
    }
    while let Some(joined) = handlers.join_next().await {
        if let Err(e) = joined {
            if !e.is_cancelled() {
                tracing::error!(error = %e, "Message handler panicked");
            }
        }
    }

    drop(reply_tx);
    match writer_task.await {
        Ok(written) => written.map_err(GatewayError::from),
        Err(e) => Err(GatewayError::Internal(anyhow::anyhow!("writer task failed: {e}"))),
    }
}

async fn write_replies<W>(mut writer: W, mut replies: mpsc::UnboundedReceiver<(Framing, Value)>) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some((framing, reply)) = replies.recv().await {
        writer.write_all(&framing.encode(&reply)).await?;
        writer.flush().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlgate_auth::{AuthGate, SystemClock};
    use sqlgate_core::AuthMode;
    use sqlgate_store::MemoryStore;
    use std::time::Duration;

    fn server() -> Arc<McpServer> {
        let store = Arc::new(MemoryStore::new());
        let gate = AuthGate::new(AuthMode::None, None, store.clone(), Arc::new(SystemClock));
        Arc::new(McpServer::new(store, gate))
    }

    #[tokio::test]
    async fn test_replies_are_written_in_session_framing() {
        let (mut input, server_in) = tokio::io::duplex(1024);
        let (server_out, mut output) = tokio::io::duplex(1024);
        input
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"tools/list\"}\n")
            .await
            .unwrap();
        drop(input);

        serve_stream(server(), server_in, server_out, std::future::pending())
            .await
            .unwrap();

        let mut written = String::new();
        output.read_to_string(&mut written).await.unwrap();
        let reply: Value = serde_json::from_str(written.trim_end()).unwrap();
        assert!(written.ends_with('\n'));
        assert_eq!(reply["id"], 1);
    }

    #[tokio::test]
    async fn test_closed_output_ends_session_while_input_is_open() {
        let (mut input, server_in) = tokio::io::duplex(1024);
        let (server_out, output) = tokio::io::duplex(1024);
        drop(output);
        input
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"tools/list\"}\n")
            .await
            .unwrap();

        let served = tokio::time::timeout(
            Duration::from_secs(5),
            serve_stream(server(), server_in, server_out, std::future::pending()),
        )
        .await
        .expect("session should end once output is gone");
        assert!(matches!(served, Err(GatewayError::Io(_))), "{served:?}");

        // Input stayed open throughout.
        drop(input);
    }
}
