//! Newline-delimited JSON serve loop.
//!
//! Requests are handled concurrently; a single writer task owns the output
//! so responses never interleave mid-line.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{ToolServer, handle_raw};

/// Serve `server` on the process's stdin/stdout until stdin closes.
pub async fn serve_stdio<S: ToolServer>(server: Arc<S>) -> std::io::Result<()> {
    serve(server, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Serve over any reader/writer pair.
pub async fn serve<S, R, W>(server: Arc<S>, reader: R, mut writer: W) -> std::io::Result<()>
where
    S: ToolServer,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let info = server.info();
    info!(server = %info.name, version = %info.version, "Serving on stdio");

    let (tx, mut rx) = mpsc::channel::<String>(64);
    let writer_task = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }
        Ok::<_, std::io::Error>(())
    });

    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let server = Arc::clone(&server);
        let tx = tx.clone();
        tokio::spawn(async move {
            let Some(reply) = handle_raw(server.as_ref(), &line).await else {
                return;
            };
            match serde_json::to_string(&reply) {
                Ok(encoded) => {
                    if tx.send(encoded).await.is_err() {
                        debug!("Output closed before reply was written");
                    }
                }
                Err(e) => warn!(error = %e, "Failed to encode reply"),
            }
        });
    }

    debug!("Input closed; draining replies");
    drop(tx);
    match writer_task.await {
        Ok(result) => result,
        Err(e) => Err(std::io::Error::other(e)),
    }
}
