use std::sync::Arc;

use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::sync::mpsc;

use crate::dispatch::{Deployment, Dispatcher};
use crate::handlers;
use crate::protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};

/// Maximum bytes per JSON-RPC message (1 MiB).
const MAX_MESSAGE_BYTES: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("writer task failed: {0}")]
    Writer(#[from] tokio::task::JoinError),
}

/// MCP server that communicates over stdio using newline-delimited JSON-RPC 2.0.
///
/// Requests are decoded in arrival order, but each call runs as its own task
/// and responses are written in completion order, matched by id.
pub struct McpServer<D> {
    dispatcher: Arc<Dispatcher<D>>,
    initialized: bool,
}

impl<D: Deployment> McpServer<D> {
    pub fn new(deployment: D) -> Self {
        Self {
            dispatcher: Arc::new(Dispatcher::new(deployment)),
            initialized: false,
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher<D>> {
        &self.dispatcher
    }

    /// Serve stdio until EOF or a termination signal, then release the backend.
    pub async fn run(&mut self) -> Result<(), TransportError> {
        let result = tokio::select! {
            result = self.serve(tokio::io::stdin(), tokio::io::stdout()) => result,
            signal = termination_signal() => {
                tracing::info!(signal, "termination signal received");
                Ok(())
            }
        };
        self.shutdown().await;
        result
    }

    /// Release the deployment's backend handle. Idempotent.
    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
    }

    /// Serve one connection until the input reaches EOF and every in-flight
    /// request has been answered.
    pub async fn serve<R, W>(&mut self, input: R, output: W) -> Result<(), TransportError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel::<JsonRpcResponse>();
        let writer = tokio::spawn(write_loop(rx, output));

        let mut reader = BufReader::new(input);
        let mut raw = Vec::new();

        tracing::info!(deployment = self.dispatcher.deployment().name(), "server running");

        loop {
            match read_frame(&mut reader, &mut raw).await? {
                Frame::Eof => break,
                Frame::Oversized(bytes) => {
                    tracing::warn!(bytes, limit = MAX_MESSAGE_BYTES, "message too large");
                    send(&tx, JsonRpcResponse::error(None, JsonRpcError::parse_error()));
                    continue;
                }
                Frame::Line => {}
            }

            let trimmed = match std::str::from_utf8(&raw) {
                Ok(s) => s.trim(),
                Err(_) => {
                    tracing::warn!("message is not valid UTF-8");
                    send(&tx, JsonRpcResponse::error(None, JsonRpcError::parse_error()));
                    continue;
                }
            };

            if trimmed.is_empty() {
                continue;
            }

            let req: JsonRpcRequest = match serde_json::from_str(trimmed) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(error = %e, "parse error");
                    send(&tx, JsonRpcResponse::error(None, JsonRpcError::parse_error()));
                    continue;
                }
            };

            if req.jsonrpc != "2.0" {
                send(&tx, JsonRpcResponse::error(req.id.clone(), JsonRpcError::invalid_request()));
                continue;
            }

            // Initialization gate: only `initialize` is allowed before handshake completes
            if !self.initialized && req.method != "initialize" {
                if req.is_notification() {
                    continue;
                }
                send(
                    &tx,
                    JsonRpcResponse::error(
                        req.id.clone(),
                        JsonRpcError::invalid_request_with("Server not initialized"),
                    ),
                );
                continue;
            }

            if req.method == "initialize" {
                if let Some(resp) = handlers::dispatch(&req, &self.dispatcher).await {
                    send(&tx, resp);
                }
                self.initialized = true;
                continue;
            }

            tokio::spawn(handle_request(Arc::clone(&self.dispatcher), req, tx.clone()));
        }

        // In-flight tasks hold their own senders; the writer drains until the last one finishes.
        drop(tx);
        writer.await??;
        tracing::info!("input closed");
        Ok(())
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Frame {
    Eof,
    /// `buf` holds one line of at most [`MAX_MESSAGE_BYTES`].
    Line,
    /// The line was discarded; carries its full length.
    Oversized(usize),
}

/// Read one newline-terminated frame into `buf`, buffering at most
/// `MAX_MESSAGE_BYTES + 1` bytes. The rest of an oversized line is consumed
/// without being stored.
async fn read_frame<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Frame>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let limit = MAX_MESSAGE_BYTES as u64 + 1;
    let n = (&mut *reader).take(limit).read_until(b'\n', buf).await?;
    if n == 0 {
        return Ok(Frame::Eof);
    }
    if n <= MAX_MESSAGE_BYTES {
        return Ok(Frame::Line);
    }

    let mut total = n;
    if buf.last() != Some(&b'\n') {
        total += skip_line(reader).await?;
    }
    buf.clear();
    Ok(Frame::Oversized(total))
}

/// Discard input up to and including the next newline. Returns bytes skipped.
async fn skip_line<R>(reader: &mut R) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut skipped = 0;
    loop {
        let (used, done) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                return Ok(skipped);
            }
            match available.iter().position(|&b| b == b'\n') {
                Some(i) => (i + 1, true),
                None => (available.len(), false),
            }
        };
        reader.consume(used);
        skipped += used;
        if done {
            return Ok(skipped);
        }
    }
}

/// Run one request to completion. A panic inside the handler still yields a
/// response for the request id.
async fn handle_request<D: Deployment>(
    dispatcher: Arc<Dispatcher<D>>,
    req: JsonRpcRequest,
    tx: mpsc::UnboundedSender<JsonRpcResponse>,
) {
    let id = req.id.clone();
    let method = req.method.clone();
    let task = tokio::spawn(async move { handlers::dispatch(&req, &dispatcher).await });

    match task.await {
        Ok(Some(resp)) => send(&tx, resp),
        Ok(None) => {}
        Err(err) => {
            tracing::error!(method = %method, error = %err, "request task failed");
            if id.is_some() {
                send(&tx, JsonRpcResponse::error(id, JsonRpcError::internal_error("Internal error")));
            }
        }
    }
}

fn send(tx: &mpsc::UnboundedSender<JsonRpcResponse>, resp: JsonRpcResponse) {
    if tx.send(resp).is_err() {
        tracing::warn!("output closed; dropping response");
    }
}

async fn write_loop<W>(mut rx: mpsc::UnboundedReceiver<JsonRpcResponse>, mut output: W) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(resp) = rx.recv().await {
        let out = match serde_json::to_string(&resp) {
            Ok(out) => out,
            Err(e) => {
                tracing::error!(error = %e, "response serialization failed");
                continue;
            }
        };
        output.write_all(out.as_bytes()).await?;
        output.write_all(b"\n").await?;
        output.flush().await?;
    }
    Ok(())
}

#[cfg(unix)]
async fn termination_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => tokio::select! {
            _ = ctrl_c() => "SIGINT",
            _ = term.recv() => "SIGTERM",
        },
        Err(err) => {
            tracing::warn!(error = %err, "cannot listen for SIGTERM");
            ctrl_c().await;
            "SIGINT"
        }
    }
}

#[cfg(not(unix))]
async fn termination_signal() -> &'static str {
    ctrl_c().await;
    "ctrl-c"
}

/// Resolves on Ctrl-C; never resolves if the handler cannot be installed.
async fn ctrl_c() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn oversized_line_is_skipped_without_buffering_it() {
        let mut input = vec![b'a'; MAX_MESSAGE_BYTES * 2];
        input.push(b'\n');
        input.extend_from_slice(b"{\"ok\":1}\n");
        let mut reader = BufReader::new(input.as_slice());
        let mut buf = Vec::new();

        let frame = read_frame(&mut reader, &mut buf).await.unwrap();
        assert_eq!(frame, Frame::Oversized(MAX_MESSAGE_BYTES * 2 + 1));
        assert!(buf.is_empty());
        assert!(buf.capacity() <= 2 * (MAX_MESSAGE_BYTES + 1));

        assert_eq!(read_frame(&mut reader, &mut buf).await.unwrap(), Frame::Line);
        assert_eq!(buf, b"{\"ok\":1}\n");
        assert_eq!(read_frame(&mut reader, &mut buf).await.unwrap(), Frame::Eof);
    }

    #[tokio::test]
    async fn line_at_the_limit_is_accepted() {
        let mut input = vec![b' '; MAX_MESSAGE_BYTES - 1];
        input.push(b'\n');
        input.extend_from_slice(&vec![b' '; MAX_MESSAGE_BYTES]);
        input.push(b'\n');
        let mut reader = BufReader::new(input.as_slice());
        let mut buf = Vec::new();

        assert_eq!(read_frame(&mut reader, &mut buf).await.unwrap(), Frame::Line);
        assert_eq!(buf.len(), MAX_MESSAGE_BYTES);
        assert_eq!(
            read_frame(&mut reader, &mut buf).await.unwrap(),
            Frame::Oversized(MAX_MESSAGE_BYTES + 1)
        );
    }

    #[tokio::test]
    async fn unterminated_oversized_tail_ends_at_eof() {
        let input = vec![b'x'; MAX_MESSAGE_BYTES + 10];
        let mut reader = BufReader::new(input.as_slice());
        let mut buf = Vec::new();

        assert_eq!(
            read_frame(&mut reader, &mut buf).await.unwrap(),
            Frame::Oversized(MAX_MESSAGE_BYTES + 10)
        );
        assert_eq!(read_frame(&mut reader, &mut buf).await.unwrap(), Frame::Eof);
    }
}
