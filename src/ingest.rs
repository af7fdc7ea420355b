//! TCP ingest listener: encrypted frames in, acknowledgements out.
//!
//! DESIGN
//! ======
//! One task per connection. Bytes are accumulated in a `LineBuffer` until a
//! `\n` arrives, so frames split across reads are reassembled and several
//! frames in one read are all processed, in arrival order. Each complete
//! line is decoded, counted, logged and answered before the next read.
//!
//! ERROR HANDLING
//! ==============
//! - Undecodable frame: `error{reason: decrypt_failed}` event, the
//!   connection stays open.
//! - Socket read/write failure: `error{reason: tcp_error, details}` event,
//!   then the normal close path (counter decrement, `client_leave`).
//! - Partial line past `MAX_LINE_BYTES`: `error{reason: frame_too_large}`
//!   event, then the normal close path. There is no way to resync inside an
//!   oversized frame, so the connection is dropped.

use std::net::SocketAddr;

use frames::{CodecError, DELIMITER};
use serde_json::json;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::event::{Event, REASON_DECRYPT_FAILED, REASON_FRAME_TOO_LARGE, REASON_TCP_ERROR, now_ms};
use crate::shutdown::Shutdown;
use crate::state::AppState;

/// Characters of plaintext kept in `log` events and tracing output.
pub const PREVIEW_CHARS: usize = 200;

/// Longest partial line kept while waiting for its delimiter.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

const READ_CHUNK: usize = 8 * 1024;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("frame decode failed: {0}")]
    Decrypt(#[source] CodecError),
    #[error("reply encode failed: {0}")]
    Encrypt(#[source] CodecError),
    #[error("socket read failed: {0}")]
    Read(#[source] std::io::Error),
    #[error("socket write failed: {0}")]
    Write(#[source] std::io::Error),
    #[error("frame exceeds {limit} bytes without a delimiter ({pending} buffered)")]
    FrameTooLarge { pending: usize, limit: usize },
}

impl IngestError {
    /// Stable reason code for the `error` event payload.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Decrypt(_) => REASON_DECRYPT_FAILED,
            Self::Encrypt(_) => "encrypt_failed",
            Self::Read(_) | Self::Write(_) => REASON_TCP_ERROR,
            Self::FrameTooLarge { .. } => REASON_FRAME_TOO_LARGE,
        }
    }

    /// Human-readable details; `None` for decode failures.
    #[must_use]
    pub fn details(&self) -> Option<String> {
        match self {
            Self::Read(e) | Self::Write(e) => Some(e.to_string()),
            Self::Encrypt(e) => Some(e.to_string()),
            Self::FrameTooLarge { .. } => Some(self.to_string()),
            Self::Decrypt(_) => None,
        }
    }

    fn to_event(&self, remote: &str) -> Event {
        Event::error(remote, self.reason(), self.details().as_deref())
    }
}

// =============================================================================
// LINE BUFFER
// =============================================================================

/// Reassembles a byte stream into `\n`-terminated lines.
///
/// `scanned` marks how far the buffer is known to hold no delimiter, so a
/// long partial line is searched once rather than on every push.
#[derive(Debug)]
pub struct LineBuffer {
    buf: Vec<u8>,
    scanned: usize,
    limit: usize,
}

impl LineBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::with_limit(MAX_LINE_BYTES)
    }

    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self { buf: Vec::new(), scanned: 0, limit }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pop the next complete line, without its delimiter.
    pub fn next_line(&mut self) -> Option<Vec<u8>> {
        let Some(offset) = self.buf[self.scanned..].iter().position(|b| *b == DELIMITER) else {
            self.scanned = self.buf.len();
            return None;
        };
        let pos = self.scanned + offset;
        let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
        line.pop();
        self.scanned = 0;
        Some(line)
    }

    /// Bytes received after the last delimiter.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// The partial line has outgrown the limit. Only meaningful once
    /// `next_line` has drained every complete line.
    #[must_use]
    pub fn overflowed(&self) -> bool {
        self.buf.len() > self.limit
    }

    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// First `PREVIEW_CHARS` characters, with an ellipsis when cut.
#[must_use]
pub fn preview(text: &str) -> String {
    match text.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_owned(),
    }
}

// =============================================================================
// LISTENER
// =============================================================================

/// Accept connections until shutdown, one task per connection.
pub fn serve(listener: TcpListener, state: AppState, shutdown: Shutdown) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stop = shutdown.clone();
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let _ = stream.set_nodelay(true);
                        let state = state.clone();
                        let shutdown = shutdown.clone();
                        tokio::spawn(handle_connection(stream, addr, state, shutdown));
                    }
                    Err(e) => warn!(error = %e, "ingest: accept failed"),
                },
                () = stop.wait() => break,
            }
        }
        info!("ingest: listener closed");
    })
}

/// Drive one client connection to completion.
pub async fn handle_connection<S>(stream: S, addr: SocketAddr, state: AppState, shutdown: Shutdown)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    handle_connection_with(stream, addr, state, shutdown, LineBuffer::new()).await;
}

/// `handle_connection` with a caller-supplied line buffer (and its limit).
pub async fn handle_connection_with<S>(
    mut stream: S,
    addr: SocketAddr,
    state: AppState,
    mut shutdown: Shutdown,
    mut lines: LineBuffer,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let remote = addr.to_string();
    let active = state.aggregator.client_connected();
    info!(%remote, active, "ingest: client connected");
    state.hub.broadcast(&Event::client_join(&remote));

    let mut chunk = vec![0u8; READ_CHUNK];

    'conn: loop {
        let read = tokio::select! {
            read = stream.read(&mut chunk) => read,
            () = shutdown.wait() => break 'conn,
        };
        let n = match read {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                report(&state, &remote, &IngestError::Read(e));
                break;
            }
        };

        lines.push(&chunk[..n]);
        while let Some(line) = lines.next_line() {
            if let Err(e) = process_line(&mut stream, &line, &remote, &state).await {
                report(&state, &remote, &e);
                if matches!(e, IngestError::Write(_)) {
                    break 'conn;
                }
            }
        }
        if lines.overflowed() {
            let err = IngestError::FrameTooLarge { pending: lines.pending(), limit: lines.limit() };
            report(&state, &remote, &err);
            break;
        }
    }

    if lines.pending() > 0 {
        debug!(%remote, bytes = lines.pending(), "ingest: discarding partial frame");
    }
    let _ = stream.shutdown().await;

    let active = state.aggregator.client_disconnected();
    info!(%remote, active, "ingest: client disconnected");
    state.hub.broadcast(&Event::client_leave(&remote));
    broadcast_stats(&state);
}

fn report(state: &AppState, remote: &str, err: &IngestError) {
    warn!(%remote, reason = err.reason(), error = %err, "ingest: frame error");
    state.hub.broadcast(&err.to_event(remote));
}

fn broadcast_stats(state: &AppState) {
    state
        .hub
        .broadcast(&Event::stats(&state.aggregator.counters(), state.aggregator.last_message_at()));
}

/// Handle one complete line (delimiter already stripped).
///
/// Decode failures are reported and swallowed here; only errors that end
/// the connection or need the caller's attention are returned.
async fn process_line<W>(writer: &mut W, line: &[u8], remote: &str, state: &AppState) -> Result<(), IngestError>
where
    W: AsyncWrite + Unpin,
{
    if line.trim_ascii().is_empty() {
        return Ok(());
    }

    let wire_bytes = u64::try_from(line.len() + 1).unwrap_or(u64::MAX);
    state.aggregator.record_frame(wire_bytes);

    let plaintext = match state.codec.decode_frame(line) {
        Ok(plaintext) => plaintext,
        Err(e) => {
            report(state, remote, &IngestError::Decrypt(e));
            return Ok(());
        }
    };

    let text = String::from_utf8_lossy(&plaintext);
    let shown = preview(&text);
    info!(%remote, bytes = plaintext.len(), message = %shown, "ingest: frame received");
    state.hub.broadcast(&Event::log(remote, &shown));

    let reply = match &state.fetcher {
        Some(fetcher) => fetcher.respond(&plaintext).await,
        None => json!({ "ok": true, "receivedBytes": plaintext.len(), "at": now_ms() }).to_string(),
    };
    let frame = state.codec.encode_frame(reply.as_bytes()).map_err(IngestError::Encrypt)?;

    writer.write_all(&frame).await.map_err(IngestError::Write)?;
    state.aggregator.record_egress(u64::try_from(frame.len()).unwrap_or(u64::MAX));
    broadcast_stats(state);
    Ok(())
}

#[cfg(test)]
#[path = "ingest_test.rs"]
mod tests;
