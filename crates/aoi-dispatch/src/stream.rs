//! Reframes upstream byte streams for the caller's response sink.
//!
//! Two copy strategies: SSE line framing with `data: [DONE]` bookkeeping,
//! and raw chunked passthrough. Both refuse to treat an empty upstream body
//! as success and both synthesize the completion marker when the upstream
//! never sent one.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};

use crate::errors::{AbortSignal, DispatchError};

/// Terminal SSE frame synthesized when the upstream omits it.
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

const DONE_LINE: &str = "data: [DONE]";

/// Incremental response writer provided by the upstream server layer.
/// Status and headers must be written before the first body write.
#[async_trait]
pub trait ResponseSink: Send {
    async fn write_status(&mut self, status: u16) -> std::io::Result<()>;
    async fn insert_header(&mut self, name: &str, value: &str) -> std::io::Result<()>;
    async fn write(&mut self, chunk: &[u8]) -> std::io::Result<()>;
    async fn flush(&mut self) -> std::io::Result<()>;
}

/// Outcome of one body copy.
#[derive(Clone, Copy, Debug, Default)]
pub struct StreamStats {
    pub bytes_received: u64,
    pub done_seen: bool,
    pub done_synthesized: bool,
}

/// Copy an SSE (or SSE-wrapped) upstream body to the sink.
///
/// When `is_sse` is false the upstream body is not SSE-framed: the whole
/// body is read, newlines are collapsed and it is emitted as a single
/// `data:` frame so structured payloads are never split mid-frame.
pub async fn process_sse<S>(
    mut body: S,
    sink: &mut dyn ResponseSink,
    is_sse: bool,
    abort: &AbortSignal,
) -> Result<StreamStats, DispatchError>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Unpin,
{
    let mut stats = StreamStats::default();

    if !is_sse {
        let mut collected = String::new();
        while let Some(chunk) = body.next().await {
            if abort.is_aborted() {
                return Err(DispatchError::Aborted);
            }
            let bytes = chunk.map_err(DispatchError::StreamRead)?;
            stats.bytes_received += bytes.len() as u64;
            collected.push_str(&String::from_utf8_lossy(&bytes));
        }
        if stats.bytes_received == 0 {
            return Err(DispatchError::EmptyStream);
        }
        let collapsed: String = collected.chars().filter(|c| *c != '\n' && *c != '\r').collect();
        sink.write(format!("data: {collapsed}\n\n").as_bytes()).await?;
        sink.flush().await?;
        stats.done_synthesized = true;
        sink.write(DONE_FRAME.as_bytes()).await?;
        sink.flush().await?;
        return Ok(stats);
    }

    let mut line_buffer = String::new();
    while let Some(chunk) = body.next().await {
        if abort.is_aborted() {
            return Err(DispatchError::Aborted);
        }
        let bytes = chunk.map_err(DispatchError::StreamRead)?;
        stats.bytes_received += bytes.len() as u64;
        line_buffer.push_str(&String::from_utf8_lossy(&bytes));

        while let Some(newline) = line_buffer.find('\n') {
            let line: String = line_buffer.drain(..=newline).collect();
            if line.trim() == DONE_LINE {
                stats.done_seen = true;
            }
            sink.write(line.as_bytes()).await?;
            sink.flush().await?;
        }
    }

    // Trailing partial line without a terminator.
    if !line_buffer.is_empty() {
        if line_buffer.trim() == DONE_LINE {
            stats.done_seen = true;
        }
        sink.write(line_buffer.as_bytes()).await?;
        sink.flush().await?;
    }

    if stats.bytes_received == 0 {
        return Err(DispatchError::EmptyStream);
    }
    if !stats.done_seen {
        stats.done_synthesized = true;
        sink.write(DONE_FRAME.as_bytes()).await?;
        sink.flush().await?;
    }
    Ok(stats)
}

/// Copy a raw chunked upstream body to the sink, flushing after every
/// non-empty read. Applies the same empty-body and completion-marker rules
/// as the SSE path on EOF.
pub async fn process_http_stream<S>(
    mut body: S,
    sink: &mut dyn ResponseSink,
    abort: &AbortSignal,
) -> Result<StreamStats, DispatchError>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Unpin,
{
    let mut stats = StreamStats::default();

    while let Some(chunk) = body.next().await {
        if abort.is_aborted() {
            return Err(DispatchError::Aborted);
        }
        let bytes = chunk.map_err(DispatchError::StreamRead)?;
        if bytes.is_empty() {
            continue;
        }
        stats.bytes_received += bytes.len() as u64;
        sink.write(&bytes).await?;
        sink.flush().await?;
    }

    if stats.bytes_received == 0 {
        return Err(DispatchError::EmptyStream);
    }
    stats.done_synthesized = true;
    sink.write(DONE_FRAME.as_bytes()).await?;
    sink.flush().await?;
    Ok(stats)
}
