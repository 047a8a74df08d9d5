//! SSE delivery of answers to the waiting client.
//!
//! Knowledge-base answers are split into lines and paced out in small
//! batches; upstream fragments are forwarded as they arrive. Both paths end
//! with exactly one `[DONE]` frame, also after an error.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::Stream;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_stream::StreamExt;
use tracing::{error, warn};

use crate::client::{ChatStream, StreamEvent};
use crate::config::DeliveryConfig;
use crate::error::{ChatError, Result};
use crate::knowledge::KnowledgeEntry;

/// Terminal frame; clients treat it as end of stream.
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

/// Response head sent before the first frame.
pub const SSE_HEADERS: &str = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\nConnection: close\r\nAccess-Control-Allow-Origin: *\r\n\r\n";

/// Encode `text` as one SSE event. Embedded newlines become extra `data:`
/// lines of the same event.
pub fn sse_frame(text: &str) -> String {
    let mut frame = String::with_capacity(text.len() + 8);
    for line in text.split('\n') {
        frame.push_str("data: ");
        frame.push_str(line.strip_suffix('\r').unwrap_or(line));
        frame.push('\n');
    }
    frame.push('\n');
    frame
}

/// Text shown when the upstream call failed for good.
pub fn error_text(err: &ChatError) -> String {
    match err {
        ChatError::Upstream { status, .. } => format!("Error connecting to AI service: {status}"),
        _ => "Error processing your request".to_string(),
    }
}

/// Non-blank response lines followed by the entry's links.
pub fn knowledge_lines(entry: &KnowledgeEntry) -> Vec<String> {
    entry
        .response
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.trim().is_empty())
        .map(str::to_string)
        .chain(entry.links().iter().cloned())
        .collect()
}

/// Delay before frame `position` of `total`.
///
/// `base / clamp(total / 10, 1, 5)`, stretched by `1 + position / total` so
/// later frames arrive a little slower.
pub fn pacing_delay(base: Duration, position: usize, total: usize) -> Duration {
    if total == 0 {
        return Duration::ZERO;
    }
    let divisor = (total as f64 / 10.0).clamp(1.0, 5.0);
    let stretch = 1.0 + position as f64 / total as f64;
    Duration::from_secs_f64(base.as_secs_f64() / divisor * stretch)
}

// ---------------------------------------------------------------------------
// Delay
// ---------------------------------------------------------------------------

/// Source of pacing pauses. Swapped for [`NoDelay`] in tests.
pub trait Delay: Send + Sync {
    fn delay(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Pauses on the tokio timer, so paused test time applies.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioDelay;

impl Delay for TokioDelay {
    fn delay(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoDelay;

impl Delay for NoDelay {
    fn delay(&self, _duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(async {})
    }
}

/// Lazily paced sequence of `lines`.
///
/// Lines go out in batches of `batch_size`. Every line in a batch is timed
/// from the start of that batch, and the next batch starts once the last
/// line of the current one is out.
pub fn paced_frames(
    lines: Vec<String>,
    base: Duration,
    batch_size: usize,
    delay: Arc<dyn Delay>,
) -> Pin<Box<dyn Stream<Item = String> + Send>> {
    let total = lines.len();
    let batch_size = batch_size.max(1);
    Box::pin(async_stream::stream! {
        let mut lines = lines.into_iter().enumerate().peekable();
        while lines.peek().is_some() {
            let mut waited = Duration::ZERO;
            for (position, line) in lines.by_ref().take(batch_size) {
                let due = pacing_delay(base, position, total);
                let pause = due.saturating_sub(waited);
                if !pause.is_zero() {
                    delay.delay(pause).await;
                }
                waited = waited.max(due);
                yield line;
            }
        }
    })
}

// ---------------------------------------------------------------------------
// SseWriter
// ---------------------------------------------------------------------------

/// Frame writer over a client connection.
///
/// The first failed write marks the writer closed; later sends are skipped.
/// Write errors are logged, never returned.
pub struct SseWriter<W> {
    inner: W,
    closed: bool,
    frames: usize,
}

impl<W: AsyncWrite + Unpin> SseWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, closed: false, frames: 0 }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Frames written so far, `[DONE]` included.
    pub fn frames_sent(&self) -> usize {
        self.frames
    }

    pub async fn send_headers(&mut self) -> bool {
        self.write_raw(SSE_HEADERS).await
    }

    /// Send `text` as one frame. Returns `false` once the client is gone.
    pub async fn send(&mut self, text: &str) -> bool {
        let ok = self.write_raw(&sse_frame(text)).await;
        if ok {
            self.frames += 1;
        }
        ok
    }

    pub async fn done(&mut self) -> bool {
        let ok = self.write_raw(DONE_FRAME).await;
        if ok {
            self.frames += 1;
        }
        ok
    }

    async fn write_raw(&mut self, data: &str) -> bool {
        if self.closed {
            return false;
        }
        let result = match self.inner.write_all(data.as_bytes()).await {
            Ok(()) => self.inner.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(error = %e, "client connection closed; dropping remaining frames");
            self.closed = true;
            return false;
        }
        true
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

// ---------------------------------------------------------------------------
// Delivery paths
// ---------------------------------------------------------------------------

/// Pace out a knowledge-base answer, then `[DONE]`. Returns the text that
/// was delivered.
pub async fn deliver_knowledge<W: AsyncWrite + Unpin>(
    writer: &mut SseWriter<W>,
    entry: &KnowledgeEntry,
    cfg: &DeliveryConfig,
    delay: Arc<dyn Delay>,
) -> String {
    let mut frames = paced_frames(knowledge_lines(entry), cfg.base_delay(), cfg.batch_size, delay);
    while let Some(line) = frames.next().await {
        if !writer.send(&line).await {
            break;
        }
    }
    writer.done().await;
    entry.response.clone()
}

/// Forward an upstream stream, then `[DONE]`.
///
/// A failed call or a broken body is reported with one inline error frame
/// before `[DONE]`. Returns the accumulated text, possibly partial.
pub async fn deliver_llm<W: AsyncWrite + Unpin>(
    writer: &mut SseWriter<W>,
    stream: Result<ChatStream>,
) -> String {
    let mut full_text = String::new();
    match stream {
        Ok(mut stream) => {
            while let Some(event) = stream.next().await {
                match event {
                    Ok(StreamEvent::Text(text)) => {
                        full_text.push_str(&text);
                        if !writer.send(&text).await {
                            // client left; stop reading the upstream
                            break;
                        }
                    }
                    Ok(StreamEvent::Done { full_text: complete }) => {
                        full_text = complete;
                    }
                    Err(e) => {
                        error!(error = %e, "upstream stream failed mid-response");
                        writer.send(&error_text(&e)).await;
                        break;
                    }
                }
            }
        }
        Err(e) => {
            error!(error = %e, "upstream chat unavailable");
            writer.send(&error_text(&e)).await;
        }
    }
    writer.done().await;
    full_text
}
