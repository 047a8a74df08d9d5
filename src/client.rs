//! Streaming client for the upstream chat-completion API.
//!
//! A call is admitted by the chat-class throttle, then each attempt takes
//! its own connection-pool slot. Connection failures and non-2xx replies
//! are retried with exponential backoff (`100ms * 2^attempt`). The body is
//! exposed as a lazy [`ChatStream`] of cleaned text fragments ending in a
//! single [`StreamEvent::Done`].

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures_util::Stream;
use tokio_stream::StreamExt;
use tracing::{error, info, warn};

use crate::config::UpstreamConfig;
use crate::error::{ChatError, Result};
use crate::parser::{try_parse, LineBuffer, ParsedLine};
use crate::pool::ConnectionPool;
use crate::providers::CohereChatRequest;
use crate::throttle::{RequestClass, Throttler};

const BACKOFF_BASE: Duration = Duration::from_millis(100);

/// Sampling and retry knobs for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatOptions {
    pub temperature: f32,
    /// Nucleus-sampling probability mass.
    pub p: f32,
    pub max_tokens: u32,
    /// Retries after the first attempt.
    pub retry_attempts: u32,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self { temperature: 0.65, p: 0.8, max_tokens: 800, retry_attempts: 2 }
    }
}

impl ChatOptions {
    pub fn from_config(cfg: &UpstreamConfig) -> Self {
        Self {
            temperature: cfg.temperature,
            p: cfg.p,
            max_tokens: cfg.max_tokens,
            retry_attempts: cfg.retry_attempts,
        }
    }
}

/// Backoff before retry number `attempt` (1-based).
pub fn backoff_for(attempt: u32) -> Duration {
    BACKOFF_BASE * 2u32.saturating_pow(attempt)
}

// ---------------------------------------------------------------------------
// ChatStream
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// One cleaned fragment, in arrival order.
    Text(String),
    /// End of the upstream body, carrying every fragment concatenated.
    Done { full_text: String },
}

/// Finite, non-restartable sequence of upstream fragments.
///
/// Yields `Text` items followed by exactly one `Done`, or an `Err` if the
/// body breaks off, after which the stream ends.
pub struct ChatStream {
    inner: Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>,
}

impl ChatStream {
    /// Parse a raw body stream into fragments.
    pub fn from_body<S, B, E>(body: S) -> Self
    where
        S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
        B: AsRef<[u8]> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let inner = async_stream::stream! {
            let mut body = Box::pin(body);
            let mut lines = LineBuffer::new();
            let mut full_text = String::new();
            let started = Instant::now();
            let mut failed = false;

            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        error!(error = %e, "upstream body broke off");
                        yield Err(ChatError::Stream(e.to_string()));
                        failed = true;
                        break;
                    }
                };
                for line in lines.push(chunk.as_ref()) {
                    if let ParsedLine::Parsed(text) = try_parse(&line) {
                        full_text.push_str(&text);
                        yield Ok(StreamEvent::Text(text));
                    }
                }
            }

            if !failed {
                if let Some(text) = lines.finish().and_then(|tail| try_parse(&tail).into_text()) {
                    full_text.push_str(&text);
                    yield Ok(StreamEvent::Text(text));
                }
                info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    chars = full_text.chars().count(),
                    "upstream stream complete"
                );
                yield Ok(StreamEvent::Done { full_text });
            }
        };
        Self { inner: Box::pin(inner) }
    }

    /// Keep `guard` alive until the stream is exhausted or dropped.
    pub fn holding<G: Send + 'static>(self, guard: G) -> Self {
        let mut inner = self.inner;
        let held = async_stream::stream! {
            let _guard = guard;
            while let Some(item) = inner.next().await {
                yield item;
            }
        };
        Self { inner: Box::pin(held) }
    }
}

impl Stream for ChatStream {
    type Item = Result<StreamEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

// ---------------------------------------------------------------------------
// CohereClient
// ---------------------------------------------------------------------------

/// Upstream chat client. Cloning shares the HTTP client, pool and throttle.
#[derive(Clone)]
pub struct CohereClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    pool: ConnectionPool,
    throttler: Arc<Throttler>,
    defaults: ChatOptions,
}

impl CohereClient {
    pub fn new(cfg: &UpstreamConfig, throttler: Arc<Throttler>) -> Self {
        if cfg.api_key.is_none() {
            error!("missing upstream API key; set COHERE_API_KEY to enable chat completions");
        }
        Self {
            http: reqwest::Client::builder()
                .user_agent(concat!("qala-chat/", env!("CARGO_PKG_VERSION")))
                .build()
                .unwrap_or_default(),
            endpoint: cfg.endpoint.clone(),
            model: cfg.model.clone(),
            api_key: cfg.api_key.clone(),
            pool: ConnectionPool::new(cfg.max_connections),
            throttler,
            defaults: ChatOptions::from_config(cfg),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn default_options(&self) -> &ChatOptions {
        &self.defaults
    }

    /// Start a streamed completion of `message` under `preamble`.
    ///
    /// The returned stream holds its pool slot until it is exhausted or
    /// dropped. After `opts.retry_attempts` failed retries the last error is
    /// returned.
    pub async fn stream_chat(
        &self,
        message: &str,
        preamble: &str,
        opts: &ChatOptions,
    ) -> Result<ChatStream> {
        let api_key = self.api_key.as_deref().ok_or(ChatError::MissingApiKey)?;
        let request = CohereChatRequest {
            message: message.to_string(),
            model: self.model.clone(),
            stream: true,
            preamble: preamble.to_string(),
            temperature: opts.temperature,
            p: opts.p,
            max_tokens: opts.max_tokens,
        };

        self.throttler
            .throttled(RequestClass::Chat, || async {
                let mut attempt: u32 = 0;
                loop {
                    let permit = self.pool.acquire().await;
                    match self.send_once(api_key, &request).await {
                        Ok(resp) => {
                            return Ok(ChatStream::from_body(resp.bytes_stream()).holding(permit));
                        }
                        Err(e) => {
                            drop(permit);
                            attempt += 1;
                            if attempt > opts.retry_attempts || !e.is_transient() {
                                error!(error = %e, attempts = attempt, "upstream chat request failed");
                                return Err(e);
                            }
                            let backoff = backoff_for(attempt);
                            warn!(
                                error = %e,
                                attempt,
                                backoff_ms = backoff.as_millis() as u64,
                                "retrying upstream chat request"
                            );
                            tokio::time::sleep(backoff).await;
                        }
                    }
                }
            })
            .await
    }

    async fn send_once(&self, api_key: &str, request: &CohereChatRequest) -> Result<reqwest::Response> {
        let started = Instant::now();
        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .header("Accept", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| ChatError::Connect { url: self.endpoint.clone(), detail: e.to_string() })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ChatError::Upstream { status, body });
        }

        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "upstream accepted chat request"
        );
        Ok(resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn body(chunks: &[&str]) -> ChatStream {
        let owned: Vec<std::result::Result<Vec<u8>, std::io::Error>> =
            chunks.iter().map(|c| Ok(c.as_bytes().to_vec())).collect();
        ChatStream::from_body(stream::iter(owned))
    }

    async fn collect(mut s: ChatStream) -> Vec<Result<StreamEvent>> {
        let mut out = Vec::new();
        while let Some(item) = s.next().await {
            out.push(item);
        }
        out
    }

    #[test]
    fn test_default_options() {
        let o = ChatOptions::default();
        assert_eq!(o.max_tokens, 800);
        assert_eq!(o.retry_attempts, 2);
        assert!((o.p - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn test_backoff_doubles() {
        assert_eq!(backoff_for(1), Duration::from_millis(200));
        assert_eq!(backoff_for(2), Duration::from_millis(400));
        assert_eq!(backoff_for(3), Duration::from_millis(800));
    }

    #[tokio::test]
    async fn test_fragments_then_done_with_full_text() {
        let s = body(&[
            "{\"event_type\":\"stream-start\"}\n{\"event_type\":\"text-generation\",\"text\":\"سڵ\"}\n",
            "{\"event_type\":\"text-generation\",\"text\":\"او\"}\n",
            "{\"is_finished\":true,\"event_type\":\"stream-end\"}\n",
        ]);
        let events: Vec<StreamEvent> = collect(s).await.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(
            events,
            vec![
                StreamEvent::Text("سڵ".into()),
                StreamEvent::Text("او".into()),
                StreamEvent::Done { full_text: "سڵاو".into() },
            ]
        );
    }

    #[tokio::test]
    async fn test_malformed_line_does_not_stop_stream() {
        let s = body(&["{\"text\":\"a\"}\n{\"text\": broken\n{\"text\":\"b\"}\n"]);
        let events: Vec<StreamEvent> = collect(s).await.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(events.last(), Some(&StreamEvent::Done { full_text: "ab".into() }));
    }

    #[tokio::test]
    async fn test_unterminated_tail_is_parsed() {
        let s = body(&["{\"text\":\"x\"}\n{\"text\":\"tail"]);
        let events: Vec<StreamEvent> = collect(s).await.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(events.last(), Some(&StreamEvent::Done { full_text: "xtail".into() }));
    }

    #[tokio::test]
    async fn test_body_error_ends_stream_without_done() {
        let chunks: Vec<std::result::Result<Vec<u8>, std::io::Error>> = vec![
            Ok(b"{\"text\":\"a\"}\n".to_vec()),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
            Ok(b"{\"text\":\"never\"}\n".to_vec()),
        ];
        let out = collect(ChatStream::from_body(stream::iter(chunks))).await;
        assert_eq!(out.len(), 2);
        assert!(matches!(out[0], Ok(StreamEvent::Text(ref t)) if t == "a"));
        assert!(matches!(out[1], Err(ChatError::Stream(_))));
    }

    #[tokio::test]
    async fn test_holding_releases_guard_on_drop() {
        let pool = ConnectionPool::new(1);
        let permit = pool.acquire().await;
        let s = body(&["{\"text\":\"a\"}\n"]).holding(permit);
        assert_eq!(pool.stats().active_connections, 1);
        drop(s);
        assert_eq!(pool.stats().active_connections, 0);
    }

    #[tokio::test]
    async fn test_holding_releases_guard_when_exhausted() {
        let pool = ConnectionPool::new(1);
        let permit = pool.acquire().await;
        let s = body(&["{\"text\":\"a\"}\n"]).holding(permit);
        let out = collect(s).await;
        assert_eq!(out.len(), 2);
        assert_eq!(pool.stats().active_connections, 0);
    }

    #[tokio::test]
    async fn test_missing_key_fails_fast() {
        let throttler = Arc::new(Throttler::new(&Default::default()));
        let client = CohereClient::new(&UpstreamConfig::default(), throttler);
        assert!(!client.is_configured());
        let err = client
            .stream_chat("hi", "sys", &ChatOptions::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ChatError::MissingApiKey));
    }
}
