//! Per-class request throttling.
//!
//! Each [`RequestClass`] owns an independent [`TokenBucket`]. Exhaustion
//! never rejects a caller: it queues in FIFO order until a refill hands it a
//! token.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::config::{BucketConfig, ThrottleConfig};

/// Floor on a waiter's sleep so float rounding near a refill boundary
/// cannot spin.
const MIN_WAIT: Duration = Duration::from_millis(1);

/// Number of recent processing times kept for the rolling average.
const PROCESSING_WINDOW: usize = 100;

// ---------------------------------------------------------------------------
// TokenBucket
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
    waiters: VecDeque<oneshot::Sender<()>>,
}

/// Lazily refilled token bucket with a FIFO waiter queue.
///
/// Invariant: `0 <= tokens <= capacity`. Tokens are added in whole units,
/// `floor(elapsed * refill_per_sec)` at a time, and go to queued waiters
/// before anyone else sees them.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

/// Snapshot of one bucket for the stats endpoint.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BucketStats {
    pub available_tokens: f64,
    pub capacity: f64,
    pub refill_per_sec: f64,
    pub waiting: usize,
}

impl TokenBucket {
    /// A full bucket. `capacity` is raised to at least one token and
    /// `refill_per_sec` to a small positive rate so waiters always drain.
    pub fn new(capacity: f64, refill_per_sec: f64) -> Self {
        let capacity = capacity.max(1.0);
        Self {
            capacity,
            refill_per_sec: refill_per_sec.max(0.001),
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
                waiters: VecDeque::new(),
            }),
        }
    }

    pub fn from_config(cfg: &BucketConfig) -> Self {
        Self::new(cfg.capacity, cfg.refill_per_sec)
    }

    /// Take one token, suspending in FIFO order when the bucket is empty.
    ///
    /// Returns `true` when the caller had to queue.
    pub async fn acquire(&self) -> bool {
        let rx = {
            let mut state = self.lock();
            self.refill(&mut state, Instant::now());
            if state.waiters.is_empty() && state.tokens >= 1.0 {
                state.tokens -= 1.0;
                return false;
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            rx
        };

        let mut ticket = Ticket { rx, bucket: self, granted: false };
        loop {
            let wait = self.time_to_next_token();
            // The sender is only dropped unsent together with the bucket, so
            // any completion of the receiver counts as a grant.
            let granted = tokio::select! {
                biased;
                _ = &mut ticket.rx => true,
                _ = tokio::time::sleep(wait) => false,
            };
            if granted {
                ticket.granted = true;
                return true;
            }
            let mut state = self.lock();
            self.refill(&mut state, Instant::now());
            drop(state);
        }
    }

    /// Current whole-token count after a lazy refill.
    pub fn available(&self) -> f64 {
        let mut state = self.lock();
        self.refill(&mut state, Instant::now());
        state.tokens
    }

    pub fn stats(&self) -> BucketStats {
        let mut state = self.lock();
        self.refill(&mut state, Instant::now());
        BucketStats {
            available_tokens: state.tokens,
            capacity: self.capacity,
            refill_per_sec: self.refill_per_sec,
            waiting: state.waiters.iter().filter(|w| !w.is_closed()).count(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BucketState> {
        // Critical sections never panic, so a poisoned lock still holds
        // consistent state.
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        let new_tokens = (elapsed * self.refill_per_sec).floor();
        if new_tokens < 1.0 {
            return;
        }
        state.tokens = (state.tokens + new_tokens).min(self.capacity);
        state.last_refill = if state.tokens >= self.capacity {
            now
        } else {
            state.last_refill + Duration::from_secs_f64(new_tokens / self.refill_per_sec)
        };

        while state.tokens >= 1.0 {
            let Some(waiter) = state.waiters.pop_front() else { break };
            if waiter.send(()).is_ok() {
                state.tokens -= 1.0;
            }
        }
    }

    fn time_to_next_token(&self) -> Duration {
        let state = self.lock();
        let elapsed = Instant::now()
            .saturating_duration_since(state.last_refill)
            .as_secs_f64();
        let period = 1.0 / self.refill_per_sec;
        Duration::from_secs_f64((period - elapsed).max(0.0)).max(MIN_WAIT)
    }

    fn give_back(&self) {
        let mut state = self.lock();
        state.tokens = (state.tokens + 1.0).min(self.capacity);
        while state.tokens >= 1.0 {
            let Some(waiter) = state.waiters.pop_front() else { break };
            if waiter.send(()).is_ok() {
                state.tokens -= 1.0;
            }
        }
    }
}

/// A queued acquisition. Dropping it before the grant is observed returns
/// any token already handed over.
struct Ticket<'a> {
    rx: oneshot::Receiver<()>,
    bucket: &'a TokenBucket,
    granted: bool,
}

impl Drop for Ticket<'_> {
    fn drop(&mut self) {
        if self.granted {
            return;
        }
        self.rx.close();
        if self.rx.try_recv().is_ok() {
            self.bucket.give_back();
        }
    }
}

// ---------------------------------------------------------------------------
// Throttler
// ---------------------------------------------------------------------------

/// Independent admission classes, each with its own bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestClass {
    Chat,
    Knowledge,
    Embedding,
}

impl std::fmt::Display for RequestClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestClass::Chat => write!(f, "chat"),
            RequestClass::Knowledge => write!(f, "knowledge"),
            RequestClass::Embedding => write!(f, "embedding"),
        }
    }
}

#[derive(Debug, Default)]
struct RequestCounters {
    total_requests: u64,
    throttled_requests: u64,
    peak_concurrent: u64,
    current_concurrent: u64,
    processing_ms: VecDeque<u64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RequestStats {
    pub total_requests: u64,
    pub throttled_requests: u64,
    pub peak_concurrent: u64,
    pub current_concurrent: u64,
    pub average_processing_ms: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ThrottleStats {
    pub enabled: bool,
    pub chat: BucketStats,
    pub knowledge: BucketStats,
    pub embedding: BucketStats,
    pub requests: RequestStats,
}

/// Process-wide admission control, one bucket per [`RequestClass`].
#[derive(Debug)]
pub struct Throttler {
    enabled: bool,
    chat: TokenBucket,
    knowledge: TokenBucket,
    embedding: TokenBucket,
    counters: Mutex<RequestCounters>,
}

impl Throttler {
    pub fn new(cfg: &ThrottleConfig) -> Self {
        Self {
            enabled: cfg.enabled,
            chat: TokenBucket::from_config(&cfg.chat),
            knowledge: TokenBucket::from_config(&cfg.knowledge),
            embedding: TokenBucket::from_config(&cfg.embedding),
            counters: Mutex::new(RequestCounters::default()),
        }
    }

    pub fn bucket(&self, class: RequestClass) -> &TokenBucket {
        match class {
            RequestClass::Chat => &self.chat,
            RequestClass::Knowledge => &self.knowledge,
            RequestClass::Embedding => &self.embedding,
        }
    }

    /// Wait for a `class` token, then run `f`.
    pub async fn throttled<F, Fut, T>(&self, class: RequestClass, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let started = Instant::now();
        let _inflight = self.enter();

        if self.enabled && self.bucket(class).acquire().await {
            self.counters().throttled_requests += 1;
            tracing::debug!(%class, "request queued by throttler");
        }

        let out = f().await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let mut c = self.counters();
        c.processing_ms.push_back(elapsed_ms);
        if c.processing_ms.len() > PROCESSING_WINDOW {
            c.processing_ms.pop_front();
        }
        out
    }

    pub fn stats(&self) -> ThrottleStats {
        let requests = {
            let c = self.counters();
            let average_processing_ms = if c.processing_ms.is_empty() {
                0.0
            } else {
                c.processing_ms.iter().sum::<u64>() as f64 / c.processing_ms.len() as f64
            };
            RequestStats {
                total_requests: c.total_requests,
                throttled_requests: c.throttled_requests,
                peak_concurrent: c.peak_concurrent,
                current_concurrent: c.current_concurrent,
                average_processing_ms,
            }
        };
        ThrottleStats {
            enabled: self.enabled,
            chat: self.chat.stats(),
            knowledge: self.knowledge.stats(),
            embedding: self.embedding.stats(),
            requests,
        }
    }

    fn enter(&self) -> InFlight<'_> {
        let mut c = self.counters();
        c.total_requests += 1;
        c.current_concurrent += 1;
        c.peak_concurrent = c.peak_concurrent.max(c.current_concurrent);
        InFlight { throttler: self }
    }

    fn counters(&self) -> std::sync::MutexGuard<'_, RequestCounters> {
        self.counters.lock().unwrap_or_else(|p| p.into_inner())
    }
}

struct InFlight<'a> {
    throttler: &'a Throttler,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut c = self.throttler.counters();
        c.current_concurrent = c.current_concurrent.saturating_sub(1);
    }
}
