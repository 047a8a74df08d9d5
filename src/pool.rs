//! Bounded pool of outbound upstream connections.
//!
//! A permit is a slot, not a socket: `reqwest` keeps its own keep-alive
//! pool underneath. The pool only caps how many upstream calls are in
//! flight at once.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::oneshot;

#[derive(Debug)]
struct PoolState {
    active: usize,
    max: usize,
    waiters: VecDeque<oneshot::Sender<()>>,
}

/// FIFO-fair connection limiter. Cloning shares the same pool.
#[derive(Debug, Clone)]
pub struct ConnectionPool {
    inner: Arc<Mutex<PoolState>>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct PoolStats {
    pub active_connections: usize,
    pub max_connections: usize,
    pub waiting_requests: usize,
}

impl ConnectionPool {
    pub fn new(max_connections: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PoolState {
                active: 0,
                max: max_connections.max(1),
                waiters: VecDeque::new(),
            })),
        }
    }

    /// Take a slot, queueing behind earlier callers when the pool is full.
    ///
    /// The slot is returned when the [`PoolPermit`] is dropped.
    pub async fn acquire(&self) -> PoolPermit {
        let rx = {
            let mut state = self.lock();
            if state.active < state.max {
                state.active += 1;
                return PoolPermit { pool: self.clone() };
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            rx
        };

        let mut waiter = Waiter { rx, pool: self.clone(), handed_over: false };
        // A released slot is handed to us with `active` unchanged; the sender
        // is never dropped unsent while the pool is alive.
        let _ = (&mut waiter.rx).await;
        waiter.handed_over = true;
        PoolPermit { pool: self.clone() }
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.lock();
        PoolStats {
            active_connections: state.active,
            max_connections: state.max,
            waiting_requests: state.waiters.iter().filter(|w| !w.is_closed()).count(),
        }
    }

    /// Hand the slot straight to the oldest live waiter, or free it.
    fn release(&self) {
        let mut state = self.lock();
        while let Some(waiter) = state.waiters.pop_front() {
            if waiter.send(()).is_ok() {
                return;
            }
        }
        state.active = state.active.saturating_sub(1);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// One outstanding slot. Released exactly once, on drop.
#[derive(Debug)]
pub struct PoolPermit {
    pool: ConnectionPool,
}

impl Drop for PoolPermit {
    fn drop(&mut self) {
        self.pool.release();
    }
}

/// Queue position of a pending `acquire`. If the caller goes away after a
/// slot was handed over but before it was observed, the slot is released.
struct Waiter {
    rx: oneshot::Receiver<()>,
    pool: ConnectionPool,
    handed_over: bool,
}

impl Drop for Waiter {
    fn drop(&mut self) {
        if self.handed_over {
            return;
        }
        self.rx.close();
        if self.rx.try_recv().is_ok() {
            self.pool.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready};

    #[tokio::test]
    async fn test_acquire_below_max_is_immediate() {
        let pool = ConnectionPool::new(2);
        let _a = pool.acquire().await;
        let _b = pool.acquire().await;
        assert_eq!(
            pool.stats(),
            PoolStats { active_connections: 2, max_connections: 2, waiting_requests: 0 }
        );
    }

    #[tokio::test]
    async fn test_release_hands_slot_to_waiter_without_changing_active() {
        let pool = ConnectionPool::new(1);
        let first = pool.acquire().await;

        let mut second = tokio_test::task::spawn(pool.acquire());
        assert_pending!(second.poll());
        assert_eq!(pool.stats().waiting_requests, 1);

        drop(first);
        assert!(second.is_woken());
        let permit = assert_ready!(second.poll());
        assert_eq!(pool.stats().active_connections, 1);
        assert_eq!(pool.stats().waiting_requests, 0);

        drop(permit);
        assert_eq!(pool.stats().active_connections, 0);
    }

    #[tokio::test]
    async fn test_release_unblocks_exactly_one_waiter() {
        let pool = ConnectionPool::new(1);
        let first = pool.acquire().await;

        let mut w1 = tokio_test::task::spawn(pool.acquire());
        let mut w2 = tokio_test::task::spawn(pool.acquire());
        assert_pending!(w1.poll());
        assert_pending!(w2.poll());

        drop(first);
        let _p1 = assert_ready!(w1.poll());
        assert_pending!(w2.poll());
        assert_eq!(pool.stats().active_connections, 1);
        assert_eq!(pool.stats().waiting_requests, 1);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_is_skipped() {
        let pool = ConnectionPool::new(1);
        let first = pool.acquire().await;

        let mut gone = tokio_test::task::spawn(pool.acquire());
        let mut kept = tokio_test::task::spawn(pool.acquire());
        assert_pending!(gone.poll());
        assert_pending!(kept.poll());
        drop(gone);

        drop(first);
        let _p = assert_ready!(kept.poll());
        assert_eq!(pool.stats().active_connections, 1);
    }

    #[tokio::test]
    async fn test_active_never_exceeds_max_under_contention() {
        let pool = ConnectionPool::new(3);
        let peak = Arc::new(Mutex::new(0usize));
        let mut handles = Vec::new();
        for _ in 0..20 {
            let pool = pool.clone();
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let _permit = pool.acquire().await;
                let active = pool.stats().active_connections;
                {
                    let mut p = peak.lock().unwrap();
                    *p = (*p).max(active);
                }
                tokio::task::yield_now().await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert!(*peak.lock().unwrap() <= 3);
        assert_eq!(pool.stats().active_connections, 0);
    }

    #[test]
    fn test_zero_max_is_raised_to_one() {
        let pool = ConnectionPool::new(0);
        assert_eq!(pool.stats().max_connections, 1);
    }
}
