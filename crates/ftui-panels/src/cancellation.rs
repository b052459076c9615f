// SPDX-License-Identifier: Apache-2.0
#![forbid(unsafe_code)]

//! Cooperative cancellation for in-flight panel loads.
//!
//! The scheduler owns one [`CancellationSource`] per loading request and hands
//! the matching [`CancellationToken`] to the asset source inside the
//! [`LoadTicket`](crate::panel::LoadTicket). Cancelling a request (explicitly,
//! by timeout, or because the runtime is shutting down) only flips the shared
//! flag: the scheduler drops its own bookkeeping immediately, and the asset
//! source is expected to notice the token and abandon its work.
//!
//! Tokens are `Send + Sync` so a loader running on a worker thread can poll or
//! block on them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use web_time::Duration;

/// Observer side of a load cancellation flag.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Shared>,
}

/// Control side of a load cancellation flag.
///
/// Dropping the source does not cancel the token.
pub struct CancellationSource {
    inner: Arc<Shared>,
}

struct Shared {
    cancelled: AtomicBool,
    wake: (Mutex<()>, Condvar),
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl std::fmt::Debug for CancellationSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationSource")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl CancellationSource {
    /// Create an uncancelled source.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Shared {
                cancelled: AtomicBool::new(false),
                wake: (Mutex::new(()), Condvar::new()),
            }),
        }
    }

    /// Token observing this source.
    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Request cancellation and wake any loader blocked in
    /// [`CancellationToken::wait_timeout`].
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        let (lock, cvar) = &self.inner.wake;
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        cvar.notify_all();
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    /// Returns `true` once the owning request was cancelled or timed out.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Block a loader thread until cancellation or until `duration` elapses.
    ///
    /// Returns `true` if cancelled. Never call this from the tick thread.
    pub fn wait_timeout(&self, duration: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        let (lock, cvar) = &self.inner.wake;
        let mut guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        let start = web_time::Instant::now();
        loop {
            if self.is_cancelled() {
                return true;
            }
            let elapsed = start.elapsed();
            if elapsed >= duration {
                return false;
            }
            let (next, _) = cvar
                .wait_timeout(guard, duration - elapsed)
                .unwrap_or_else(|e| e.into_inner());
            guard = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn fresh_token_is_not_cancelled() {
        let source = CancellationSource::new();
        assert!(!source.token().is_cancelled());
        assert!(!source.is_cancelled());
    }

    #[test]
    fn cancel_reaches_every_clone() {
        let source = CancellationSource::new();
        let a = source.token();
        let b = a.clone();
        source.cancel();
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
    }

    #[test]
    fn dropping_source_leaves_token_live() {
        let source = CancellationSource::new();
        let token = source.token();
        drop(source);
        assert!(!token.is_cancelled());
    }

    #[test]
    fn wait_timeout_expires_without_cancel() {
        let source = CancellationSource::new();
        assert!(!source.token().wait_timeout(Duration::from_millis(5)));
    }

    #[test]
    fn loader_thread_wakes_on_cancel() {
        let source = CancellationSource::new();
        let token = source.token();
        let loader = thread::spawn(move || token.wait_timeout(Duration::from_secs(10)));
        thread::sleep(std::time::Duration::from_millis(10));
        source.cancel();
        assert!(loader.join().unwrap());
    }
}
