//! Leading/trailing edge debouncer
//!
//! Turns a noisy stream of `set` calls into a small number of callback
//! invocations:
//!
//! ```text
//! set ─┬─ timer idle ──> callback(value) now, start ticker
//!      └─ ticking ─────> pending = value (last one wins)
//!
//! tick ─┬─ pending ────> callback(pending)
//!       └─ 2nd tick without a set ──> stop ticker
//! ```
//!
//! The first signal in a quiet period fires immediately. Signals arriving
//! while the ticker runs collapse into one trailing firing per tick. Two
//! consecutive ticks with no `set` in between stop the ticker, so an idle
//! debouncer costs nothing; the next `set` fires on the leading edge again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// Handle to a running debounce loop
///
/// Dropping every handle ends the loop.
pub struct Debouncer<T> {
    tx: mpsc::UnboundedSender<T>,
    ticking: Arc<AtomicBool>,
}

impl<T> Clone for Debouncer<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            ticking: Arc::clone(&self.ticking),
        }
    }
}

impl<T> std::fmt::Debug for Debouncer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debouncer")
            .field("ticking", &self.is_ticking())
            .finish()
    }
}

impl<T: Send + 'static> Debouncer<T> {
    /// Spawn a debounce loop on the current Tokio runtime.
    ///
    /// `callback` always runs on the loop task, never inside `set`.
    pub fn new<F>(duration: Duration, callback: F) -> Self
    where
        F: Fn(T) + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let ticking = Arc::new(AtomicBool::new(false));

        tokio::spawn(debounce_loop(rx, duration, callback, Arc::clone(&ticking)));

        Self { tx, ticking }
    }
}

impl<T> Debouncer<T> {
    /// Submit a value. Never blocks.
    pub fn set(&self, value: T) {
        if self.tx.send(value).is_err() {
            tracing::debug!("Debouncer loop has exited, dropping value");
        }
    }

    /// Whether the periodic ticker is currently running
    pub fn is_ticking(&self) -> bool {
        self.ticking.load(Ordering::SeqCst)
    }
}

async fn debounce_loop<T, F>(
    mut rx: mpsc::UnboundedReceiver<T>,
    duration: Duration,
    callback: F,
    ticking: Arc<AtomicBool>,
) where
    F: Fn(T),
{
    let mut ticker: Option<Interval> = None;
    let mut pending: Option<T> = None;
    let mut idle = false;

    loop {
        tokio::select! {
            value = rx.recv() => {
                let Some(value) = value else {
                    break;
                };

                idle = false;
                if ticker.is_none() {
                    callback(value);
                    pending = None;
                    ticker = Some(start_ticker(duration));
                    ticking.store(true, Ordering::SeqCst);
                } else {
                    pending = Some(value);
                }
            }
            _ = next_tick(&mut ticker) => {
                if idle {
                    ticker = None;
                    idle = false;
                    ticking.store(false, Ordering::SeqCst);
                } else {
                    idle = true;
                }

                if let Some(value) = pending.take() {
                    callback(value);
                }
            }
        }
    }

    ticking.store(false, Ordering::SeqCst);
}

fn start_ticker(duration: Duration) -> Interval {
    // First tick one full period after start, like a plain ticker
    let mut ticker = interval_at(Instant::now() + duration, duration);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

// ============================================================================
// Tests
// ============================================================================
