//! Per-request half-close tracker.
//!
//! A `Channel` performs no I/O: it is pure bookkeeping shared by the two
//! bridge dispatches that move bytes between a client and a worker. Each
//! side closes independently; `on_close` fires exactly once, after both
//! sides are closed and the owning slave has called `watch()`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use cocaine_proto::ErrorCode;

type CloseCallback = Box<dyn FnOnce(Option<ErrorCode>) + Send>;

struct Inner {
    tx_closed: bool,
    rx_closed: bool,
    watched: bool,
    fired: bool,
    error: Option<ErrorCode>,
    on_close: Option<CloseCallback>,
}

/// Tracks transmit/receive half-closes for one channel.
///
/// `tx` is the worker->client direction, `rx` is client->worker. Both must
/// close before the channel is considered done; `close_both` short-circuits
/// both at once and records the error that forced the closure.
pub struct Channel {
    pub id: u64,
    pub birthstamp: DateTime<Utc>,
    inner: Mutex<Inner>,
    // fast un-contended reads for `is_closed()` without locking.
    closed: AtomicBool,
}

impl Channel {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            birthstamp: Utc::now(),
            inner: Mutex::new(Inner {
                tx_closed: false,
                rx_closed: false,
                watched: false,
                fired: false,
                error: None,
                on_close: None,
            }),
            closed: AtomicBool::new(false),
        }
    }

    pub fn close_send(&self) {
        self.close_side(true, false, None);
    }

    pub fn close_recv(&self) {
        self.close_side(false, true, None);
    }

    /// Forces both sides closed, recording `error_code` as the reason.
    /// Used when the Overseer evicts the owning slave.
    pub fn close_both(&self, error_code: ErrorCode) {
        self.close_side(true, true, Some(error_code));
    }

    fn close_side(&self, tx: bool, rx: bool, error: Option<ErrorCode>) {
        let callback = {
            let mut inner = self.inner.lock().unwrap();
            if tx {
                inner.tx_closed = true;
            }
            if rx {
                inner.rx_closed = true;
            }
            if error.is_some() {
                inner.error = error;
            }
            self.maybe_fire(&mut inner)
        };
        if let Some((cb, err)) = callback {
            cb(err);
        }
    }

    /// Registers interest in the close event. If the channel is already
    /// fully closed, `on_close` fires immediately (inline, before this
    /// call returns) rather than being silently dropped.
    pub fn watch(&self, on_close: impl FnOnce(Option<ErrorCode>) + Send + 'static) {
        let callback = {
            let mut inner = self.inner.lock().unwrap();
            inner.watched = true;
            inner.on_close = Some(Box::new(on_close));
            self.maybe_fire(&mut inner)
        };
        if let Some((cb, err)) = callback {
            cb(err);
        }
    }

    fn maybe_fire(&self, inner: &mut Inner) -> Option<(CloseCallback, Option<ErrorCode>)> {
        if inner.tx_closed && inner.rx_closed && inner.watched && !inner.fired {
            inner.fired = true;
            self.closed.store(true, Ordering::Release);
            inner.on_close.take().map(|cb| (cb, inner.error))
        } else {
            None
        }
    }

    pub fn is_tx_closed(&self) -> bool {
        self.inner.lock().unwrap().tx_closed
    }

    pub fn is_rx_closed(&self) -> bool {
        self.inner.lock().unwrap().rx_closed
    }

    /// True once `on_close` has fired.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    #[test]
    fn fires_once_both_sides_and_watched() {
        let channel = Channel::new(1);
        let fired = Arc::new(AtomicU32::new(0));
        let f = fired.clone();
        channel.watch(move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        });
        channel.close_send();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        channel.close_recv();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn watch_after_closure_fires_immediately() {
        let channel = Channel::new(1);
        channel.close_send();
        channel.close_recv();
        let fired = Arc::new(AtomicU32::new(0));
        let f = fired.clone();
        channel.watch(move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn close_both_carries_error_code() {
        let channel = Channel::new(1);
        let seen = Arc::new(Mutex::new(None));
        let s = seen.clone();
        channel.watch(move |err| {
            *s.lock().unwrap() = err;
        });
        channel.close_both(ErrorCode::Resource);
        assert_eq!(*seen.lock().unwrap(), Some(ErrorCode::Resource));
    }

    #[test]
    fn never_fires_twice_under_repeated_closes() {
        let channel = Channel::new(1);
        let fired = Arc::new(AtomicU32::new(0));
        let f = fired.clone();
        channel.watch(move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        });
        channel.close_send();
        channel.close_send();
        channel.close_recv();
        channel.close_recv();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
