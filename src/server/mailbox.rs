use crossbeam::channel::{self, Receiver, Sender};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
    time::Duration,
};

/// Multi-producer wake-up channel with a shutdown sentinel.
///
/// [`push`](Mailbox::push) wakes at most one blocked consumer.
/// [`shutdown`](Mailbox::shutdown) wakes every blocked consumer at once;
/// from then on [`recv`](Mailbox::recv) returns `None` immediately.
pub(crate) struct Mailbox<T> {
    tx: Sender<T>,
    rx: Receiver<T>,

    // Dropping the sender disconnects `stop_rx` for every consumer.
    stop_tx: Mutex<Option<Sender<()>>>,
    stop_rx: Receiver<()>,
    closed: AtomicBool,
}

/// Outcome of [`Mailbox::recv_timeout`].
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Received<T> {
    Item(T),
    TimedOut,
    Shutdown,
}

impl<T> Mailbox<T> {
    pub(crate) fn new() -> Self {
        let (tx, rx) = channel::unbounded();
        let (stop_tx, stop_rx) = channel::bounded(0);

        Self {
            tx,
            rx,
            stop_tx: Mutex::new(Some(stop_tx)),
            stop_rx,
            closed: AtomicBool::new(false),
        }
    }

    /// Returns `false` once the mailbox has been shut down.
    #[inline]
    pub(crate) fn push(&self, item: T) -> bool {
        !self.is_shutdown() && self.tx.send(item).is_ok()
    }

    /// Blocks until an item arrives; `None` is the shutdown sentinel.
    pub(crate) fn recv(&self) -> Option<T> {
        if self.is_shutdown() {
            return None;
        }

        crossbeam::select! {
            recv(self.rx) -> item => item.ok().filter(|_| !self.is_shutdown()),
            recv(self.stop_rx) -> _ => None,
        }
    }

    pub(crate) fn recv_timeout(&self, timeout: Duration) -> Received<T> {
        if self.is_shutdown() {
            return Received::Shutdown;
        }

        crossbeam::select! {
            recv(self.rx) -> item => match item {
                Ok(item) if !self.is_shutdown() => Received::Item(item),
                _ => Received::Shutdown,
            },
            recv(self.stop_rx) -> _ => Received::Shutdown,
            default(timeout) => Received::TimedOut,
        }
    }

    /// Non-blocking take, used to coalesce queued wake-ups.
    #[inline]
    pub(crate) fn try_recv(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub(crate) fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        if let Ok(mut stop) = self.stop_tx.lock() {
            stop.take();
        }
    }

    #[inline]
    pub(crate) fn is_shutdown(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
