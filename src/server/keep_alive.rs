use crate::server::{
    dispatcher::ConnectionId,
    mailbox::{Mailbox, Received},
};
use std::{
    collections::HashMap,
    io,
    sync::{Arc, Mutex},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Arm(ConnectionId, Instant),
    Cancel(ConnectionId),
}

/// Per-connection idle expiry.
///
/// Each [`arm`](KeepAliveTimer::arm) replaces the connection's previous
/// deadline. Expired connections are reported to the callback, on the
/// timer's own thread, exactly once per deadline.
pub(crate) struct KeepAliveTimer {
    mailbox: Arc<Mailbox<Command>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl KeepAliveTimer {
    pub(crate) fn start<F>(on_expire: F) -> io::Result<Self>
    where
        F: Fn(ConnectionId) + Send + 'static,
    {
        let mailbox = Arc::new(Mailbox::new());
        let inbox = mailbox.clone();

        let handle = thread::Builder::new()
            .name("webgate-keep-alive".into())
            .spawn(move || run(&inbox, on_expire))?;

        Ok(Self {
            mailbox,
            handle: Mutex::new(Some(handle)),
        })
    }

    #[inline]
    pub(crate) fn arm(&self, id: ConnectionId, timeout: Duration) {
        self.mailbox.push(Command::Arm(id, Instant::now() + timeout));
    }

    #[inline]
    pub(crate) fn cancel(&self, id: ConnectionId) {
        self.mailbox.push(Command::Cancel(id));
    }

    pub(crate) fn stop(&self) {
        self.mailbox.shutdown();

        let handle = self.handle.lock().ok().and_then(|mut h| h.take());
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("keep-alive timer thread panicked");
            }
        }
    }
}

impl Drop for KeepAliveTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run<F: Fn(ConnectionId)>(mailbox: &Mailbox<Command>, on_expire: F) {
    let mut deadlines: HashMap<ConnectionId, Instant> = HashMap::new();

    loop {
        let now = Instant::now();
        let expired: Vec<ConnectionId> = deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in expired {
            deadlines.remove(&id);
            tracing::debug!(connection = id, "keep-alive expired");
            on_expire(id);
        }

        let wait = deadlines
            .values()
            .min()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::from_secs(3600));

        match mailbox.recv_timeout(wait) {
            Received::Item(Command::Arm(id, deadline)) => {
                deadlines.insert(id, deadline);
            }
            Received::Item(Command::Cancel(id)) => {
                deadlines.remove(&id);
            }
            Received::TimedOut => {}
            Received::Shutdown => break,
        }
    }
}
