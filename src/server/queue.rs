use crate::{config::HttpConfig, errors::Error, server::dispatcher::ConnectionId, Request};
use std::net::SocketAddr;

/// Per-connection accumulator of raw bytes and the request being assembled.
#[derive(Debug)]
pub(crate) struct QueueEntry {
    pub(crate) id: ConnectionId,
    pub(crate) remote: SocketAddr,
    buffer: Vec<u8>,
    request: Option<Request>,
    ready: bool,
    failure: Option<Error>,
    closed: bool,
}

/// Work handed to the dispatcher worker.
#[derive(Debug)]
pub(crate) enum Next {
    Request(ConnectionId, Request),
    Failed(ConnectionId, Error),
}

impl QueueEntry {
    fn new(id: ConnectionId, remote: SocketAddr) -> Self {
        Self {
            id,
            remote,
            buffer: Vec::new(),
            request: None,
            ready: false,
            failure: None,
            closed: false,
        }
    }

    #[inline]
    fn has_work(&self) -> bool {
        self.ready || self.failure.is_some()
    }

    /// Parses as far as the buffered bytes allow.
    ///
    /// A failed request is dropped together with the buffered bytes.
    fn advance(&mut self, config: &HttpConfig) -> Result<(), Error> {
        if self.ready || (self.request.is_none() && self.buffer.is_empty()) {
            return Ok(());
        }

        let request = self
            .request
            .get_or_insert_with(|| Request::incoming(self.id, Some(self.remote)));

        let result = loop {
            match request.parse(&self.buffer, config) {
                Ok(true) if !request.is_complete() => continue,
                Ok(_) => break Ok(()),
                Err(err) => break Err(err),
            }
        };

        match result {
            Ok(()) => {
                self.ready = request.is_complete();
                Ok(())
            }
            Err(err) => {
                self.request = None;
                self.buffer.clear();
                Err(err)
            }
        }
    }

    /// Transfers the ready request out, keeping bytes that follow it.
    fn take(&mut self) -> Option<Request> {
        if !self.ready {
            return None;
        }

        let request = self.request.take()?;
        let used = request.total_wire_size().min(self.buffer.len());
        self.buffer.drain(..used);
        self.ready = false;
        Some(request)
    }
}

/// Connection entries in registration order.
#[derive(Debug, Default)]
pub(crate) struct RequestQueue {
    entries: Vec<QueueEntry>,
}

impl RequestQueue {
    pub(crate) fn insert(&mut self, id: ConnectionId, remote: SocketAddr) {
        self.entries.retain(|e| e.id != id);
        self.entries.push(QueueEntry::new(id, remote));
    }

    #[inline]
    fn entry_mut(&mut self, id: ConnectionId) -> Option<&mut QueueEntry> {
        self.entries.iter_mut().find(|e| e.id == id)
    }

    /// Appends received bytes and parses them.
    ///
    /// Returns `true` when the entry has work for the worker.
    pub(crate) fn append(&mut self, id: ConnectionId, bytes: &[u8], config: &HttpConfig) -> bool {
        let Some(entry) = self.entry_mut(id) else {
            tracing::warn!(connection = id, "data for unknown connection");
            return false;
        };

        entry.buffer.extend_from_slice(bytes);
        if let Err(err) = entry.advance(config) {
            entry.failure = Some(err);
        }
        entry.has_work()
    }

    /// Flags the connection as closed; the entry stays until its work is drained.
    pub(crate) fn mark_closed(&mut self, id: ConnectionId) {
        if let Some(entry) = self.entry_mut(id) {
            entry.closed = true;
        }
    }

    pub(crate) fn remove(&mut self, id: ConnectionId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        before != self.entries.len()
    }

    /// Takes the work of the first entry, in registration order, that has any.
    ///
    /// Bytes pipelined behind a taken request are parsed right away.
    pub(crate) fn take_next(&mut self, config: &HttpConfig) -> Option<Next> {
        let entry = self.entries.iter_mut().find(|e| e.has_work())?;

        if let Some(err) = entry.failure.take() {
            return Some(Next::Failed(entry.id, err));
        }

        let request = entry.take()?;
        if let Err(err) = entry.advance(config) {
            entry.failure = Some(err);
        }
        Some(Next::Request(entry.id, request))
    }

    #[inline]
    pub(crate) fn has_work(&self) -> bool {
        self.entries.iter().any(QueueEntry::has_work)
    }

    /// Drops closed entries that have nothing left to dispatch.
    pub(crate) fn sweep_closed(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| !e.closed || e.has_work());
        before - self.entries.len()
    }

    #[inline]
    pub(crate) fn contains(&self, id: ConnectionId) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    #[inline]
    pub(crate) fn remote(&self, id: ConnectionId) -> Option<SocketAddr> {
        self.entries.iter().find(|e| e.id == id).map(|e| e.remote)
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
