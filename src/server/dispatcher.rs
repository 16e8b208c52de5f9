use crate::{
    config::HttpConfig,
    errors::Error,
    route::Route,
    server::{
        keep_alive::KeepAliveTimer,
        mailbox::Mailbox,
        queue::{Next, RequestQueue},
    },
    Request, Response,
};
use std::{
    fmt, io,
    net::SocketAddr,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread::{self, JoinHandle},
};

/// Identifier the transport assigns to each accepted connection.
pub type ConnectionId = u64;

/// Route handler and pre/post hook signature.
///
/// Returns `true` when the request was processed.
pub type Handler = Arc<dyn Fn(&Request, &mut Response) -> bool + Send + Sync>;

/// Notifications a transport delivers for every connection it serves.
pub trait ConnectionEvents: Send + Sync {
    fn on_connected(&self, id: ConnectionId, remote: SocketAddr);
    fn on_data(&self, id: ConnectionId, bytes: &[u8]);
    fn on_closed(&self, id: ConnectionId);
}

/// Write side of a server transport.
pub trait Transport: Send + Sync {
    fn send(&self, id: ConnectionId, bytes: &[u8]) -> io::Result<()>;
    fn close(&self, id: ConnectionId);
}

/// Registered routes and hooks, tried in registration order.
#[derive(Clone, Default)]
pub struct Routes {
    entries: Vec<(Route, Handler)>,
    pre_route: Option<Handler>,
    post_route: Option<Handler>,
}

impl fmt::Debug for Routes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Routes")
            .field("entries", &self.entries.iter().map(|(r, _)| r).collect::<Vec<_>>())
            .field("pre_route", &self.pre_route.is_some())
            .field("post_route", &self.post_route.is_some())
            .finish()
    }
}

impl Routes {
    pub fn add<F>(&mut self, route: Route, handler: F)
    where
        F: Fn(&Request, &mut Response) -> bool + Send + Sync + 'static,
    {
        tracing::info!(route = %route, "route registered");
        self.entries.push((route, Arc::new(handler)));
    }

    /// Runs before routing; returning `true` skips the route table.
    pub fn set_pre_route<F>(&mut self, hook: F)
    where
        F: Fn(&Request, &mut Response) -> bool + Send + Sync + 'static,
    {
        self.pre_route = Some(Arc::new(hook));
    }

    /// Runs after routing; returning `true` marks the request processed.
    pub fn set_post_route<F>(&mut self, hook: F)
    where
        F: Fn(&Request, &mut Response) -> bool + Send + Sync + 'static,
    {
        self.post_route = Some(Arc::new(hook));
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Runs hooks and routes against `request`.
    ///
    /// A handler that panics counts as having declined. Unprocessed requests
    /// get a `404`.
    pub fn process(&self, request: &mut Request) -> (Response, bool) {
        let mut response = Response::new();
        let mut processed = false;

        if let Some(hook) = &self.pre_route {
            processed = guarded(hook, request, &mut response, "pre-route hook");
        }

        if !processed {
            for (route, handler) in &self.entries {
                if route.is_match(request)
                    && guarded(handler, request, &mut response, route.pattern())
                {
                    processed = true;
                    break;
                }
            }
        }

        if let Some(hook) = &self.post_route {
            processed |= guarded(hook, request, &mut response, "post-route hook");
        }

        if !processed {
            response = Response::new();
            response.not_found();
        }
        (response, processed)
    }
}

fn guarded(handler: &Handler, request: &Request, response: &mut Response, name: &str) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(|| handler(request, response))) {
        Ok(processed) => processed,
        Err(_) => {
            tracing::warn!(handler = name, path = request.path(), "handler panicked, treated as declined");
            *response = Response::new();
            false
        }
    }
}

#[inline]
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Shared {
    config: Arc<HttpConfig>,
    queue: Arc<Mutex<RequestQueue>>,
    mailbox: Mailbox<()>,
    transport: Arc<dyn Transport>,
    routes: Routes,
    timer: Option<KeepAliveTimer>,
}

/// Serializes requests from every connection onto one worker thread.
///
/// Readers report bytes through [`ConnectionEvents`]; the worker takes
/// completed requests in connection-registration order, routes them and
/// writes the responses back through the [`Transport`].
pub struct Dispatcher {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    pub fn start(
        config: Arc<HttpConfig>,
        routes: Routes,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, Error> {
        let queue = Arc::new(Mutex::new(RequestQueue::default()));

        let timer = match config.keep_alive() {
            Some(_) => {
                let queue = queue.clone();
                let transport = transport.clone();
                Some(KeepAliveTimer::start(move |id| {
                    transport.close(id);
                    lock(&queue).remove(id);
                })?)
            }
            None => None,
        };

        let shared = Arc::new(Shared {
            config,
            queue,
            mailbox: Mailbox::new(),
            transport,
            routes,
            timer,
        });

        let worker = {
            let shared = shared.clone();
            thread::Builder::new()
                .name("webgate-dispatcher".into())
                .spawn(move || run(&shared))?
        };

        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Stops the worker after the request it is processing, if any.
    pub fn shutdown(&self) {
        self.shared.mailbox.shutdown();

        if let Some(worker) = lock(&self.worker).take() {
            if worker.join().is_err() {
                tracing::error!("dispatcher worker panicked");
            }
        }
        if let Some(timer) = &self.shared.timer {
            timer.stop();
        }
    }

    #[inline]
    pub fn config(&self) -> &HttpConfig {
        &self.shared.config
    }

    /// Number of live queue entries.
    #[inline]
    pub fn connections(&self) -> usize {
        lock(&self.shared.queue).len()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl ConnectionEvents for Dispatcher {
    fn on_connected(&self, id: ConnectionId, remote: SocketAddr) {
        tracing::debug!(connection = id, %remote, "connected");
        lock(&self.shared.queue).insert(id, remote);
    }

    fn on_data(&self, id: ConnectionId, bytes: &[u8]) {
        let wake = lock(&self.shared.queue).append(id, bytes, &self.shared.config);
        if wake {
            self.shared.mailbox.push(());
        }
    }

    fn on_closed(&self, id: ConnectionId) {
        tracing::debug!(connection = id, "closed");
        lock(&self.shared.queue).mark_closed(id);
        if let Some(timer) = &self.shared.timer {
            timer.cancel(id);
        }
        self.shared.mailbox.push(());
    }
}

fn run(shared: &Shared) {
    while shared.mailbox.recv().is_some() {
        while shared.mailbox.try_recv().is_some() {}

        loop {
            let next = lock(&shared.queue).take_next(&shared.config);
            match next {
                Some(Next::Request(id, request)) => dispatch(shared, id, request),
                Some(Next::Failed(id, err)) => report(shared, id, err),
                None => break,
            }
        }

        lock(&shared.queue).sweep_closed();
    }

    tracing::debug!("dispatcher worker stopped");
}

fn dispatch(shared: &Shared, id: ConnectionId, mut request: Request) {
    let (response, processed) = shared.routes.process(&mut request);

    tracing::info!(
        target: "webgate::access",
        connection = id,
        method = %request.method(),
        path = request.path(),
        status = response.get_status(),
        processed,
        "dispatched"
    );

    if !response.should_send() {
        return;
    }

    let sent = response
        .serialize()
        .and_then(|bytes| Ok(shared.transport.send(id, &bytes)?));

    match sent {
        Err(err) => {
            tracing::error!(connection = id, error = %err, "failed to send response");
            close(shared, id);
        }
        Ok(()) if response.closes_connection() => close(shared, id),
        Ok(()) => {
            if let (Some(timer), Some(timeout)) = (&shared.timer, shared.config.keep_alive()) {
                timer.arm(id, timeout);
            }
        }
    }
}

fn report(shared: &Shared, id: ConnectionId, err: Error) {
    tracing::warn!(connection = id, error = %err, "rejected request");

    if let Err(send_err) = shared.transport.send(id, err.as_http()) {
        tracing::error!(connection = id, error = %send_err, "failed to send error response");
        close(shared, id);
        return;
    }
    if err.is_fatal() {
        close(shared, id);
    }
}

fn close(shared: &Shared, id: ConnectionId) {
    shared.transport.close(id);
    lock(&shared.queue).remove(id);
    if let Some(timer) = &shared.timer {
        timer.cancel(id);
    }
}
