use crate::{
    config::{HttpConfig, HttpProtocol},
    errors::Error,
    fcgi::{self, FcgiClient},
    route::Route,
    server::dispatcher::{ConnectionEvents, ConnectionId, Dispatcher, Routes, Transport},
    Method, Request, Response,
};
use socket2::{Domain, Socket, Type};
use std::{
    collections::HashMap,
    future::Future,
    io,
    net::{SocketAddr, ToSocketAddrs},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{tcp::OwnedWriteHalf, TcpListener, TcpStream},
    sync::{mpsc, Notify},
    task::JoinSet,
};
use tracing::{debug, error, info};

#[derive(Debug)]
enum Outbound {
    Data(Vec<u8>),
    Close,
}

/// Plain TCP transport: one reader task and one writer task per connection.
#[derive(Debug, Default)]
pub struct TcpTransport {
    writers: Mutex<HashMap<ConnectionId, mpsc::UnboundedSender<Outbound>>>,
    next_id: AtomicU64,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self) -> (ConnectionId, mpsc::UnboundedReceiver<Outbound>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        self.writers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);
        (id, rx)
    }

    fn unregister(&self, id: ConnectionId) -> Option<mpsc::UnboundedSender<Outbound>> {
        self.writers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    /// Serves one accepted stream until either side closes it.
    async fn serve_connection(
        self: Arc<Self>,
        stream: TcpStream,
        remote: SocketAddr,
        events: Arc<dyn ConnectionEvents>,
        read_buffer_size: usize,
    ) {
        let _ = stream.set_nodelay(true);
        let (id, outbound) = self.register();
        let (mut reader, writer) = stream.into_split();
        let closed = Arc::new(Notify::new());

        events.on_connected(id, remote);
        tokio::spawn(write_loop(id, writer, outbound, closed.clone()));

        let mut buf = vec![0; read_buffer_size.max(512)];
        loop {
            tokio::select! {
                res = reader.read(&mut buf) => match res {
                    Ok(0) => break,
                    Ok(n) => events.on_data(id, &buf[..n]),
                    Err(err) => {
                        debug!(connection = id, error = %err, "read failed");
                        break;
                    }
                },
                () = closed.notified() => break,
            }
        }

        self.unregister(id);
        events.on_closed(id);
    }
}

async fn write_loop(
    id: ConnectionId,
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    closed: Arc<Notify>,
) {
    while let Some(message) = outbound.recv().await {
        match message {
            Outbound::Data(bytes) => {
                if let Err(err) = writer.write_all(&bytes).await {
                    error!(connection = id, error = %err, "write failed");
                    break;
                }
            }
            Outbound::Close => break,
        }
    }

    let _ = writer.shutdown().await;
    closed.notify_one();
}

impl Transport for TcpTransport {
    fn send(&self, id: ConnectionId, bytes: &[u8]) -> io::Result<()> {
        let writers = self.writers.lock().unwrap_or_else(PoisonError::into_inner);
        let sender = writers
            .get(&id)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;

        sender
            .send(Outbound::Data(bytes.to_vec()))
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))
    }

    fn close(&self, id: ConnectionId) {
        if let Some(sender) = self.unregister(id) {
            debug!(connection = id, "closing");
            let _ = sender.send(Outbound::Close);
        }
    }
}

/// Binds a listening socket with address reuse enabled.
fn bind(config: &HttpConfig) -> Result<TcpListener, Error> {
    let addr = config
        .bind_address()
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::from(io::ErrorKind::AddrNotAvailable))?;

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(socket2::Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    Ok(TcpListener::from_std(socket.into())?)
}

/// Resolves on the first Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = sigterm => {}
    }
}

/// HTTP server: TCP transport, dispatcher and route table.
///
/// # Examples
/// ```no_run
/// use webgate::{HttpConfig, Server, StatusCode};
///
/// #[tokio::main]
/// async fn main() -> Result<(), webgate::Error> {
///     Server::builder()
///         .config(HttpConfig {
///             server_port: 8080,
///             ..HttpConfig::default()
///         })
///         .on_get("/hello/{name:alpha}", |req, resp| {
///             resp.status(StatusCode::Ok)
///                 .body(format!("Hello, {}!", req.arg("name")));
///             true
///         })
///         .build()
///         .run()
///         .await
/// }
/// ```
pub struct Server {
    config: Arc<HttpConfig>,
    routes: Routes,
    listener: Option<TcpListener>,
}

impl Server {
    #[inline]
    pub fn builder() -> ServerBuilder {
        ServerBuilder {
            config: None,
            routes: Routes::default(),
            listener: None,
        }
    }

    /// Serves until Ctrl-C or SIGTERM.
    pub async fn run(self) -> Result<(), Error> {
        self.run_until(shutdown_signal()).await
    }

    /// Serves until `signal` resolves.
    ///
    /// Accepting stops at once; open connections are dropped and the
    /// dispatcher finishes the request it is processing.
    pub async fn run_until<F: Future<Output = ()>>(self, signal: F) -> Result<(), Error> {
        if self.config.http_protocol == HttpProtocol::Https {
            return Err(Error::UnsupportedProtocol(HttpProtocol::Https.as_str()));
        }

        let listener = match self.listener {
            Some(listener) => listener,
            None => bind(&self.config)?,
        };
        let local = listener.local_addr()?;

        let transport = Arc::new(TcpTransport::new());
        let dispatcher = Arc::new(Dispatcher::start(
            self.config.clone(),
            self.routes,
            transport.clone(),
        )?);
        let events: Arc<dyn ConnectionEvents> = dispatcher.clone();
        let read_buffer_size = self.config.read_buffer_size;

        info!(addr = %local, "webgate listening");

        let mut tasks = JoinSet::new();
        tokio::pin!(signal);

        loop {
            tokio::select! {
                biased;

                () = &mut signal => {
                    info!(connections = tasks.len(), "shutdown signal received");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote) = match res {
                        Ok(v) => v,
                        Err(err) => {
                            error!(error = %err, "accept failed");
                            continue;
                        }
                    };

                    tasks.spawn(transport.clone().serve_connection(
                        stream,
                        remote,
                        events.clone(),
                        read_buffer_size,
                    ));
                }

                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        tasks.shutdown().await;
        drop(events);
        let stopped = tokio::task::spawn_blocking(move || dispatcher.shutdown()).await;
        if let Err(err) = stopped {
            error!(error = %err, "dispatcher shutdown failed");
        }

        info!("webgate stopped");
        Ok(())
    }
}

/// Builder for [`Server`].
pub struct ServerBuilder {
    config: Option<HttpConfig>,
    routes: Routes,
    listener: Option<TcpListener>,
}

impl ServerBuilder {
    /// Server configuration; defaults to [`HttpConfig::default`].
    #[inline]
    pub fn config(mut self, config: HttpConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Serves on an already bound listener instead of binding
    /// `server_address:server_port`.
    #[inline]
    pub fn listener(mut self, listener: TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Registers a handler for `method` and `pattern`.
    ///
    /// # Panics
    /// If `pattern` is not a valid [route pattern](crate::route).
    #[track_caller]
    pub fn route<F>(mut self, method: Method, pattern: &str, handler: F) -> Self
    where
        F: Fn(&Request, &mut Response) -> bool + Send + Sync + 'static,
    {
        self.routes.add(Route::new(method, pattern), handler);
        self
    }

    #[track_caller]
    pub fn on_get<F>(self, pattern: &str, handler: F) -> Self
    where
        F: Fn(&Request, &mut Response) -> bool + Send + Sync + 'static,
    {
        self.route(Method::Get, pattern, handler)
    }

    #[track_caller]
    pub fn on_post<F>(self, pattern: &str, handler: F) -> Self
    where
        F: Fn(&Request, &mut Response) -> bool + Send + Sync + 'static,
    {
        self.route(Method::Post, pattern, handler)
    }

    /// Forwards matching requests to a FastCGI application.
    #[track_caller]
    pub fn fastcgi(self, method: Method, pattern: &str, client: Arc<FcgiClient>) -> Self {
        self.route(method, pattern, fcgi::gateway(client))
    }

    /// See [`Routes::set_pre_route`].
    pub fn pre_route<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Request, &mut Response) -> bool + Send + Sync + 'static,
    {
        self.routes.set_pre_route(hook);
        self
    }

    /// See [`Routes::set_post_route`].
    pub fn post_route<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Request, &mut Response) -> bool + Send + Sync + 'static,
    {
        self.routes.set_post_route(hook);
        self
    }

    pub fn build(self) -> Server {
        Server {
            config: Arc::new(self.config.unwrap_or_default()),
            routes: self.routes,
            listener: self.listener,
        }
    }
}
