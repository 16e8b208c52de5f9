//! webgate - Embeddable HTTP server and client with path-pattern routing and a FastCGI gateway
//!
//! Requests are read by a tokio TCP transport, assembled incrementally per
//! connection and dispatched by a single worker thread, so handlers never
//! run concurrently and need no synchronization of their own.
//!
//! # Protocol Support
//!
//! - **HTTP/1.1**: persistent connections, pipelining, `Content-Length` framing
//! - **FastCGI**: [gateway routes](fcgi::gateway) forwarding to php-fpm or any responder
//! - **Client role**: [`HttpClient`] over a pluggable [`ClientTransport`](client::ClientTransport)
//!
//! # Routing
//!
//! Routes are tried in registration order; a handler returning `false`
//! passes the request on to the next matching route. Unmatched requests
//! are answered with `404 Not Found`. See [`route`] for the pattern syntax.
//!
//! # Examples
//!
//! Quick start:
//! ```no_run
//! use webgate::{Server, StatusCode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), webgate::Error> {
//!     Server::builder()
//!         .on_get("/", |_, resp| {
//!             resp.status(StatusCode::Ok).body("Hello World!");
//!             true
//!         })
//!         .build()
//!         .run()
//!         .await
//! }
//! ```
//! Typed path variables, groups and hooks:
//! ```no_run
//! use webgate::{HttpConfig, Server, StatusCode};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), webgate::Error> {
//!     Server::builder()
//!         .config(HttpConfig {
//!             server_port: 8081,
//!             keep_alive_timeout: Duration::from_secs(10),
//!             ..HttpConfig::default()
//!         })
//!         .pre_route(|req, resp| {
//!             if req.header_value("Authorization").is_empty() {
//!                 resp.status(StatusCode::Unauthorized).body("login first");
//!                 return true;
//!             }
//!             false
//!         })
//!         .on_get("/api/(v1|v2)?/users/{id:numeric}", |req, resp| {
//!             resp.status(StatusCode::Ok)
//!                 .header("Content-Type", "application/json")
//!                 .body(format!(r#"{{"id":{}}}"#, req.arg("id")));
//!             true
//!         })
//!         .on_post("/api/echo", |req, resp| {
//!             match req.get_body().bytes() {
//!                 Ok(bytes) => resp.body(bytes.into_owned()),
//!                 Err(_) => resp.status(StatusCode::InternalServerError),
//!             };
//!             true
//!         })
//!         .build()
//!         .run()
//!         .await
//! }
//! ```
//!
//! # Logging
//!
//! Diagnostics go through [`tracing`]; the crate never installs a
//! subscriber. One access line per dispatched request is emitted at
//! `INFO` under the `webgate::access` target.

pub(crate) mod http {
    pub mod query;
    pub(crate) mod body;
    pub(crate) mod header;
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;
}
pub(crate) mod server {
    pub(crate) mod dispatcher;
    pub(crate) mod keep_alive;
    pub(crate) mod mailbox;
    pub(crate) mod queue;
    pub(crate) mod transport;
}
pub mod client;
pub mod config;
pub(crate) mod errors;
pub mod fcgi;
pub mod route;

pub use crate::{
    client::HttpClient,
    config::{HeaderPolicy, HttpConfig, HttpProtocol},
    errors::{Error, GatewayError, IoError, ParseError},
    fcgi::FcgiClient,
    http::{
        body::{determine_length, Body},
        header::{HeaderEntry, MessageHeader},
        query,
        request::{ParseState, Request},
        response::Response,
        types::{HeaderType, MessageRole, Method, Protocol, StatusCode},
    },
    route::Route,
    server::{
        dispatcher::{ConnectionEvents, ConnectionId, Dispatcher, Handler, Routes, Transport},
        transport::{Server, ServerBuilder, TcpTransport},
    },
};

#[cfg(test)]
pub mod tools {
    use crate::{
        client::ClientTransport,
        server::dispatcher::{ConnectionId, Transport},
        HttpConfig, Request,
    };
    use std::{
        collections::{HashMap, VecDeque},
        io,
        net::SocketAddr,
        str::from_utf8,
        sync::Mutex,
        thread,
        time::{Duration, Instant},
    };

    #[inline]
    pub fn str_op(value: &[u8]) -> &str {
        from_utf8(value).unwrap()
    }

    #[inline]
    pub fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    /// Parses a complete request with the default configuration.
    pub fn parse_request(raw: &[u8]) -> Request {
        let config = HttpConfig::default();
        let mut req = Request::incoming(1, Some(addr(40000)));
        while !req.is_complete() && req.parse(raw, &config).unwrap() {}

        assert!(req.is_complete(), "incomplete request: {}", String::from_utf8_lossy(raw));
        req
    }

    /// Polls `cond` for up to 5 seconds.
    #[track_caller]
    pub fn wait_until<F: FnMut() -> bool>(mut cond: F) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(2));
        }
    }

    /// Server transport recording everything the dispatcher does.
    #[derive(Debug, Default)]
    pub struct FakeTransport {
        sent: Mutex<HashMap<ConnectionId, VecDeque<Vec<u8>>>>,
        closed: Mutex<Vec<ConnectionId>>,
    }

    impl FakeTransport {
        /// Waits for the next payload sent to `id`.
        #[track_caller]
        pub fn next_sent(&self, id: ConnectionId) -> String {
            let mut next = None;
            wait_until(|| {
                next = self.sent.lock().unwrap().get_mut(&id).and_then(VecDeque::pop_front);
                next.is_some()
            });
            String::from_utf8(next.unwrap()).unwrap()
        }

        pub fn closed(&self) -> Vec<ConnectionId> {
            self.closed.lock().unwrap().clone()
        }
    }

    impl Transport for FakeTransport {
        fn send(&self, id: ConnectionId, bytes: &[u8]) -> io::Result<()> {
            self.sent
                .lock()
                .unwrap()
                .entry(id)
                .or_default()
                .push_back(bytes.to_vec());
            Ok(())
        }

        fn close(&self, id: ConnectionId) {
            self.closed.lock().unwrap().push(id);
        }
    }

    /// Client transport keeping every write.
    #[derive(Debug, Default)]
    pub struct RecordingClient {
        pub writes: Vec<Vec<u8>>,
        pub fail_writes: bool,
    }

    impl ClientTransport for RecordingClient {
        fn connect(&mut self, _: &str) -> io::Result<()> {
            Ok(())
        }

        fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
            if self.fail_writes {
                return Err(io::ErrorKind::BrokenPipe.into());
            }
            self.writes.push(bytes.to_vec());
            Ok(())
        }

        fn read(&mut self, _: usize) -> io::Result<Vec<u8>> {
            Ok(Vec::new())
        }

        fn poll(&mut self, _: Duration) -> io::Result<bool> {
            Ok(false)
        }

        fn is_connected(&self) -> bool {
            true
        }

        fn disconnect(&mut self) {}
    }
}
