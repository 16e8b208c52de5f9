//! Blocking HTTP client over a pluggable byte transport
//!
//! # Examples
//!
//! ```no_run
//! use webgate::{HttpClient, HttpConfig, Method, Request};
//!
//! let mut client = HttpClient::new(HttpConfig::default());
//! let resp = client
//!     .send("127.0.0.1:8080", &Request::new(Method::Get, "/hello/world"))
//!     .unwrap();
//!
//! println!("{} {}", resp.get_status(), resp.get_body().text().unwrap());
//! ```

use crate::{config::HttpConfig, errors::Error, Request, Response};
use socket2::{Domain, Socket, Type};
use std::{
    io::{self, Read, Write},
    net::{TcpStream, ToSocketAddrs},
    time::{Duration, Instant},
};

/// Byte stream used by [`HttpClient`] and the FastCGI gateway.
pub trait ClientTransport {
    fn connect(&mut self, address: &str) -> io::Result<()>;

    /// Writes the whole buffer.
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Reads at most `max_len` bytes; an empty result means the peer closed.
    fn read(&mut self, max_len: usize) -> io::Result<Vec<u8>>;

    /// Waits up to `timeout` for readable bytes (or end of stream).
    fn poll(&mut self, timeout: Duration) -> io::Result<bool>;

    fn is_connected(&self) -> bool;

    fn disconnect(&mut self);
}

/// Blocking TCP transport with connect and read timeouts.
#[derive(Debug)]
pub struct TcpClient {
    stream: Option<TcpStream>,
    timeout: Duration,
}

impl TcpClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            stream: None,
            timeout: timeout.max(Duration::from_millis(1)),
        }
    }

    fn stream(&mut self) -> io::Result<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))
    }
}

impl ClientTransport for TcpClient {
    fn connect(&mut self, address: &str) -> io::Result<()> {
        let mut last = io::Error::from(io::ErrorKind::AddrNotAvailable);

        for addr in address.to_socket_addrs()? {
            let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(socket2::Protocol::TCP))?;
            if let Err(err) = socket.connect_timeout(&addr.into(), self.timeout) {
                last = err;
                continue;
            }

            let stream: TcpStream = socket.into();
            stream.set_nodelay(true)?;
            stream.set_read_timeout(Some(self.timeout))?;
            stream.set_write_timeout(Some(self.timeout))?;

            tracing::debug!(%addr, "connected");
            self.stream = Some(stream);
            return Ok(());
        }

        Err(last)
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream()?.write_all(bytes)
    }

    fn read(&mut self, max_len: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0; max_len.max(1)];
        let n = self.stream()?.read(&mut buf)?;
        if n == 0 {
            self.stream = None;
        }

        buf.truncate(n);
        Ok(buf)
    }

    fn poll(&mut self, timeout: Duration) -> io::Result<bool> {
        let default = self.timeout;
        let stream = self.stream()?;
        stream.set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;

        let mut peeked = [0; 1];
        let ready = match stream.peek(&mut peeked) {
            Ok(_) => Ok(true),
            Err(err) if matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => Ok(false),
            Err(err) => Err(err),
        };

        stream.set_read_timeout(Some(default))?;
        ready
    }

    #[inline]
    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
    }
}

/// HTTP/1.1 client sending one request at a time.
///
/// The connection is reused between calls to the same address until the
/// server answers with `Connection: close` or closes it. Sending to another
/// address reconnects.
#[derive(Debug)]
pub struct HttpClient<T: ClientTransport = TcpClient> {
    config: HttpConfig,
    transport: T,
    /// Address the open connection leads to.
    peer: Option<String>,
}

impl HttpClient {
    pub fn new(config: HttpConfig) -> Self {
        let transport = TcpClient::new(config.client_timeout);
        Self::with_transport(config, transport)
    }
}

impl<T: ClientTransport> HttpClient<T> {
    pub fn with_transport(config: HttpConfig, transport: T) -> Self {
        Self {
            config,
            transport,
            peer: None,
        }
    }

    /// Reuses the open connection only when it leads to `address`.
    fn ensure_connected(&mut self, address: &str) -> Result<(), Error> {
        if self.transport.is_connected() && self.peer.as_deref() == Some(address) {
            return Ok(());
        }

        if self.transport.is_connected() {
            tracing::debug!(from = ?self.peer, to = address, "switching connection");
            self.transport.disconnect();
        }
        self.peer = None;
        self.transport.connect(address)?;
        self.peer = Some(address.to_string());
        Ok(())
    }

    /// Sends `request` to `address` (`host:port`) and reads the response.
    ///
    /// Fails with [`Error::Transport`] when the connection breaks or no
    /// complete response arrives within `client_timeout`.
    pub fn send(&mut self, address: &str, request: &Request) -> Result<Response, Error> {
        self.ensure_connected(address)?;

        if let Err(err) = request.send(&mut self.transport, address, &self.config.user_agent) {
            self.transport.disconnect();
            return Err(err);
        }

        match self.receive() {
            Ok(response) => {
                if response.closes_connection() {
                    self.transport.disconnect();
                }
                Ok(response)
            }
            Err(err) => {
                self.transport.disconnect();
                Err(err)
            }
        }
    }

    fn receive(&mut self) -> Result<Response, Error> {
        let deadline = Instant::now() + self.config.client_timeout;
        let mut response = Response::new();
        let mut buf = Vec::new();

        loop {
            while !response.is_complete() && response.parse(&buf, &self.config)? {}
            if response.is_complete() {
                return Ok(response);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(io::Error::from(io::ErrorKind::TimedOut).into());
            }
            if !self.transport.poll(remaining)? {
                continue;
            }

            let chunk = self.transport.read(self.config.read_buffer_size)?;
            if chunk.is_empty() {
                return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
            }
            buf.extend_from_slice(&chunk);
        }
    }

    #[inline]
    pub fn transport(&self) -> &T {
        &self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{errors::IoError, Method};
    use std::{net::TcpListener, thread};

    /// Serves one connection, answering each request head with the next canned reply.
    fn serve(replies: Vec<&'static [u8]>) -> (String, thread::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut heads = Vec::new();

            for reply in replies {
                let mut head = Vec::new();
                let mut byte = [0; 1];
                while !head.ends_with(b"\r\n\r\n") {
                    stream.read_exact(&mut byte).unwrap();
                    head.push(byte[0]);
                }
                heads.push(String::from_utf8(head).unwrap());

                // Split the reply to exercise incremental parsing.
                let (a, b) = reply.split_at(reply.len() / 2);
                stream.write_all(a).unwrap();
                stream.flush().unwrap();
                thread::sleep(Duration::from_millis(10));
                stream.write_all(b).unwrap();
            }
            heads
        });

        (addr, handle)
    }

    #[test]
    fn reuses_connection_until_close() {
        let (addr, server) = serve(vec![
            b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 5\r\n\r\nfirst",
            b"HTTP/1.1 404 Not Found\r\nConnection: close\r\nContent-Length: 0\r\n\r\n",
        ]);
        let mut client = HttpClient::new(HttpConfig {
            user_agent: "webgate-test".into(),
            ..HttpConfig::default()
        });

        let resp = client.send(&addr, &Request::new(Method::Get, "/one")).unwrap();
        assert_eq!(resp.get_status(), 200);
        assert_eq!(resp.header_value("content-type"), "text/plain");
        assert_eq!(resp.get_body().text().unwrap(), "first");
        assert!(client.transport().is_connected());

        let resp = client.send(&addr, &Request::new(Method::Get, "/two")).unwrap();
        assert_eq!(resp.get_status(), 404);
        assert!(resp.get_body().is_empty());
        assert!(!client.transport().is_connected());

        let heads = server.join().unwrap();
        assert!(heads[0].starts_with("GET /one HTTP/1.1\r\n"));
        assert!(heads[0].contains(&format!("Host: {addr}\r\n")));
        assert!(heads[0].contains("User-Agent: webgate-test\r\n"));
        assert!(heads[1].starts_with("GET /two HTTP/1.1\r\n"));
    }

    #[test]
    fn reconnects_when_address_changes() {
        let (a, server_a) = serve(vec![b"HTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\nA"]);
        let (b, server_b) = serve(vec![b"HTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\nB"]);
        let mut client = HttpClient::new(HttpConfig::default());

        let resp = client.send(&a, &Request::new(Method::Get, "/")).unwrap();
        assert_eq!(resp.get_body().text().unwrap(), "A");
        assert!(client.transport().is_connected());

        let resp = client.send(&b, &Request::new(Method::Get, "/")).unwrap();
        assert_eq!(resp.get_body().text().unwrap(), "B");

        assert_eq!(server_a.join().unwrap().len(), 1);
        let heads = server_b.join().unwrap();
        assert!(heads[0].contains(&format!("Host: {b}\r\n")));
    }

    #[test]
    fn early_close_is_a_transport_error() {
        let (addr, server) = serve(vec![b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nshort"]);
        let mut client = HttpClient::new(HttpConfig::default());

        let err = client.send(&addr, &Request::new(Method::Get, "/")).unwrap_err();
        assert_eq!(
            err,
            Error::Transport(IoError(io::ErrorKind::UnexpectedEof.into()))
        );
        assert!(!client.transport().is_connected());
        server.join().unwrap();
    }

    #[test]
    fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_millis(300));
            drop(stream);
        });

        let mut client = HttpClient::new(HttpConfig {
            client_timeout: Duration::from_millis(100),
            ..HttpConfig::default()
        });

        let err = client.send(&addr, &Request::new(Method::Get, "/")).unwrap_err();
        assert_eq!(err, Error::Transport(IoError(io::ErrorKind::TimedOut.into())));
        server.join().unwrap();
    }
}
