use crate::{
    client::{ClientTransport, TcpClient},
    config::HttpConfig,
    errors::{Error, GatewayError, IoError, ParseError},
    fcgi::record::{self, EndRequest, RecordType},
    server::dispatcher::ConnectionId,
    Request, Response, StatusCode,
};
use std::{
    collections::{BTreeMap, HashMap},
    io,
    sync::{
        atomic::{AtomicU16, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::{Duration, Instant},
};
use tracing::{debug, error, warn};

/// CGI parameters sent with every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FcgiParam {
    QueryString,
    RequestMethod,
    ContentType,
    ContentLength,
    ScriptFilename,
    ScriptName,
    PathInfo,
    RequestUri,
    DocumentUri,
    DocumentRoot,
    ServerProtocol,
    GatewayInterface,
    RemoteAddr,
    RemotePort,
    ServerAddr,
    ServerPort,
    ServerName,
}

impl FcgiParam {
    pub const ALL: [FcgiParam; 17] = [
        FcgiParam::QueryString,
        FcgiParam::RequestMethod,
        FcgiParam::ContentType,
        FcgiParam::ContentLength,
        FcgiParam::ScriptFilename,
        FcgiParam::ScriptName,
        FcgiParam::PathInfo,
        FcgiParam::RequestUri,
        FcgiParam::DocumentUri,
        FcgiParam::DocumentRoot,
        FcgiParam::ServerProtocol,
        FcgiParam::GatewayInterface,
        FcgiParam::RemoteAddr,
        FcgiParam::RemotePort,
        FcgiParam::ServerAddr,
        FcgiParam::ServerPort,
        FcgiParam::ServerName,
    ];

    pub const fn default_name(&self) -> &'static str {
        match self {
            FcgiParam::QueryString => "QUERY_STRING",
            FcgiParam::RequestMethod => "REQUEST_METHOD",
            FcgiParam::ContentType => "CONTENT_TYPE",
            FcgiParam::ContentLength => "CONTENT_LENGTH",
            FcgiParam::ScriptFilename => "SCRIPT_FILENAME",
            FcgiParam::ScriptName => "SCRIPT_NAME",
            FcgiParam::PathInfo => "PATH_INFO",
            FcgiParam::RequestUri => "REQUEST_URI",
            FcgiParam::DocumentUri => "DOCUMENT_URI",
            FcgiParam::DocumentRoot => "DOCUMENT_ROOT",
            FcgiParam::ServerProtocol => "SERVER_PROTOCOL",
            FcgiParam::GatewayInterface => "GATEWAY_INTERFACE",
            FcgiParam::RemoteAddr => "REMOTE_ADDR",
            FcgiParam::RemotePort => "REMOTE_PORT",
            FcgiParam::ServerAddr => "SERVER_ADDR",
            FcgiParam::ServerPort => "SERVER_PORT",
            FcgiParam::ServerName => "SERVER_NAME",
        }
    }

    /// Value of this parameter for `request`.
    ///
    /// `PATH_INFO` and `DOCUMENT_URI` are always empty.
    pub fn value(&self, request: &Request, config: &HttpConfig) -> String {
        match self {
            FcgiParam::QueryString => query_string(request.uri()).to_string(),
            FcgiParam::RequestMethod => request.method().as_str().to_string(),
            FcgiParam::ContentType => request.header_value("Content-Type").to_string(),
            FcgiParam::ContentLength => request.header_value("Content-Length").to_string(),
            FcgiParam::ScriptFilename => config
                .root_folder
                .join(request.path().trim_start_matches('/'))
                .to_string_lossy()
                .into_owned(),
            FcgiParam::ScriptName => request.path().to_string(),
            FcgiParam::PathInfo | FcgiParam::DocumentUri => String::new(),
            FcgiParam::RequestUri => request.uri().to_string(),
            FcgiParam::DocumentRoot => config.root_folder.to_string_lossy().into_owned(),
            FcgiParam::ServerProtocol => request.version().to_string(),
            FcgiParam::GatewayInterface => "CGI/1.1".to_string(),
            FcgiParam::RemoteAddr => request
                .remote_addr()
                .map(|addr| addr.ip().to_string())
                .unwrap_or_default(),
            FcgiParam::RemotePort => request
                .remote_addr()
                .map(|addr| addr.port().to_string())
                .unwrap_or_default(),
            FcgiParam::ServerAddr => config.server_address.clone(),
            FcgiParam::ServerPort => config.server_port.to_string(),
            FcgiParam::ServerName => config.server_name.clone(),
        }
    }
}

/// Raw query string, without the `?`.
#[inline]
fn query_string(uri: &str) -> &str {
    crate::query::split_uri(uri).1
}

/// Upstream response being reassembled.
#[derive(Debug)]
struct Correlation {
    connection_id: ConnectionId,
    stdout: Vec<u8>,
}

/// A finished upstream request.
#[derive(Debug)]
pub struct Completion {
    pub request_id: u16,
    pub connection_id: ConnectionId,
    pub result: Result<Response, GatewayError>,
}

/// FastCGI client multiplexing requests over one upstream connection.
///
/// Requests are correlated with their responses by a 16-bit request id.
/// At most [`HttpConfig::max_fcgi_in_flight`] requests may await their
/// `EndRequest` record at once.
///
/// # Examples
/// ```no_run
/// use std::sync::Arc;
/// use webgate::{FcgiClient, HttpConfig, Method, Server};
///
/// # async fn run() -> Result<(), webgate::Error> {
/// let config = HttpConfig {
///     root_folder: "/var/www".into(),
///     ..HttpConfig::default()
/// };
///
/// let php = Arc::new(FcgiClient::new("127.0.0.1:9000", config.clone()));
///
/// Server::builder()
///     .config(config)
///     .fastcgi(Method::Get, "/{script:alpha}.php", php.clone())
///     .fastcgi(Method::Post, "/{script:alpha}.php", php)
///     .build()
///     .run()
///     .await
/// # }
/// ```
pub struct FcgiClient<T: ClientTransport = TcpClient> {
    address: String,
    config: HttpConfig,
    params: BTreeMap<FcgiParam, String>,
    keep_connection: bool,

    next_id: AtomicU16,
    correlations: Mutex<HashMap<u16, Correlation>>,
    finished: Mutex<HashMap<u16, Result<Response, GatewayError>>>,
    inbound: Mutex<Vec<u8>>,
    transport: Mutex<T>,
}

impl FcgiClient {
    pub fn new(address: &str, config: HttpConfig) -> Self {
        let transport = TcpClient::new(config.fcgi_timeout);
        Self::with_transport(address, config, transport)
    }
}

impl<T: ClientTransport> FcgiClient<T> {
    pub fn with_transport(address: &str, config: HttpConfig, transport: T) -> Self {
        let params = FcgiParam::ALL
            .into_iter()
            .map(|param| (param, param.default_name().to_string()))
            .collect();

        Self {
            address: address.to_string(),
            config,
            params,
            keep_connection: false,
            next_id: AtomicU16::new(1),
            correlations: Mutex::new(HashMap::new()),
            finished: Mutex::new(HashMap::new()),
            inbound: Mutex::new(Vec::new()),
            transport: Mutex::new(transport),
        }
    }

    /// Renames the parameter sent for `param`.
    pub fn set_param_name(&mut self, param: FcgiParam, name: &str) -> &mut Self {
        self.params.insert(param, name.to_string());
        self
    }

    /// Asks the application to keep the connection open after each request
    /// (`FCGI_KEEP_CONN`). Off by default: the connection is reopened for
    /// every request.
    pub fn set_keep_connection(&mut self, keep: bool) -> &mut Self {
        self.keep_connection = keep;
        self
    }

    #[inline]
    pub fn keep_connection(&self) -> bool {
        self.keep_connection
    }

    #[inline]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Number of requests awaiting their `EndRequest` record.
    #[inline]
    pub fn in_flight(&self) -> usize {
        lock(&self.correlations).len()
    }

    /// Name-value pairs sent for `request`, in table order.
    pub fn params(&self, request: &Request) -> Vec<(String, String)> {
        self.params
            .iter()
            .map(|(param, name)| (name.clone(), param.value(request, &self.config)))
            .collect()
    }

    /// Next id: never 0, never one still awaiting a response.
    fn issue_id(&self, live: &HashMap<u16, Correlation>) -> u16 {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 && !live.contains_key(&id) {
                return id;
            }
        }
    }

    /// Records of one request: begin, params with terminator, stdin with terminator.
    fn encode(&self, id: u16, request: &Request) -> Result<Vec<u8>, GatewayError> {
        let mut payload = Vec::new();
        for (name, value) in self.params(request) {
            payload.extend_from_slice(&record::build_param_packet(&name, &value));
        }

        let body = request.get_body().bytes().map_err(|err| match err {
            Error::Transport(err) => GatewayError::Write(err),
            other => GatewayError::Write(IoError(io::Error::other(other.to_string()))),
        })?;

        let mut out = record::build_begin_request(id, self.keep_connection);
        out.extend_from_slice(&record::build_params_record(id, &payload));
        out.extend_from_slice(&record::build_stdin_records(id, &body));
        Ok(out)
    }

    /// Registers `request` and writes its records upstream.
    ///
    /// Returns the request id the response will carry.
    pub fn send_request(&self, request: &Request) -> Result<u16, GatewayError> {
        let id = {
            let mut live = lock(&self.correlations);
            let limit = self.config.fcgi_in_flight_limit();
            if live.len() >= limit {
                return Err(GatewayError::TooManyInFlight(limit));
            }

            let id = self.issue_id(&live);
            live.insert(
                id,
                Correlation {
                    connection_id: request.connection_id(),
                    stdout: Vec::new(),
                },
            );
            id
        };

        let sent = self.encode(id, request).and_then(|bytes| {
            let mut transport = lock(&self.transport);
            if !transport.is_connected() {
                lock(&self.inbound).clear();
                transport
                    .connect(&self.address)
                    .map_err(|err| GatewayError::Connect {
                        address: self.address.clone(),
                        source: err.into(),
                    })?;
            }

            transport.write(&bytes).map_err(|err| {
                self.drop_connection(&mut transport);
                GatewayError::Write(err.into())
            })
        });

        match sent {
            Ok(()) => {
                debug!(request_id = id, path = request.path(), "fastcgi request sent");
                Ok(id)
            }
            Err(err) => {
                lock(&self.correlations).remove(&id);
                Err(err)
            }
        }
    }

    /// Feeds bytes read from the upstream connection.
    ///
    /// Records are routed to their request by id; a record not yet complete
    /// stays buffered for the next call. Returns the requests finished by
    /// an `EndRequest` record.
    pub fn on_bytes_received(&self, bytes: &[u8]) -> Vec<Completion> {
        let mut inbound = lock(&self.inbound);
        inbound.extend_from_slice(bytes);

        let mut completions = Vec::new();
        let mut live = lock(&self.correlations);
        let mut pos = 0;

        while let Some((rec, used)) = record::next_record(&inbound[pos..]) {
            pos += used;
            let id = rec.header.request_id;

            let Some(entry) = live.get_mut(&id) else {
                debug!(request_id = id, kind = rec.header.kind, "record for unknown request");
                continue;
            };

            match rec.header.record_type() {
                Some(RecordType::Stdout) => entry.stdout.extend_from_slice(rec.content),
                Some(RecordType::Stderr) => {
                    warn!(request_id = id, "fastcgi stderr: {}", String::from_utf8_lossy(rec.content));
                }
                Some(RecordType::EndRequest) => {
                    let Some(entry) = live.remove(&id) else {
                        continue;
                    };
                    let result = self.finish(id, entry.stdout, EndRequest::decode(rec.content));

                    completions.push(Completion {
                        request_id: id,
                        connection_id: entry.connection_id,
                        result,
                    });
                }
                _ => debug!(request_id = id, kind = rec.header.kind, "ignored record"),
            }
        }

        inbound.drain(..pos);
        completions
    }

    fn finish(&self, id: u16, stdout: Vec<u8>, end: Option<EndRequest>) -> Result<Response, GatewayError> {
        let end = end.ok_or(GatewayError::InvalidResponse(ParseError::InvalidStatusLine))?;
        if !end.is_complete() {
            return Err(GatewayError::Rejected(end.protocol_status));
        }

        debug!(request_id = id, app_status = end.app_status, bytes = stdout.len(), "fastcgi request finished");
        Response::from_cgi(&stdout, self.config.header_policy).map_err(GatewayError::InvalidResponse)
    }

    /// Sends `request` upstream and blocks until its response is complete
    /// or `fcgi_timeout` elapses.
    pub fn forward(&self, request: &Request) -> Result<Response, GatewayError> {
        let id = self.send_request(request)?;
        let deadline = Instant::now() + self.config.fcgi_timeout;

        let result = loop {
            if let Some(result) = lock(&self.finished).remove(&id) {
                break result;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                let idle = {
                    let mut live = lock(&self.correlations);
                    live.remove(&id);
                    live.is_empty()
                };
                // A stalled upstream may leave a partial record behind.
                if idle {
                    self.drop_connection(&mut lock(&self.transport));
                }
                break Err(GatewayError::Timeout);
            }

            // Wait in short slices so another caller's completion for us is seen.
            if let Err(err) = self.receive(remaining.min(Duration::from_millis(50))) {
                self.abandon_all(&err);
            }
        };

        if !self.keep_connection {
            self.drop_connection(&mut lock(&self.transport));
        }
        result
    }

    /// Closes the upstream connection and discards bytes read from it.
    fn drop_connection(&self, transport: &mut T) {
        transport.disconnect();
        lock(&self.inbound).clear();
    }

    /// Reads once from the upstream and files every completion.
    fn receive(&self, timeout: Duration) -> Result<(), GatewayError> {
        let chunk = {
            let mut transport = lock(&self.transport);
            if !transport.is_connected() {
                return Err(GatewayError::Closed);
            }
            if !transport.poll(timeout).map_err(|err| GatewayError::Read(err.into()))? {
                return Ok(());
            }
            transport
                .read(self.config.read_buffer_size)
                .map_err(|err| GatewayError::Read(err.into()))?
        };

        if chunk.is_empty() {
            return Err(GatewayError::Closed);
        }

        let completions = self.on_bytes_received(&chunk);
        let mut finished = lock(&self.finished);
        for done in completions {
            finished.insert(done.request_id, done.result);
        }
        Ok(())
    }

    /// Fails every live request after the upstream connection broke.
    fn abandon_all(&self, err: &GatewayError) {
        error!(address = %self.address, error = %err, "fastcgi upstream failed");

        let live: Vec<u16> = lock(&self.correlations).drain().map(|(id, _)| id).collect();
        self.drop_connection(&mut lock(&self.transport));

        let mut finished = lock(&self.finished);
        for id in live {
            let failure = match err {
                GatewayError::Read(io) => GatewayError::Read(IoError(io::Error::from(io.0.kind()))),
                _ => GatewayError::Closed,
            };
            finished.insert(id, Err(failure));
        }
    }
}

#[inline]
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Route handler forwarding every matched request to `client`.
///
/// Gateway failures are answered with `502 Bad Gateway`.
pub fn gateway<T>(client: Arc<FcgiClient<T>>) -> impl Fn(&Request, &mut Response) -> bool + Send + Sync + 'static
where
    T: ClientTransport + Send + 'static,
{
    move |req, resp| {
        match client.forward(req) {
            Ok(upstream) => *resp = upstream,
            Err(err) => {
                error!(path = req.path(), error = %err, "fastcgi gateway failed");
                resp.status(StatusCode::BadGateway)
                    .header("Content-Type", "text/plain")
                    .body("Bad Gateway");
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{fcgi::record::RecordHeader, tools::*, Method};
    use std::collections::VecDeque;

    /// Upstream answering each complete request with canned records.
    #[derive(Default)]
    struct Upstream {
        connected: bool,
        connects: usize,
        written: Vec<u8>,
        inbound: VecDeque<Vec<u8>>,
        /// Replies for the first requests, before falling back to `reply`.
        script: VecDeque<fn(u16) -> Vec<Vec<u8>>>,
        reply: Option<fn(u16) -> Vec<Vec<u8>>>,
        fail_writes: bool,
    }

    impl ClientTransport for Upstream {
        fn connect(&mut self, _: &str) -> io::Result<()> {
            self.connected = true;
            self.connects += 1;
            Ok(())
        }

        fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
            if self.fail_writes {
                return Err(io::ErrorKind::BrokenPipe.into());
            }
            self.written.extend_from_slice(bytes);
            if let Some(reply) = self.script.pop_front().or(self.reply) {
                let id = u16::from_be_bytes([bytes[2], bytes[3]]);
                self.inbound.extend(reply(id));
            }
            Ok(())
        }

        fn read(&mut self, _: usize) -> io::Result<Vec<u8>> {
            Ok(self.inbound.pop_front().unwrap_or_default())
        }

        fn poll(&mut self, timeout: Duration) -> io::Result<bool> {
            if self.inbound.is_empty() {
                std::thread::sleep(timeout.min(Duration::from_millis(5)));
            }
            Ok(!self.inbound.is_empty())
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        fn disconnect(&mut self) {
            self.connected = false;
            self.inbound.clear();
        }
    }

    fn stdout(id: u16, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        record::write_stream(RecordType::Stdout, id, data, &mut out);
        out
    }

    fn end(id: u16, protocol_status: u8) -> Vec<u8> {
        let mut out = Vec::new();
        RecordHeader::new(RecordType::EndRequest, id, 8).encode(&mut out);
        out.extend_from_slice(&[0, 0, 0, 0, protocol_status, 0, 0, 0]);
        out
    }

    fn php_reply(id: u16) -> Vec<Vec<u8>> {
        let mut all = stdout(id, b"Status: 201 Created\r\nContent-Type: text/html\r\n\r\n<p>");
        all.extend(stdout(id, b"hi</p>"));
        all.extend(end(id, 0));

        // Delivered in uneven pieces.
        let (a, b) = all.split_at(13);
        vec![a.to_vec(), b.to_vec()]
    }

    /// Stdout header announcing 100 bytes, followed by only 4 of them.
    fn stalled_reply(id: u16) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        RecordHeader::new(RecordType::Stdout, id, 100).encode(&mut out);
        out.extend_from_slice(b"Stat");
        vec![out]
    }

    fn client(upstream: Upstream) -> FcgiClient<Upstream> {
        let config = HttpConfig {
            root_folder: "/srv/www".into(),
            server_address: "10.0.0.1".into(),
            server_port: 8081,
            fcgi_timeout: Duration::from_millis(200),
            ..HttpConfig::default()
        };
        FcgiClient::with_transport("127.0.0.1:9000", config, upstream)
    }

    #[test]
    fn parameter_values() {
        let client = client(Upstream::default());
        let req = parse_request(b"POST /app/index.php?a=1&b=2 HTTP/1.1\r\nContent-Type: text/plain\r\nContent-Length: 2\r\n\r\nhi");
        let params: HashMap<_, _> = client.params(&req).into_iter().collect();

        #[rustfmt::skip]
        let cases = [
            ("QUERY_STRING",      "a=1&b=2"),
            ("REQUEST_METHOD",    "POST"),
            ("CONTENT_TYPE",      "text/plain"),
            ("CONTENT_LENGTH",    "2"),
            ("SCRIPT_FILENAME",   "/srv/www/app/index.php"),
            ("SCRIPT_NAME",       "/app/index.php"),
            ("PATH_INFO",         ""),
            ("REQUEST_URI",       "/app/index.php?a=1&b=2"),
            ("DOCUMENT_URI",      ""),
            ("DOCUMENT_ROOT",     "/srv/www"),
            ("SERVER_PROTOCOL",   "HTTP/1.1"),
            ("GATEWAY_INTERFACE", "CGI/1.1"),
            ("SERVER_ADDR",       "10.0.0.1"),
            ("SERVER_PORT",       "8081"),
            ("SERVER_NAME",       "localhost"),
        ];

        assert_eq!(params.len(), FcgiParam::ALL.len());
        for (name, value) in cases {
            assert_eq!(params[name], value, "{name}");
        }
    }

    #[test]
    fn renamed_parameter() {
        let mut client = client(Upstream::default());
        client.set_param_name(FcgiParam::ScriptFilename, "SCRIPT_PATH");

        let params: HashMap<_, _> = client
            .params(&Request::new(Method::Get, "/x.php"))
            .into_iter()
            .collect();
        assert_eq!(params["SCRIPT_PATH"], "/srv/www/x.php");
        assert!(!params.contains_key("SCRIPT_FILENAME"));
    }

    #[test]
    fn send_sequence() {
        let mut client = client(Upstream::default());
        client.set_keep_connection(true);
        client.next_id.store(7, Ordering::Relaxed);

        let req = Request::new(Method::Post, "/form.php").body("text/plain", "abc");
        assert_eq!(client.send_request(&req), Ok(7));

        let written = lock(&client.transport).written.clone();
        let mut kinds = Vec::new();
        let mut pos = 0;
        while let Some((rec, used)) = record::next_record(&written[pos..]) {
            assert_eq!(rec.header.request_id, 7);
            kinds.push((rec.header.record_type().unwrap(), rec.content.len()));
            pos += used;
        }
        assert_eq!(pos, written.len());
        assert_eq!(written[10], record::FLAG_KEEP_CONN);

        assert!(matches!(
            kinds[..],
            [
                (RecordType::BeginRequest, 8),
                (RecordType::Params, n),
                (RecordType::Params, 0),
                (RecordType::Stdin, 3),
                (RecordType::Stdin, 0),
            ] if n > 0
        ));
        assert_eq!(client.in_flight(), 1);
    }

    #[test]
    fn correlation_round_trip() {
        let client = client(Upstream::default());
        client.next_id.store(7, Ordering::Relaxed);
        let req = parse_request(b"GET /status.php HTTP/1.1\r\n\r\n");
        assert_eq!(client.send_request(&req), Ok(7));

        let mut bytes = stdout(7, b"Content-Type: text/plain\r\n\r\nok");
        bytes.extend(end(7, 0));

        // A record cut in half waits for the rest.
        let (head, tail) = bytes.split_at(11);
        assert!(client.on_bytes_received(head).is_empty());
        let done = client.on_bytes_received(tail);

        assert_eq!(done.len(), 1);
        assert_eq!(done[0].request_id, 7);
        assert_eq!(done[0].connection_id, req.connection_id());
        let resp = done[0].result.as_ref().unwrap();
        assert_eq!(resp.get_status(), 200);
        assert_eq!(resp.header_value("Content-Type"), "text/plain");
        assert_eq!(resp.get_body().text().unwrap(), "ok");
        assert_eq!(client.in_flight(), 0);

        // Records for an unknown id are skipped.
        assert!(client.on_bytes_received(&end(7, 0)).is_empty());
    }

    #[test]
    fn rejected_request() {
        let client = client(Upstream::default());
        let id = client.send_request(&Request::new(Method::Get, "/")).unwrap();

        let done = client.on_bytes_received(&end(id, 2));
        assert_eq!(done[0].result.as_ref().unwrap_err(), &GatewayError::Rejected(2));
    }

    #[test]
    fn ids_skip_zero_and_live_requests() {
        let client = client(Upstream::default());
        client.next_id.store(u16::MAX, Ordering::Relaxed);

        let req = Request::new(Method::Get, "/");
        assert_eq!(client.send_request(&req), Ok(u16::MAX));
        assert_eq!(client.send_request(&req), Ok(1));

        client.next_id.store(1, Ordering::Relaxed);
        assert_eq!(client.send_request(&req), Ok(2));
    }

    #[test]
    fn in_flight_bound() {
        let mut client = client(Upstream::default());
        client.config.max_fcgi_in_flight = 2;

        let req = Request::new(Method::Get, "/");
        client.send_request(&req).unwrap();
        client.send_request(&req).unwrap();
        assert_eq!(client.send_request(&req), Err(GatewayError::TooManyInFlight(2)));
    }

    #[test]
    fn forward_reassembles_response() {
        let client = client(Upstream {
            reply: Some(php_reply),
            ..Upstream::default()
        });

        let resp = client.forward(&Request::new(Method::Get, "/page.php")).unwrap();
        assert_eq!(resp.get_status(), 201);
        assert_eq!(resp.header_value("Status"), "");
        assert_eq!(
            str_op(&resp.serialize().unwrap()),
            "HTTP/1.1 201 Created\r\nContent-Type: text/html\r\nContent-Length: 9\r\n\r\n<p>hi</p>"
        );

        // Without keep-connection every request reconnects.
        client.forward(&Request::new(Method::Get, "/page.php")).unwrap();
        let upstream = lock(&client.transport);
        assert_eq!(upstream.connects, 2);
        assert!(!upstream.connected);
    }

    #[test]
    fn forward_times_out() {
        let client = client(Upstream::default());
        assert_eq!(
            client.forward(&Request::new(Method::Get, "/slow.php")).unwrap_err(),
            GatewayError::Timeout
        );
        assert_eq!(client.in_flight(), 0);
    }

    #[test]
    fn timeout_discards_partial_record() {
        for keep in [false, true] {
            let mut client = client(Upstream {
                script: VecDeque::from([stalled_reply as fn(u16) -> Vec<Vec<u8>>]),
                reply: Some(php_reply),
                ..Upstream::default()
            });
            client.set_keep_connection(keep);

            let req = Request::new(Method::Get, "/page.php");
            assert_eq!(client.forward(&req).unwrap_err(), GatewayError::Timeout, "keep={keep}");
            assert!(lock(&client.inbound).is_empty(), "keep={keep}");

            let resp = client.forward(&req).unwrap();
            assert_eq!(resp.get_status(), 201, "keep={keep}");
            assert_eq!(lock(&client.transport).connects, 2, "keep={keep}");
        }
    }

    #[test]
    fn stale_bytes_never_outlive_the_connection() {
        let client = client(Upstream {
            connected: true,
            fail_writes: true,
            ..Upstream::default()
        });
        let req = Request::new(Method::Get, "/");

        lock(&client.inbound).extend_from_slice(&stalled_reply(1)[0]);
        assert!(matches!(client.send_request(&req), Err(GatewayError::Write(_))));
        assert!(lock(&client.inbound).is_empty());
        assert!(!lock(&client.transport).connected);
        assert_eq!(client.in_flight(), 0);

        // Leftovers are also dropped when reconnecting.
        lock(&client.transport).fail_writes = false;
        lock(&client.inbound).extend_from_slice(&stalled_reply(1)[0]);
        client.send_request(&req).unwrap();
        assert!(lock(&client.inbound).is_empty());
    }

    #[test]
    fn gateway_answers_502() {
        let handler = gateway(Arc::new(client(Upstream::default())));
        let mut resp = Response::new();

        assert!(handler(&Request::new(Method::Get, "/slow.php"), &mut resp));
        assert_eq!(resp.get_status(), 502);
        assert_eq!(resp.get_body().text().unwrap(), "Bad Gateway");

        let handler = gateway(Arc::new(client(Upstream {
            reply: Some(php_reply),
            ..Upstream::default()
        })));
        let mut resp = Response::new();
        assert!(handler(&Request::new(Method::Get, "/page.php"), &mut resp));
        assert_eq!(resp.get_status(), 201);
    }
}
