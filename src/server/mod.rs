//! Server functionality
//!
//! A minimal HTTP/1.1 front-end: enough to parse a request, hand it to a
//! `Handler`, and write the response back. The gateway needs the external
//! request path verbatim, so no percent-decoding or normalization happens
//! here; handlers that want filesystem semantics normalize themselves.

pub mod static_files;

use crate::config::Config;
use crate::errors::{Result, Error};
use crate::fastcgi::driver as fcgi_driver;
use crate::gateway::Gateway;
use crate::server::static_files::Statics;

use log::{error, info, warn};

use std::io::{self, BufRead, BufReader, BufWriter, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

/// Binds the listen port and serves the gateway until the process dies.
pub fn serve(mut config: Config) -> Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", config.port))?;

    // The statics handler compares canonicalized paths against the webroot,
    // so the webroot itself has to be canonical.
    match std::fs::canonicalize(&config.stat.webroot) {
        Ok(webroot) => config.stat.webroot = webroot,
        Err(e) => warn!("Can't canonicalize webroot {:?}: {}; \
                         static file service will refuse everything",
                        config.stat.webroot, e)
    }

    let backend = (config.gateway.host.as_str(), config.gateway.port);
    let fcgi_conn = match fcgi_driver::Connection::establish(
        backend, !config.gateway.skip_check_server) {
        Ok(c) => c,
        Err(Error::Io(e)) => {
            match e.kind() {
                ErrorKind::ConnectionRefused =>
                    error!("FastCGI responder not responding at {}:{}",
                           config.gateway.host, config.gateway.port),
                _ => error!("{:?}", e)
            }

            return Err(Error::Io(e));
        },
        Err(e) => return Err(e)
    };
    info!("Connected to FastCGI responder at {}:{}",
          config.gateway.host, config.gateway.port);

    let statics = Statics::new(config.stat.clone());
    let gateway = Gateway::new(config.gateway.clone(), fcgi_conn,
                               Some(Box::new(statics)));

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                stream.set_read_timeout(Some(Duration::new(5, 0)))?;
                stream.set_write_timeout(Some(Duration::new(5, 0)))?;

                match make_request_pair(stream.try_clone()?) {
                    Ok((req, res)) => gateway.serve(req, res),
                    Err(Error::Parse(_)) => {
                        let _ = error_messages::error_400(
                            Response::new(stream));
                    },
                    Err(e) => warn!("{:?}", e)
                }
            },
            Err(e) => {
                warn!("Failed connection: {}", e);
            }
        };
    }

    Ok(())
}

fn make_request_pair(stream: TcpStream) -> Result<(Request, Response)> {
    let peer_addr = stream.peer_addr()?;
    let response_inner = stream.try_clone()?;
    let request_inner = stream;

    let response = Response::new(response_inner);

    let request = Request {
        inner: InnerRequest::parse(request_inner)?,
        remote_addr: peer_addr
    };

    Ok((request, response))
}

/// Values which can handle requests
pub trait Handler {
    fn serve(&self, req: Request, res: Response);
}

impl<F> Handler for F where F: Fn(Request, Response) {
    fn serve(&self, req: Request, res: Response) {
        self(req, res)
    }
}

/// An incoming request from the client
#[derive(Debug)]
pub struct Request {
    inner: InnerRequest<TcpStream>,
    pub remote_addr: SocketAddr
}

/// Internal, generic version of a Request
///
/// This division is primarily useful for testing; tests can wrap a simple
/// byte buffer, and the public impls can be trivial wrappers specialized to
/// a network stream.
#[derive(Debug)]
struct InnerRequest<R> {
    method: String,
    path: String,
    headers: Headers,

    rest: BufReader<R>
}

impl<R: Read> InnerRequest<R> {
    fn parse(stream: R) -> Result<InnerRequest<R>> {
        let mut reader = BufReader::new(stream);

        let (consumed, method, path, headers) = parse_inner(&mut reader)?;

        reader.consume(consumed);

        Ok(InnerRequest {
            method,
            path,
            headers,
            rest: reader
        })
    }
}

fn parse_inner<R: BufRead>(mut source: R)
                           -> Result<(usize, String, String, Headers)>
{
    let mut last_buffer_len = 0;

    loop {
        // The header slab has to live inside the loop: the parsed header
        // slices borrow from `fill_buf`, and that borrow must end before
        // the next iteration refills the buffer.
        let mut headers = [httparse::EMPTY_HEADER; 100];
        let mut req = httparse::Request::new(&mut headers);
        let buffer = source.fill_buf()?;

        let buffer_len = buffer.len();
        if buffer_len == last_buffer_len {
            return Err(Error::RequestIncomplete);
        }
        last_buffer_len = buffer_len;

        if let httparse::Status::Complete(bytes) = req.parse(buffer)? {
            let mut parsed = Headers::new();
            for header in req.headers.iter()
                .take_while(|h| !h.name.is_empty()) {
                parsed.insert(header.name, Vec::from(header.value));
            }

            let method = String::from(
                req.method.ok_or(Error::RequestIncomplete)?);
            let path = String::from(
                req.path.ok_or(Error::RequestIncomplete)?);

            return Ok((bytes, method, path, parsed));
        }
    }
}

impl Request {
    /// The request path exactly as the client sent it
    #[inline]
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    #[inline]
    pub fn method(&self) -> &str {
        &self.inner.method
    }

    #[inline]
    pub fn headers(&self) -> &Headers {
        &self.inner.headers
    }
}

impl Read for Request {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.rest.read(buf)
    }
}

/// An ordered multimap of HTTP headers
///
/// Keys are case-normalized on input: the first word and any word after a
/// hyphen are capitalized, everything else lowercased. Repeated names keep
/// distinct entries in insertion order — `Set-Cookie` must never be
/// comma-joined.
#[derive(Debug, Clone)]
pub struct Headers {
    entries: Vec<(String, Vec<u8>)>
}

fn normalize_header_name(name: &str) -> String {
    let lowercased = name.to_ascii_lowercase();
    let mut lower_chars = lowercased.chars();

    let mut normalized = String::with_capacity(lowercased.len());
    match lower_chars.next() {
        Some(ch) => normalized.push(ch.to_ascii_uppercase()),
        None => return normalized
    }

    let mut after_hyphen = false;
    for ch in lower_chars {
        if ch == '-' {
            after_hyphen = true;
            normalized.push(ch);
        }
        else if after_hyphen {
            normalized.push(ch.to_ascii_uppercase());
            after_hyphen = false;
        }
        else {
            normalized.push(ch);
        }
    }

    normalized
}

#[test]
fn normalize_content_type() {
    let expected = "Content-Type";
    assert_eq!(expected, &normalize_header_name("Content-Type"));
    assert_eq!(expected, &normalize_header_name("content-type"));
    assert_eq!(expected, &normalize_header_name("CONTENT-TYPE"));
    assert_eq!(expected, &normalize_header_name("cOnTeNt-TyPe"));
}

impl Headers {
    pub fn new() -> Headers {
        Headers { entries: Vec::new() }
    }

    /// Adds a header instance; an existing instance with the same name is
    /// kept, not replaced.
    pub fn insert(&mut self, key: &str, value: Vec<u8>) {
        self.entries.push((normalize_header_name(key), value));
    }

    /// The first instance under this name, if any
    pub fn get(&self, key: &str) -> Option<&Vec<u8>> {
        let wanted = normalize_header_name(key);
        self.entries.iter()
            .find(|(name, _)| *name == wanted)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries.iter()
            .map(|(name, value)| (name.as_str(), value.as_slice()))
    }
}

impl Default for Headers {
    fn default() -> Headers {
        Headers::new()
    }
}

#[test]
fn headers_keep_repeated_instances() {
    let mut headers = Headers::new();
    headers.insert("Set-Cookie", Vec::from(&b"a=1"[..]));
    headers.insert("set-cookie", Vec::from(&b"b=2"[..]));

    assert_eq!(headers.get("Set-Cookie"), Some(&Vec::from(&b"a=1"[..])));

    let cookies: Vec<_> = headers.iter()
        .filter(|(name, _)| *name == "Set-Cookie")
        .map(|(_, value)| value)
        .collect();
    assert_eq!(cookies, [b"a=1", b"b=2"]);
}

/// The response being constructed by a `Handler`
///
/// Status and headers stay mutable until a body-writing method consumes the
/// response; those write the header section followed by the entire body.
pub struct Response {
    writer: BufWriter<TcpStream>,
    status: ResponseStatus,
    headers: Headers
}

struct ResponseStatus {
    code: u16,
    reason: String
}

impl Response {
    pub fn new(stream: TcpStream) -> Self {
        Response {
            writer: BufWriter::new(stream),
            status: ResponseStatus {
                code: 200,
                reason: String::from("OK")
            },
            headers: Headers::new()
        }
    }

    #[inline]
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn set_status(&mut self, code: u16, reason: String) {
        self.status = ResponseStatus { code, reason };
    }

    /// Writes the headers, then streams the body from a reader.
    pub fn of_stream<R: Read>(mut self, mut stream: R) -> io::Result<()> {
        self.write_headers()?;
        io::copy(&mut stream, &mut self.writer)?;
        self.writer.flush()
    }

    /// Writes the headers, then the complete body.
    pub fn send(mut self, body: &[u8]) -> io::Result<()> {
        self.write_headers()?;
        self.writer.write_all(body)?;
        self.writer.flush()
    }

    fn write_headers(&mut self) -> io::Result<()> {
        // Status line
        write!(self.writer, "HTTP/1.1 {} {}\r\n",
               self.status.code, self.status.reason)?;

        for (header, content) in self.headers.iter() {
            write!(self.writer, "{}: ", header)?;
            self.writer.write_all(content)?;
            self.writer.write_all(b"\r\n")?;
        }

        self.writer.write_all(b"\r\n")?;

        Ok(())
    }
}

pub mod error_messages {
    use super::Response;

    use std::io;

    fn canned(mut res: Response, code: u16, reason: &str, body: &[u8])
              -> io::Result<()> {
        res.set_status(code, String::from(reason));
        {
            let headers = res.headers_mut();
            headers.insert("Content-Type", Vec::from(&b"text/html"[..]));
            headers.insert("Content-Length",
                           body.len().to_string().into_bytes());
        }

        res.send(body)
    }

    pub fn error_400(res: Response) -> io::Result<()> {
        canned(res, 400, "Bad Request", ERROR_400)
    }

    const ERROR_400: &[u8] = b"<!doctype html><html><head><title>Error</title></head><body><h1>Bad Request</h1><p>Your request had some kind of bad syntax. Are you using netcat?</p></body></html>";

    pub fn error_403(res: Response) -> io::Result<()> {
        canned(res, 403, "Forbidden", ERROR_403)
    }

    const ERROR_403: &[u8] = b"<!doctype html><html><head><title>Error</title></head><body><h1>Forbidden</h1><p>You don't have permission to view that file. Sorry.</p></body></html>";

    pub fn error_404(res: Response) -> io::Result<()> {
        canned(res, 404, "Not Found", ERROR_404)
    }

    const ERROR_404: &[u8] = b"<!doctype html><html><head><title>Error</title></head><body><h1>Not Found</h1><p>I couldn't find that file. Sorry.</p></body></html>";

    pub fn error_500(res: Response) -> io::Result<()> {
        canned(res, 500, "Internal Error", ERROR_500)
    }

    const ERROR_500: &[u8] = b"<!doctype html><html><head><title>Error</title></head><body><h1>Internal Error</h1><p>Something went wrong on my side.</p><p>There's nothing you can do; maybe come back later.</p></body></html>";

    pub fn error_502(res: Response) -> io::Result<()> {
        canned(res, 502, "Bad Gateway", ERROR_502)
    }

    const ERROR_502: &[u8] = b"<!doctype html><html><head><title>Error</title></head><body><h1>Bad Gateway</h1><p>The application backend didn't give me a usable response. Maybe try again later.</p></body></html>";
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_request_basic() {
        let request: &[u8] = b"GET / HTTP/1.1\r\nHost: google.com\r\nUser-Agent: curl/7.47.1\r\nAccept: */*\r\n\r\n";

        let (_, method, path, headers) = parse_inner(request).unwrap();

        assert_eq!(method, "GET");
        assert_eq!(path, "/");
        assert_eq!(headers.get("Host"), Some(&Vec::from(&b"google.com"[..])));
    }

    #[test]
    fn parse_request_copies_headers_out() {
        let request: &[u8] = b"GET / HTTP/1.1\r\nHost: example.net\r\nAccept: */*\r\nX-One: 1\r\nX-Two: 2\r\n\r\n";

        let (_, _, _, headers) = parse_inner(request).unwrap();

        assert_eq!(headers.get("Host"),
                   Some(&Vec::from(&b"example.net"[..])));
        assert_eq!(headers.get("X-One"), Some(&Vec::from(&b"1"[..])));
        assert_eq!(headers.get("X-Two"), Some(&Vec::from(&b"2"[..])));
    }

    #[test]
    fn parse_request_does_not_percent_decode() {
        let request: &[u8] = b"GET /%20 HTTP/1.1\r\n\r\n";

        let (_, _, path, _) = parse_inner(request).unwrap();

        assert_eq!(path, "/%20");
    }

    #[test]
    fn parse_request_keeps_the_raw_query() {
        let request: &[u8] = b"GET /page?a=1?b=2 HTTP/1.1\r\n\r\n";

        let (_, _, path, _) = parse_inner(request).unwrap();

        assert_eq!(path, "/page?a=1?b=2");
    }

    #[test]
    fn parse_request_fails_on_bad_bytes() {
        let request: &[u8] = b"GET /bogon\xff HTTP/1.1\r\n";

        assert!(parse_inner(request).is_err());
    }

    #[test]
    fn parse_request_leaves_the_body_unread() {
        let request: &[u8] = b"POST /submit HTTP/1.1\r\nContent-Length: 4\r\n\r\nBODY";

        let (consumed, method, _, _) = parse_inner(request).unwrap();

        assert_eq!(method, "POST");
        assert_eq!(&request[consumed..], b"BODY");
    }
}
