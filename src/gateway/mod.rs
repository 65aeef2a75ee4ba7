//! The HTTP→CGI gateway core
//!
//! Per request: validate the URI, rewrite it, split off the query, resolve
//! the backend script, assemble the CGI environment, hand everything to the
//! transport, and translate the backend's CGI output into an HTTP response.
//! Every structure here is built fresh per request; the transport connection
//! is the only thing shared across requests.

pub mod env;
pub mod rewrite;

use crate::cgi::{self, CgiResponse};
use crate::config::{CustomParams, GatewayConfig};
use crate::errors::{Result, Error};
use crate::gateway::env::Environment;
use crate::server::{error_messages, Handler, Headers, Request, Response};

use log::{debug, warn};

use std::io::{self, Read};

/// The opaque request/response channel to the backend process.
///
/// Implementations accept the assembled environment set plus a reader for
/// the request body and hand back the backend's fully drained output and
/// error streams. A hung backend stalls the caller; timeouts belong to the
/// transport, not this layer.
pub trait Transport {
    fn request(&self, environment: &Environment, body: &mut dyn Read)
               -> Result<BackendStreams>;
}

/// Everything the backend said, drained to end-of-stream
pub struct BackendStreams {
    pub output: Vec<u8>,
    pub errors: Vec<u8>
}

/// Immutable per-request view of the inbound HTTP request
///
/// Only the allow-listed headers cross into this struct; anything else the
/// client sent never reaches the backend.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: String,
    pub uri: String,
    pub accept: Option<String>,
    pub content_type: Option<String>,
    pub content_length: Option<String>,
    pub content_disposition: Option<String>,
    pub host: Option<String>,
    pub cookie: Option<String>,
    pub requested_with: Option<String>,
    pub csrf_token: Option<String>,
    pub remote_addr: String,
    pub remote_port: u16,
    pub scheme: String
}

impl RequestContext {
    pub fn from_request(req: &Request) -> RequestContext {
        let header = |name| header_string(req.headers(), name);

        RequestContext {
            method: String::from(req.method()),
            uri: String::from(req.path()),
            accept: header("Accept"),
            content_type: header("Content-Type"),
            content_length: header("Content-Length"),
            content_disposition: header("Content-Disposition"),
            host: header("Host"),
            cookie: header("Cookie"),
            requested_with: header("X-Requested-With"),
            csrf_token: header("X-Widget-Csrf-Token"),
            remote_addr: req.remote_addr.ip().to_string(),
            remote_port: req.remote_addr.port(),
            // The front-end speaks plain HTTP only.
            scheme: String::from("http")
        }
    }
}

fn header_string(headers: &Headers, name: &str) -> Option<String> {
    headers.get(name)
        .map(|value| String::from_utf8_lossy(value).into_owned())
}

/// The mutable working set populated progressively by the pipeline
///
/// `uri` is the current (possibly rewritten) path, `outer_uri` the original
/// external one when a rewrite fired. `document`, `query`, and `script` may
/// arrive pre-seeded from configuration; URI-derived values overwrite the
/// first two when a split occurs, and a seeded script is never recomputed.
#[derive(Debug, Clone)]
pub struct WorkingSet {
    pub uri: String,
    pub outer_uri: Option<String>,
    pub document: Option<String>,
    pub query: Option<String>,
    pub script: Option<String>
}

impl WorkingSet {
    pub fn new(uri: String, seeds: &CustomParams) -> WorkingSet {
        WorkingSet {
            uri,
            outer_uri: None,
            document: seeds.document.clone(),
            query: seeds.query.clone(),
            script: seeds.script.clone()
        }
    }
}

/// Runs the whole pipeline for one request.
///
/// Fails fast without touching the backend on an invalid URI; afterwards
/// any transport I/O failure is a dispatch error, backend stderr content
/// trumps whatever arrived on stdout, and output without a header/body
/// delimiter is malformed. No retries at this layer.
pub fn dispatch(ctx: &RequestContext, body: &mut dyn Read,
                transport: &dyn Transport, config: &GatewayConfig)
                -> Result<CgiResponse>
{
    if !ctx.uri.starts_with('/') {
        return Err(Error::InvalidRequestUri);
    }

    let mut params = WorkingSet::new(ctx.uri.clone(), &config.params);
    rewrite::apply(&config.rewrite, &mut params);
    rewrite::split_query(&mut params);
    env::resolve_script(&mut params, &config.document_root);

    let environment = env::assemble(ctx, &params, config);
    if config.debug {
        debug!("dispatching environment: {:?}", environment);
    }

    let streams = transport.request(&environment, body)
        .map_err(Error::into_dispatch)?;

    if !streams.errors.is_empty() {
        return Err(Error::BackendRuntime(
            String::from_utf8_lossy(&streams.errors).into_owned()
        ));
    }

    cgi::parser::parse(&streams.output)
}

/// Whether a request path escapes the gateway entirely.
///
/// A substring test, not a prefix test: `/v2/api` also bypasses
/// `/nested/v2/api/thing`.
pub fn bypasses(config: &GatewayConfig, path: &str) -> bool {
    config.bypass.as_deref().is_some_and(|prefix| path.contains(prefix))
}

/// The gateway as an HTTP handler
pub struct Gateway<T: Transport> {
    config: GatewayConfig,
    transport: T,
    next: Option<Box<dyn Handler>>
}

impl<T: Transport> Gateway<T> {
    pub fn new(config: GatewayConfig, transport: T,
               next: Option<Box<dyn Handler>>) -> Gateway<T> {
        Gateway { config, transport, next }
    }
}

impl<T: Transport> Handler for Gateway<T> {
    fn serve(&self, mut req: Request, res: Response) {
        if bypasses(&self.config, req.path()) {
            match &self.next {
                Some(next) => next.serve(req, res),
                None => {
                    let _ = error_messages::error_404(res);
                }
            }
            return;
        }

        let ctx = RequestContext::from_request(&req);

        let body_length = ctx.content_length.as_deref()
            .and_then(|len| len.parse::<u64>().ok())
            .unwrap_or(0);

        let outcome = {
            let mut body = (&mut req).take(body_length);
            dispatch(&ctx, &mut body, &self.transport, &self.config)
        };

        match outcome {
            Ok(response) => {
                if let Err(e) = write_response(response, res) {
                    warn!("Error writing gateway response: {}", e);
                }
            },
            Err(e) => {
                warn!("Gateway failure for {}: {:?}", ctx.uri, e);
                let _ = error_messages::error_502(res);
            }
        }
    }
}

/// Maps a parsed CGI response onto the HTTP response sink.
fn write_response(cgi: CgiResponse, mut res: Response) -> io::Result<()> {
    res.set_status(cgi.status.code, cgi.status.reason);

    let mut has_length = false;
    for header in &cgi.headers {
        if header.name.eq_ignore_ascii_case("Content-Length") {
            has_length = true;
        }
        res.headers_mut().insert(&header.name,
                                 header.value.clone().into_bytes());
    }

    // Each cookie stays its own header instance; joining them would break
    // clients.
    for cookie in &cgi.cookies {
        res.headers_mut().insert("Set-Cookie", cookie.clone().into_bytes());
    }

    if !has_length {
        res.headers_mut().insert("Content-Length",
                                 cgi.body.len().to_string().into_bytes());
    }

    res.send(&cgi.body)
}
