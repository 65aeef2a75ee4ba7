//! Assembly of the CGI environment variable set
//!
//! The backend decides behavior with `isset()`-style checks, so a variable
//! with no real value must be omitted entirely, never sent empty. The
//! builder enforces that with a final elision pass over the complete set.

use crate::config::GatewayConfig;
use crate::gateway::{RequestContext, WorkingSet};

use std::path::Path;

/// What this gateway calls itself to the backend
pub const SERVER_SOFTWARE: &str = "fpm-gateway/0.2";

/// The finished, elided CGI variable set
///
/// Entries keep assembly order; FastCGI params preserve it on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    entries: Vec<(String, String)>
}

impl Environment {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Accumulates fields before the elision pass
///
/// Setting a name twice replaces the earlier value in place, so the last
/// writer wins but the field keeps its original position.
pub struct EnvBuilder {
    entries: Vec<(String, Option<String>)>
}

impl EnvBuilder {
    pub fn new() -> EnvBuilder {
        EnvBuilder { entries: Vec::with_capacity(32) }
    }

    pub fn field<V: Into<String>>(&mut self, name: &str, value: Option<V>) {
        let value = value.map(Into::into);
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((String::from(name), value))
        }
    }

    /// The elision pass: absent and empty values are deleted outright.
    ///
    /// Running this over the complete set (instead of eliding per-field
    /// during assembly) keeps constant-vs-computed ordering irrelevant.
    pub fn build(self) -> Environment {
        Environment {
            entries: self.entries.into_iter()
                .filter_map(|(name, value)| match value {
                    Some(v) if !v.is_empty() => Some((name, v)),
                    _ => None
                })
                .collect()
        }
    }
}

/// Resolves the backend script path unless the caller pre-seeded one.
///
/// The script is the document root joined with the document path, falling
/// back to the full working URI when no query split occurred. The gateway
/// never touches the file itself; it only computes the path.
pub fn resolve_script(params: &mut WorkingSet, document_root: &Path) {
    if params.script.is_some() {
        return;
    }

    let document = params.document.as_ref().unwrap_or(&params.uri);
    params.script = Some(join_document(document_root, document));
}

/// Joins a URI-style document path under the document root.
///
/// `Path::join` would replace the root entirely when handed the absolute
/// paths URIs are made of, so this stays in string space.
fn join_document(root: &Path, document: &str) -> String {
    let root = root.to_string_lossy();
    format!("{}/{}",
            root.trim_end_matches('/'),
            document.trim_start_matches('/'))
}

/// The script's file name in isolation: everything after the last `/`.
fn script_name(script: &str) -> &str {
    script.rsplit('/').next().unwrap_or(script)
}

/// Splits a Host header into its hostname and port segments.
///
/// Missing segments take the CGI-conventional defaults: name `127.0.0.1`,
/// port `80`.
fn split_host(host: Option<&str>) -> (String, String) {
    let host = host.unwrap_or("");
    let (name, port) = match host.split_once(':') {
        Some((name, port)) => (name, port),
        None => (host, "")
    };

    (
        if name.is_empty() { String::from("127.0.0.1") } else { String::from(name) },
        if port.is_empty() { String::from("80") } else { String::from(port) }
    )
}

/// Builds the full CGI variable set for one request.
pub fn assemble(ctx: &RequestContext, params: &WorkingSet,
                config: &GatewayConfig) -> Environment
{
    let script = params.script.as_deref()
        .expect("script path is resolved before assembly");
    let (server_name, server_port) = split_host(ctx.host.as_deref());

    let mut env = EnvBuilder::new();
    env.field("REQUEST_METHOD", Some(ctx.method.as_str()));
    env.field("HTTP_ACCEPT", ctx.accept.as_deref());
    env.field("CONTENT_TYPE", ctx.content_type.as_deref());
    env.field("CONTENT_LENGTH", ctx.content_length.as_deref());
    env.field("CONTENT_DISPOSITION", ctx.content_disposition.as_deref());
    env.field("DOCUMENT_ROOT",
              Some(config.document_root.to_string_lossy().into_owned()));
    env.field("SCRIPT_FILENAME", Some(script));
    env.field("SCRIPT_NAME", Some(script_name(script)));
    env.field("REQUEST_URI",
              Some(params.outer_uri.as_deref().unwrap_or(&params.uri)));
    env.field("DOCUMENT_URI",
              Some(params.document.as_deref().unwrap_or(&params.uri)));
    env.field("QUERY_STRING", params.query.as_deref());
    env.field("REQUEST_SCHEME", Some(ctx.scheme.as_str()));
    // "on" or omitted; CGI programs check presence, never the value "off".
    env.field("HTTPS",
              if ctx.scheme == "https" { Some("on") } else { None });
    env.field("REMOTE_ADDR", Some(ctx.remote_addr.as_str()));
    env.field("REMOTE_PORT", Some(ctx.remote_port.to_string()));
    env.field("HTTP_HOST", ctx.host.as_deref());
    env.field("HTTP_COOKIE", ctx.cookie.as_deref());
    // Fixed by convention: backends rarely branch on the real negotiated
    // version, and php-fpm wants to see HTTP/1.1 here.
    env.field("SERVER_PROTOCOL", Some("HTTP/1.1"));
    env.field("GATEWAY_INTERFACE", Some("CGI/1.1"));
    env.field("SERVER_SOFTWARE", Some(SERVER_SOFTWARE));
    // Some CGI runtimes refuse to execute without this.
    env.field("REDIRECT_STATUS", Some("200"));
    env.field("SERVER_PORT", Some(server_port));
    env.field("SERVER_NAME", Some(server_name));
    // Allow-listed pass-through headers; nothing else crosses the boundary.
    env.field("HTTP_X_WIDGET_CSRF_TOKEN", ctx.csrf_token.as_deref());
    env.field("HTTP_X_REQUESTED_WITH", ctx.requested_with.as_deref());

    env.build()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::gateway::{RequestContext, WorkingSet};

    use std::path::PathBuf;

    fn ctx(uri: &str) -> RequestContext {
        RequestContext {
            method: String::from("GET"),
            uri: String::from(uri),
            accept: None,
            content_type: None,
            content_length: None,
            content_disposition: None,
            host: Some(String::from("example.com:8080")),
            cookie: None,
            requested_with: None,
            csrf_token: None,
            remote_addr: String::from("10.1.2.3"),
            remote_port: 52611,
            scheme: String::from("http")
        }
    }

    fn config() -> GatewayConfig {
        GatewayConfig {
            document_root: PathBuf::from("/var/www"),
            ..Default::default()
        }
    }

    fn prepared(uri: &str, config: &GatewayConfig) -> WorkingSet {
        let mut params = WorkingSet::new(String::from(uri), &config.params);
        crate::gateway::rewrite::split_query(&mut params);
        resolve_script(&mut params, &config.document_root);
        params
    }

    #[test]
    fn no_field_is_ever_empty_or_absent_valued() {
        let config = config();
        let ctx = ctx("/index.php");
        let params = prepared("/index.php", &config);
        let env = assemble(&ctx, &params, &config);

        for (name, value) in env.iter() {
            assert!(!value.is_empty(), "{} came through empty", name);
        }
        // Absent headers are gone entirely, not present-but-empty.
        assert_eq!(env.get("HTTP_ACCEPT"), None);
        assert_eq!(env.get("HTTP_COOKIE"), None);
        assert_eq!(env.get("QUERY_STRING"), None);
        assert_eq!(env.get("CONTENT_TYPE"), None);
    }

    #[test]
    fn script_resolution_joins_document_root() {
        let config = config();
        let params = prepared("/sub/page.php?x=1", &config);

        assert_eq!(params.script.as_deref(), Some("/var/www/sub/page.php"));
    }

    #[test]
    fn script_resolution_falls_back_to_full_uri() {
        let config = config();
        let params = prepared("/page.php", &config);

        assert_eq!(params.script.as_deref(), Some("/var/www/page.php"));
    }

    #[test]
    fn seeded_script_suppresses_resolution() {
        let mut config = config();
        config.params.script = Some(String::from("/srv/fixed.php"));
        let params = prepared("/whatever.php", &config);

        assert_eq!(params.script.as_deref(), Some("/srv/fixed.php"));
    }

    #[test]
    fn script_name_is_the_final_segment() {
        let config = config();
        let env = assemble(&ctx("/sub/dir/page.php"),
                           &prepared("/sub/dir/page.php", &config),
                           &config);

        assert_eq!(env.get("SCRIPT_FILENAME"),
                   Some("/var/www/sub/dir/page.php"));
        assert_eq!(env.get("SCRIPT_NAME"), Some("page.php"));
    }

    #[test]
    fn host_header_supplies_server_name_and_port() {
        let config = config();
        let env = assemble(&ctx("/"), &prepared("/", &config), &config);

        assert_eq!(env.get("SERVER_NAME"), Some("example.com"));
        assert_eq!(env.get("SERVER_PORT"), Some("8080"));
        assert_eq!(env.get("HTTP_HOST"), Some("example.com:8080"));
    }

    #[test]
    fn portless_host_defaults_to_port_80() {
        let config = config();
        let mut ctx = ctx("/");
        ctx.host = Some(String::from("example.com"));
        let env = assemble(&ctx, &prepared("/", &config), &config);

        assert_eq!(env.get("SERVER_NAME"), Some("example.com"));
        assert_eq!(env.get("SERVER_PORT"), Some("80"));
    }

    #[test]
    fn missing_host_defaults_name_and_port() {
        let config = config();
        let mut ctx = ctx("/");
        ctx.host = None;
        let env = assemble(&ctx, &prepared("/", &config), &config);

        assert_eq!(env.get("SERVER_NAME"), Some("127.0.0.1"));
        assert_eq!(env.get("SERVER_PORT"), Some("80"));
        assert_eq!(env.get("HTTP_HOST"), None);
    }

    #[test]
    fn https_flag_is_on_or_gone() {
        let config = config();
        let params = prepared("/", &config);

        let plain = assemble(&ctx("/"), &params, &config);
        assert_eq!(plain.get("HTTPS"), None);
        assert_eq!(plain.get("REQUEST_SCHEME"), Some("http"));

        let mut secure_ctx = ctx("/");
        secure_ctx.scheme = String::from("https");
        let secure = assemble(&secure_ctx, &params, &config);
        assert_eq!(secure.get("HTTPS"), Some("on"));
    }

    #[test]
    fn fixed_protocol_constants() {
        let config = config();
        let env = assemble(&ctx("/"), &prepared("/", &config), &config);

        assert_eq!(env.get("SERVER_PROTOCOL"), Some("HTTP/1.1"));
        assert_eq!(env.get("GATEWAY_INTERFACE"), Some("CGI/1.1"));
        assert_eq!(env.get("REDIRECT_STATUS"), Some("200"));
        assert_eq!(env.get("SERVER_SOFTWARE"), Some(SERVER_SOFTWARE));
    }

    #[test]
    fn rewritten_requests_report_the_outer_uri() {
        let config = config();
        let mut params = WorkingSet::new(String::from("/inner.php"),
                                         &config.params);
        params.outer_uri = Some(String::from("/outer"));
        resolve_script(&mut params, &config.document_root);
        let env = assemble(&ctx("/outer"), &params, &config);

        assert_eq!(env.get("REQUEST_URI"), Some("/outer"));
        assert_eq!(env.get("DOCUMENT_URI"), Some("/inner.php"));
    }

    #[test]
    fn passthrough_headers_only_when_present() {
        let config = config();
        let params = prepared("/", &config);

        let bare = assemble(&ctx("/"), &params, &config);
        assert_eq!(bare.get("HTTP_X_REQUESTED_WITH"), None);
        assert_eq!(bare.get("HTTP_X_WIDGET_CSRF_TOKEN"), None);

        let mut ajax = ctx("/");
        ajax.requested_with = Some(String::from("XMLHttpRequest"));
        ajax.csrf_token = Some(String::from("tok123"));
        let env = assemble(&ajax, &params, &config);
        assert_eq!(env.get("HTTP_X_REQUESTED_WITH"), Some("XMLHttpRequest"));
        assert_eq!(env.get("HTTP_X_WIDGET_CSRF_TOKEN"), Some("tok123"));
    }

    #[test]
    fn builder_last_writer_wins_in_place() {
        let mut builder = EnvBuilder::new();
        builder.field("SERVER_NAME", Some("first"));
        builder.field("OTHER", Some("x"));
        builder.field("SERVER_NAME", Some("second"));
        let env = builder.build();

        assert_eq!(env.get("SERVER_NAME"), Some("second"));
        // Position of the first write is kept.
        assert_eq!(env.iter().next(), Some(("SERVER_NAME", "second")));
        assert_eq!(env.len(), 2);
    }

    #[test]
    fn builder_elides_empty_strings() {
        let mut builder = EnvBuilder::new();
        builder.field("EMPTY", Some(""));
        builder.field("ABSENT", None::<String>);
        builder.field("REAL", Some("value"));
        let env = builder.build();

        assert_eq!(env.len(), 1);
        assert_eq!(env.get("REAL"), Some("value"));
    }
}
