pub mod parser;

use crate::gateway::rewrite::RewriteRule;

use std::env;
use std::path::PathBuf;

/// A holder for app configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Port number to listen on
    pub port: u16,
    pub stat: StaticFilesConfig,
    pub gateway: GatewayConfig
}

impl Default for Config {
    fn default() -> Config {
        Config {
            port: 8000,
            stat: Default::default(),
            gateway: Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct StaticFilesConfig {
    /// Where the files are located on disk
    pub webroot: PathBuf
}

impl Default for StaticFilesConfig {
    fn default() -> StaticFilesConfig {
        StaticFilesConfig {
            webroot: PathBuf::from("/etc/fpm-gateway/site")
        }
    }
}

/// Configuration for the FastCGI gateway itself
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Backend application server host
    pub host: String,
    /// Backend application server port
    pub port: u16,
    /// Root the backend scripts are resolved against
    pub document_root: PathBuf,
    /// When false, probe the backend with GET_VALUES before serving
    pub skip_check_server: bool,
    /// Ordered rewrite rules; the first match wins
    pub rewrite: Vec<RewriteRule>,
    /// Dump the assembled environment set before each dispatch
    pub debug: bool,
    /// Request paths containing this substring bypass the gateway entirely
    pub bypass: Option<String>,
    /// Static pre-seeds for the per-request working set
    pub params: CustomParams
}

impl Default for GatewayConfig {
    fn default() -> GatewayConfig {
        GatewayConfig {
            host: String::from("localhost"),
            port: 9000,
            document_root: env::current_dir()
                .unwrap_or_else(|_| PathBuf::from(".")),
            skip_check_server: true,
            rewrite: Vec::new(),
            debug: false,
            bypass: None,
            params: Default::default()
        }
    }
}

/// Caller-supplied overrides merged into every request's working set
///
/// A seeded `script` suppresses the usual document-root join; `document` and
/// `query` likewise take precedence over the values derived from the URI.
#[derive(Debug, Clone, Default)]
pub struct CustomParams {
    pub script: Option<String>,
    pub document: Option<String>,
    pub query: Option<String>
}
