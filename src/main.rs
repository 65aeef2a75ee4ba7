//! An HTTP to FastCGI gateway.
//!
//! Call it like this:
//!
//!     fpm-gateway -f config.toml
//!
//! The config file is in the [TOML format][toml] because it’s commonly used
//! in the Rust ecosystem. Here is an example:
//!
//! ```toml
//! [listen]
//! port = 8000
//!
//! [static]
//! webroot = "/etc/fpm-gateway/site"
//!
//! [fastcgi]
//! host = "localhost"
//! port = 9000
//! document_root = "/var/www"
//! bypass = "/v2/api"
//!
//! [[fastcgi.rewrite]]
//! search = "^/app/(.*)$"
//! replace = "/index.php?route=$1"
//! ```
//!
//! Every key here is optional. A missing `document_root` defaults to the
//! process working directory; the other defaults are built into the config
//! parser. If a key is of the wrong type, the gateway will bail, so don’t
//! do that.
//!
//! Every request is translated into CGI environment variables and relayed
//! to the FastCGI responder; paths containing the configured `bypass`
//! substring are served from the static webroot instead.
//!
//! [toml]: https://github.com/toml-lang/toml

mod cgi;
mod config;
mod errors;
mod fastcgi;
mod filesystem;
mod gateway;
mod log_util;
mod server;

use crate::config::parser::{self, parse_file};
use crate::server::serve;

use clap::{Arg, Command};
use log::{error, info, LevelFilter};

use std::env;
use std::io::{stderr, Write};
use std::process::exit;

fn main() {
    let mut log_builder = env_logger::Builder::new();
    log_builder.filter_level(LevelFilter::Info);

    if let Ok(var) = env::var("GATEWAY_LOG") {
        log_builder.parse_filters(&var);
    }

    match log_builder.try_init() {
        Ok(()) => (),
        Err(e) => {
            writeln!(stderr(),
                     "fpm-gateway: Error when initializing logging: {}",
                     e).unwrap();
            exit(1);
        }
    };

    let matches = Command::new("fpm-gateway")
        .version("0.2")
        .arg(Arg::new("config_file")
             .short('f')
             .long("config")
             .value_name("FILE")
             .help("The TOML file with gateway configuration"))
        .get_matches();

    let config_file = matches.get_one::<String>("config_file")
        .map(String::as_str)
        .unwrap_or("/etc/fpm-gateway/config.toml");

    let config = match parse_file(config_file) {
        Ok(c) => c,
        Err(parser::Error::Io(e)) => {
            error!("Error opening config file {:?}: {}", config_file, e);
            exit(1);
        },
        Err(parser::Error::Parse(e)) => {
            error!("Errors parsing config file {:?}:", config_file);
            error!("{}", e.message());
            exit(1);
        },
        Err(parser::Error::Validation(message)) => {
            error!("Error in config file: {}", message);
            exit(1);
        }
    };

    info!("Starting gateway on port {}", config.port);
    if serve(config).is_err() {
        exit(1);
    }
}
