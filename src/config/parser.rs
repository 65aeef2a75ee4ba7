use super::*;
use crate::gateway::rewrite::RewriteRule;

use regex::Regex;
use toml::Value;

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

pub fn parse_file<P: AsRef<Path>>(conf: P) -> Result<Config, Error> {
    let mut toml = String::new();
    {
        let mut f = File::open(conf)?;
        f.read_to_string(&mut toml)?;
    }

    match toml.parse::<Value>() {
        Ok(table) => config_from_table(table),
        Err(e) => Err(Error::Parse(e))
    }
}

fn config_from_table(table: Value) -> Result<Config, Error> {
    let mut config: Config = Default::default();

    match lookup(&table, "listen", "port") {
        Some(&Value::Integer(p)) if p > 0 && p <= u16::MAX as i64 =>
            config.port = p as u16,
        Some(&Value::Integer(p)) => return Err(Error::Validation(
            format!("The given port {} is out of range", p)
        )),
        Some(val) => return Err(Error::Validation(
            format!("Expected the port to be an integer, got a {}",
                    val.type_str())
        )),
        None => ()
    }

    match lookup(&table, "static", "webroot") {
        Some(Value::String(path)) =>
            config.stat.webroot = PathBuf::from(path),
        Some(val) => return Err(Error::Validation(
            format!("Expected the webroot to be a string, got a {}",
                    val.type_str())
        )),
        None => ()
    }

    match lookup(&table, "fastcgi", "host") {
        Some(Value::String(host)) => config.gateway.host = host.clone(),
        Some(val) => return Err(Error::Validation(
            format!("Expected the FastCGI host to be a string, got a {}",
                    val.type_str())
        )),
        None => ()
    }

    match lookup(&table, "fastcgi", "port") {
        Some(&Value::Integer(p)) if p > 0 && p <= u16::MAX as i64 =>
            config.gateway.port = p as u16,
        Some(&Value::Integer(p)) => return Err(Error::Validation(
            format!("The FastCGI port {} is out of range", p)
        )),
        Some(val) => return Err(Error::Validation(
            format!("Expected the FastCGI port to be an integer, got a {}",
                    val.type_str())
        )),
        None => ()
    }

    match lookup(&table, "fastcgi", "document_root") {
        Some(Value::String(path)) =>
            config.gateway.document_root = PathBuf::from(path),
        Some(val) => return Err(Error::Validation(
            format!("Expected the document root to be a string, got a {}",
                    val.type_str())
        )),
        None => ()
    }

    match lookup(&table, "fastcgi", "skip_check_server") {
        Some(&Value::Boolean(skip)) =>
            config.gateway.skip_check_server = skip,
        Some(val) => return Err(Error::Validation(
            format!("Expected skip_check_server to be a boolean, got a {}",
                    val.type_str())
        )),
        None => ()
    }

    match lookup(&table, "fastcgi", "debug") {
        Some(&Value::Boolean(debug)) => config.gateway.debug = debug,
        Some(val) => return Err(Error::Validation(
            format!("Expected debug to be a boolean, got a {}",
                    val.type_str())
        )),
        None => ()
    }

    match lookup(&table, "fastcgi", "bypass") {
        Some(Value::String(prefix)) =>
            config.gateway.bypass = Some(prefix.clone()),
        Some(val) => return Err(Error::Validation(
            format!("Expected bypass to be a string, got a {}",
                    val.type_str())
        )),
        None => ()
    }

    // A single rule table and an ordered array of tables are both accepted.
    match lookup(&table, "fastcgi", "rewrite") {
        Some(Value::Array(rules)) => {
            for rule in rules {
                config.gateway.rewrite.push(rewrite_rule(rule)?);
            }
        },
        Some(rule @ Value::Table(_)) =>
            config.gateway.rewrite.push(rewrite_rule(rule)?),
        Some(val) => return Err(Error::Validation(
            format!("Expected rewrite to be a table or array of tables, \
                     got a {}", val.type_str())
        )),
        None => ()
    }

    if let Some(params) = lookup(&table, "fastcgi", "params") {
        config.gateway.params.script = param_string(params, "script")?;
        config.gateway.params.document = param_string(params, "document")?;
        config.gateway.params.query = param_string(params, "query")?;
    }

    Ok(config)
}

fn lookup<'v>(table: &'v Value, section: &str, key: &str)
              -> Option<&'v Value>
{
    table.get(section).and_then(|s| s.get(key))
}

fn rewrite_rule(rule: &Value) -> Result<RewriteRule, Error> {
    let search = match rule.get("search") {
        Some(Value::String(pattern)) => match Regex::new(pattern) {
            Ok(re) => Some(re),
            Err(e) => return Err(Error::Validation(
                format!("Bad rewrite pattern {:?}: {}", pattern, e)
            ))
        },
        Some(val) => return Err(Error::Validation(
            format!("Expected a rewrite search to be a string, got a {}",
                    val.type_str())
        )),
        // No search pattern makes the rule a catch-all.
        None => None
    };

    let replace = match rule.get("replace") {
        Some(Value::String(template)) => template.clone(),
        Some(val) => return Err(Error::Validation(
            format!("Expected a rewrite replacement to be a string, got a {}",
                    val.type_str())
        )),
        None => return Err(Error::Validation(
            String::from("A rewrite rule is missing its replacement")
        ))
    };

    Ok(RewriteRule { search, replace })
}

fn param_string(params: &Value, key: &str)
                -> Result<Option<String>, Error>
{
    match params.get(key) {
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(val) => Err(Error::Validation(
            format!("Expected params.{} to be a string, got a {}",
                    key, val.type_str())
        )),
        None => Ok(None)
    }
}

#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    Parse(toml::de::Error),
    Validation(String)
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::Io(e)
    }
}
