//! Process CGI/1.1 response messages
//!
//! FastCGI 1 inherits its message format and semantics from CGI/1.1: a
//! CRLF-delimited header block, a blank line, then an arbitrary body.

pub mod parser;

/// A status line
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Status {
    pub code: u16,
    pub reason: String
}

impl Default for Status {
    fn default() -> Status {
        Status { code: 200, reason: String::from("OK") }
    }
}

/// One forwarded header
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Header {
    pub name: String,
    pub value: String
}

/// A backend response translated into HTTP terms
///
/// `headers` keeps stream order and excludes the `Status` pseudo-header and
/// all `Set-Cookie` lines; cookies live in their own ordered bucket because
/// HTTP requires them to stay distinct header instances. Each collected
/// cookie is truncated at its first `;`, dropping attributes like `Path`
/// and `HttpOnly` — a known lossy simplification carried over from the
/// behavior this gateway reproduces.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct CgiResponse {
    pub status: Status,
    pub headers: Vec<Header>,
    pub cookies: Vec<String>,
    pub body: Vec<u8>
}
