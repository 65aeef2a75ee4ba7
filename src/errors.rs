//! Error handling for the gateway

use std::io;

/// A Result for internal operations.
pub type Result<T> = std::result::Result<T, Error>;

/// All errors which might arise within the application
#[derive(Debug)]
pub enum Error {
    Parse(httparse::Error),
    Io(io::Error),
    /// The inbound request path is empty or does not start with `/`.
    InvalidRequestUri,
    /// The transport failed to issue the request to the backend.
    BackendDispatch(io::Error),
    /// The backend emitted content on its error channel.
    BackendRuntime(String),
    /// Backend output contained no header/body delimiter.
    MalformedResponse,
    /// The backend broke the FastCGI framing rules.
    ProtocolViolation,
    /// A record or name-value pair exceeded the protocol's length limits.
    OversizeRecord,
    PathNotInOriginForm,
    IllegalPercentEncoding,
    PermissionDenied,
    RequestIncomplete,
    Poison
}

impl Error {
    /// Reclassifies plain I/O failures as dispatch failures.
    ///
    /// Used at the Transport boundary: an `io::Error` crossing it means the
    /// request never reached the backend cleanly.
    pub fn into_dispatch(self) -> Error {
        match self {
            Error::Io(e) => Error::BackendDispatch(e),
            other => other
        }
    }
}

impl From<httparse::Error> for Error {
    fn from(e: httparse::Error) -> Error {
        Error::Parse(e)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::Io(e)
    }
}
