//! A driver for FastCGI connections
//!
//! One connection to the application server is established at startup and
//! reused for every request; the mutex serializes requests over it.

use crate::errors::{Result, Error};
use crate::fastcgi::{management_records, parser, protocol_status,
                     Content, EndRequest, Record};
use crate::fastcgi::serializer;
use crate::gateway::env::Environment;
use crate::gateway::{BackendStreams, Transport};
use crate::log_util::ascii_escape;

use byteorder::{BigEndian, ReadBytesExt};
use log::warn;

use std::io::{BufWriter, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// A connection to a FastCGI application server
pub struct Connection {
    conn: Mutex<TcpStream>,
    request_id: AtomicUsize
}

impl Connection {
    /// Connects to the application server.
    ///
    /// With `check_server` set, the server's liveness is probed with a
    /// `GET_VALUES` round trip before the connection is considered ready;
    /// this happens once per process lifetime, ahead of the first request.
    pub fn establish<A: ToSocketAddrs>(addr: A, check_server: bool)
                                       -> Result<Connection>
    {
        let conn = Connection {
            conn: Mutex::new(TcpStream::connect(addr)?),
            request_id: AtomicUsize::new(0)
        };

        if check_server {
            conn.check_server()?;
        }

        Ok(conn)
    }

    /// Probes the responder with a management record.
    ///
    /// Any well-formed management response counts as alive; the advertised
    /// values themselves are not acted on.
    fn check_server(&self) -> Result<()> {
        let mut conn = self.lock()?;

        serializer::get_values(&mut *conn, &[
            management_records::MAX_CONNS,
            management_records::MAX_REQS,
            management_records::MPXS_CONNS
        ])?;
        conn.flush()?;

        match read_record(&mut *conn)? {
            Record { content: Content::GetValuesResult(_), .. } => Ok(()),
            record => {
                warn!("Expected GET_VALUES_RESULT from the responder, \
                       got record kind {}", record.kind());
                Err(Error::ProtocolViolation)
            }
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, TcpStream>> {
        self.conn.lock().map_err(|_poison| Error::Poison)
    }
}

impl Transport for Connection {
    fn request(&self, environment: &Environment, body: &mut dyn Read)
               -> Result<BackendStreams>
    {
        // Ids cycle in a single byte; with requests serialized over one
        // connection a collision with an in-flight id cannot happen.
        let request_number = self.request_id.load(Ordering::Acquire) + 1;
        self.request_id.store(request_number & 0xFF, Ordering::Release);
        let id = request_number as u16;

        let mut conn = self.lock()?;

        initialize_request(&mut *conn, id, environment)?;

        // Send any request body there might be
        let mut client_buffer = [0; 4096];
        loop {
            let read = body.read(&mut client_buffer)?;
            if read == 0 {
                break;
            }

            serializer::stdin(&mut *conn, id, &client_buffer[..read])?;
        }
        // Write the stream's sentinel marker
        serializer::stdin(&mut *conn, id, &[][..])?;
        conn.flush()?;

        // Accumulate the responder's streams until it closes the request.
        // Parsing of the output happens upstream, only once the stream is
        // complete.
        let mut output = Vec::with_capacity(4096);
        let mut errors = Vec::new();

        loop {
            let Record { id: seen_id, content } = read_record(&mut *conn)?;

            if seen_id != id {
                warn!("Found a message for request {}; this is request {}",
                      seen_id, id);
                return Err(Error::ProtocolViolation);
            }

            match content {
                Content::Stdout(data) => output.extend_from_slice(&data),
                Content::Stderr(data) => errors.extend_from_slice(&data),
                Content::EndRequest(EndRequest {
                    app_status, protocol_status
                }) => {
                    if protocol_status != protocol_status::REQUEST_COMPLETE {
                        warn!("Got protocol status {}, expected 0",
                              protocol_status);
                    }

                    if app_status != 0 {
                        warn!("Responder closed unsuccesfully with code {}",
                              app_status);
                    }

                    break;
                },
                other => {
                    warn!("Saw unexpected record kind {}", other.kind());
                    return Err(Error::ProtocolViolation);
                }
            }
        }

        if !errors.is_empty() {
            warn!("Error message from responder: \"{}\"",
                  ascii_escape(&errors));
        }

        Ok(BackendStreams { output, errors })
    }
}

/// Initializes the request to the responder
///
/// This function writes the BeginRequest record and the Params records
/// carrying the assembled environment.
fn initialize_request<W: Write>(responder: W, id: u16,
                                environment: &Environment) -> Result<()>
{
    let mut buf_responder = BufWriter::new(responder);

    let metavars: Vec<(&[u8], &[u8])> = environment.iter()
        .map(|(name, value)| (name.as_bytes(), value.as_bytes()))
        .collect();

    serializer::start_request(&mut buf_responder, id)?;
    serializer::params(&mut buf_responder, id, &metavars)?;
    buf_responder.flush()?;

    Ok(())
}

/// Reads one record off the wire.
///
/// The framing header announces both lengths, so content and padding are
/// read with exact-length reads and the content handed to the parser as a
/// complete slice.
fn read_record<R: Read>(conn: &mut R) -> Result<Record> {
    let _version = conn.read_u8()?;
    let kind = conn.read_u8()?;
    let id = conn.read_u16::<BigEndian>()?;
    let content_length = conn.read_u16::<BigEndian>()? as usize;
    let padding_length = conn.read_u8()? as usize;
    let _reserved = conn.read_u8()?;

    let mut body = vec![0; content_length + padding_length];
    conn.read_exact(&mut body)?;
    body.truncate(content_length);

    match parser::content(kind, &body) {
        Ok((_, content)) => Ok(Record { id, content }),
        Err(_) => Err(Error::ProtocolViolation)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fastcgi::record_kind;

    #[test]
    fn read_record_consumes_padding() {
        let mut wire = Vec::new();
        serializer::stdin(&mut wire, 9, b"hello").unwrap();
        // A second record right behind the first
        serializer::stdin(&mut wire, 9, b"").unwrap();

        let mut reader = &wire[..];
        let first = read_record(&mut reader).unwrap();
        assert_eq!(first.id, 9);
        assert_eq!(first.content, Content::Stdin(Vec::from(&b"hello"[..])));

        let sentinel = read_record(&mut reader).unwrap();
        assert_eq!(sentinel.content, Content::Stdin(vec![]));
        assert!(reader.is_empty());
    }

    #[test]
    fn read_record_rejects_garbage_content() {
        // A BEGIN_REQUEST record with an impossible role
        let wire = [1, record_kind::BEGIN_REQUEST, 0, 1, 0, 8, 0, 0,
                    0, 42, 0, 0, 0, 0, 0, 0];

        let mut reader = &wire[..];
        assert!(matches!(read_record(&mut reader),
                         Err(Error::ProtocolViolation)));
    }

    #[test]
    fn truncated_record_is_an_io_error() {
        let wire = [1, record_kind::STDOUT, 0, 1, 0, 50, 0, 0, b'x'];

        let mut reader = &wire[..];
        assert!(matches!(read_record(&mut reader), Err(Error::Io(_))));
    }
}
