//! Parser for CGI/1.1 response streams

use crate::cgi::{CgiResponse, Header, Status};
use crate::errors::{Result, Error};

use nom::bytes::complete::take_until;
use nom::character::complete::digit1;
use nom::IResult;

/// The header/body delimiter: the first blank line.
const DELIMITER: &str = "\r\n\r\n";

/// Splits a raw backend stream at the first blank line.
///
/// Returns the header block (without the terminator) and the body. A stream
/// with no blank line anywhere is malformed, never passed through as
/// headers-only.
pub fn split_message(input: &[u8]) -> Result<(&[u8], &[u8])> {
    let parsed: IResult<&[u8], &[u8]> = take_until(DELIMITER)(input);
    match parsed {
        Ok((rest, head)) => Ok((head, &rest[DELIMITER.len()..])),
        Err(_) => Err(Error::MalformedResponse)
    }
}

/// Parses a complete backend output stream into HTTP response parts.
pub fn parse(input: &[u8]) -> Result<CgiResponse> {
    let (head, body) = split_message(input)?;
    let head = String::from_utf8_lossy(head);

    let mut response = CgiResponse {
        status: Default::default(),
        headers: Vec::new(),
        cookies: Vec::new(),
        body: Vec::from(body)
    };

    for line in head.split("\r\n").filter(|line| !line.is_empty()) {
        // Split on the first colon; lines without one carry nothing we can
        // forward.
        let (name, value) = match line.split_once(':') {
            Some((name, value)) => (name, value.trim_start()),
            None => continue
        };

        if name == "Set-Cookie" {
            response.cookies.push(cookie_value(value));
        }
        else if name == "Status" {
            if let Some(status) = parse_status(value) {
                response.status = status;
            }
        }
        else {
            response.headers.push(Header {
                name: String::from(name),
                value: String::from(value)
            });
        }
    }

    Ok(response)
}

/// Extracts `name=value` from a Set-Cookie line, dropping the attributes.
fn cookie_value(value: &str) -> String {
    let pair = match value.split_once(';') {
        Some((pair, _attributes)) => pair,
        None => value
    };

    String::from(pair.trim())
}

/// Reads a `Status` header value: leading digit run, then a reason phrase.
fn parse_status(value: &str) -> Option<Status> {
    let digits_at = value.find(|c: char| c.is_ascii_digit())?;
    let parsed: IResult<&str, &str> = digit1(&value[digits_at..]);
    let (rest, digits) = parsed.ok()?;
    let code = digits.parse::<u16>().ok()?;

    let reason = rest.trim();
    Some(Status {
        code,
        reason: if reason.is_empty() {
            default_reason(code)
        }
        else {
            String::from(reason)
        }
    })
}

/// Canned reason phrases for status lines the backend sent bare.
fn default_reason(code: u16) -> String {
    String::from(match code {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown"
    })
}
