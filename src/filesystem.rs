//! Helpers for filesystem manipulations

use crate::errors::{Result, Error};

/// Normalizes a request path for filesystem lookup.
///
/// The following operations are performed:
///
/// 1. Sequences of multiple `'/'` characters are collapsed into a single `'/'`.
/// 2. Any leading `'/'` is stripped. (If the request path doesn’t lead with a
///    slash, the path is ill-formed for our purposes and we return an `Err`).
/// 3. Percent-encoded bytes are decoded. Bogus percent-encoding, like `b"%bo"`,
///    will return `Err`.
///
/// Only the static-file handler wants these semantics; the gateway passes
/// the external URI through verbatim.
pub fn normalize_path(path: &[u8]) -> Result<Vec<u8>> {
    if path.is_empty() || path[0] != b'/' {
        return Err(Error::PathNotInOriginForm);
    }

    let mut buffer = Vec::with_capacity(path.len() - 1);
    let mut i = 1;

    // skip leading '/' characters
    while i < path.len() && path[i] == b'/' {
        i += 1;
    }

    while i < path.len() {
        match path[i] {
            b'/' => {
                buffer.push(b'/');
                while i < path.len() && path[i] == b'/' {
                    i += 1;
                }
            },
            b'%' => {
                if path.len() < i + 3 {
                    return Err(Error::IllegalPercentEncoding);
                }

                let high_nybble = path[i + 1];
                let low_nybble = path[i + 2];

                if !is_hexit(high_nybble) || !is_hexit(low_nybble) {
                    return Err(Error::IllegalPercentEncoding);
                }

                buffer.push(from_hexit(high_nybble) << 4 |
                            from_hexit(low_nybble));

                i += 3;
            },
            b => {
                buffer.push(b);
                i += 1;
            }
        }
    }

    Ok(buffer)
}


/// Returns `true` iff the byte is a hexadecimal digit according to ASCII
fn is_hexit(x: u8) -> bool {
    x.is_ascii_hexdigit()
}

/// Converts from a hexadecimal digit to its value
fn from_hexit(x: u8) -> u8 {
    match x {
        b'0'..=b'9' => x - b'0',
        b'A'..=b'F' => x - b'A' + 10,
        b'a'..=b'f' => x - b'a' + 10,
        _ => panic!("Contract violation: from_hexit expected a hexit, got 0x{:X}", x)
    }
}

#[test]
fn from_hexit_works() {
    use std::char;

    for x in 0x0..0x10 {
        assert_eq!(from_hexit(char::from_digit(x, 16).unwrap() as u8), x as u8);
    }
}
