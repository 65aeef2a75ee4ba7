//! Smol utilities for logging

use std::ascii;

/// Make an Ascii-safe string
///
/// Backend stderr content is untrusted bytes; escape it before it lands in
/// a log line.
pub fn ascii_escape(s: &[u8]) -> String {
    String::from_utf8(
        s.iter().flat_map(|&b| ascii::escape_default(b)).collect()
    ).unwrap()
}
