//! Serialization of FastCGI messages

use crate::errors::{Error, Result};
use crate::fastcgi::{flags, record_kind, Role};

use byteorder::{BigEndian, WriteBytesExt};

use std::io::Write;

/// Writes a record header from its bits
///
/// If succesful, returns the number of bytes of padding we told the other
/// end of the connection we were going to write.
fn write_header<W: Write>(mut output: W, kind: u8, id: u16,
                          content_length: usize)
                          -> Result<u8>
{
    if content_length > u16::MAX as usize {
        return Err(Error::OversizeRecord);
    }

    let padding_length = if content_length % 8 == 0 {
        0
    }
    else {
        8 - content_length % 8
    };

    output.write_all(&[1, kind])?;
    output.write_u16::<BigEndian>(id)?;
    output.write_u16::<BigEndian>(content_length as u16)?;
    output.write_u8(padding_length as u8)?;
    output.write_u8(0)?; // reserved byte

    Ok(padding_length as u8)
}

/// Writes a `GetValues` record to the output stream
pub fn get_values<W: Write>(mut output: W, get_for: &[&[u8]]) -> Result<()>
{
    let content_length = get_for.iter()
        .map(|&name| encoded_length(name) + 1)
        .sum();

    let padding_length = write_header(&mut output,
                                      record_kind::GET_VALUES,
                                      0,
                                      content_length)?;

    for &name in get_for {
        write_name_val_pair(&mut output, name, &[])?;
    }

    output.write_all(&vec![0; padding_length as usize])?;

    Ok(())
}

/// Computes the number of bytes a name or value will take up on the wire
/// once serialized into the FastCGI name-value pair format
fn encoded_length(val: &[u8]) -> usize {
    let length = val.len();
    let length_length = if length > 127 { 4 } else { 1 };

    length + length_length
}

/// Writes a name-value pair to the stream
fn write_name_val_pair<W: Write>(mut output: W, name: &[u8], val: &[u8])
                                 -> Result<()>
{
    let name_length = name.len();
    let val_length = val.len();

    if name_length > i32::MAX as usize || val_length > i32::MAX as usize {
        return Err(Error::OversizeRecord);
    }

    if name_length > 127 {
        output.write_u32::<BigEndian>(name_length as u32 | 1 << 31)?;
    }
    else {
        output.write_u8(name_length as u8)?;
    }

    if val_length > 127 {
        output.write_u32::<BigEndian>(val_length as u32 | 1 << 31)?;
    }
    else {
        output.write_u8(val_length as u8)?;
    }

    output.write_all(name)?;
    output.write_all(val)?;

    Ok(())
}

/// Write a `BeginRequest` message
///
/// This is specialized for the Responder role, with the `FCGI_KEEP_CONN`
/// flag set so the connection survives for later requests.
pub fn start_request<W: Write>(mut output: W, id: u16) -> Result<()> {
    let padding_length = write_header(&mut output,
                                      record_kind::BEGIN_REQUEST,
                                      id,
                                      8)?;
    output.write_u16::<BigEndian>(Role::Responder.to_protocol_number())?;
    output.write_u8(flags::KEEP_CONN)?;
    output.write_all(&[0; 5])?; // reserved

    output.write_all(&vec![0; padding_length as usize])?;

    Ok(())
}

/// Write a stream of parameters
///
/// This will automatically emit the stream-terminating empty message as
/// well.
pub fn params<W: Write>(mut output: W, id: u16, params: &[(&[u8], &[u8])])
                        -> Result<()> {
    let content_length = params.iter()
        .map(|&(name, value)| encoded_length(name) + encoded_length(value))
        .sum();

    let padding_length = write_header(&mut output,
                                      record_kind::PARAMS,
                                      id,
                                      content_length)?;

    for &(name, value) in params {
        write_name_val_pair(&mut output, name, value)?;
    }
    output.write_all(&vec![0; padding_length as usize])?;

    let sentinel_padding =
        write_header(&mut output, record_kind::PARAMS, id, 0)?;
    output.write_all(&vec![0; sentinel_padding as usize])?;

    Ok(())
}

/// Write a frame of a FCGI_STDIN stream
pub fn stdin<W: Write>(mut output: W, id: u16, content: &[u8]) -> Result<()> {
    let padding_length = write_header(&mut output, record_kind::STDIN,
                                      id, content.len())?;
    output.write_all(content)?;
    output.write_all(&vec![0; padding_length as usize])?;

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fastcgi::{parser, Content, NameValuePair, Record};

    #[test]
    fn params_survive_the_wire() {
        let mut wire = Vec::new();
        params(&mut wire, 7, &[
            (&b"REQUEST_METHOD"[..], &b"POST"[..]),
            (&b"QUERY_STRING"[..], &b""[..])
        ]).unwrap();

        let (rest, parsed) = parser::record(&wire[..]).unwrap();
        assert_eq!(parsed, Record {
            id: 7,
            content: Content::Params(vec![
                NameValuePair {
                    name: Vec::from(&b"REQUEST_METHOD"[..]),
                    value: Vec::from(&b"POST"[..])
                },
                NameValuePair {
                    name: Vec::from(&b"QUERY_STRING"[..]),
                    value: vec![]
                }
            ])
        });

        // The sentinel empty record follows.
        let (rest, sentinel) = parser::record(rest).unwrap();
        assert_eq!(sentinel.content, Content::Params(vec![]));
        assert!(rest.is_empty());
    }

    #[test]
    fn long_values_use_the_four_byte_length_form() {
        let value = vec![b'v'; 300];
        let mut wire = Vec::new();
        params(&mut wire, 1, &[(&b"HTTP_COOKIE"[..], &value[..])]).unwrap();

        let (_, parsed) = parser::record(&wire[..]).unwrap();
        match parsed.content {
            Content::Params(pairs) => assert_eq!(pairs[0].value, value),
            other => panic!("{:?}", other)
        }
    }

    #[test]
    fn stdin_frames_are_padded_to_eight_bytes() {
        let mut wire = Vec::new();
        stdin(&mut wire, 3, b"abc").unwrap();

        // 8 header + 3 content + 5 padding
        assert_eq!(wire.len(), 16);
        let (rest, parsed) = parser::record(&wire[..]).unwrap();
        assert_eq!(parsed.content, Content::Stdin(Vec::from(&b"abc"[..])));
        assert!(rest.is_empty());
    }

    #[test]
    fn oversize_content_is_refused() {
        let big = vec![0; u16::MAX as usize + 1];
        assert!(matches!(stdin(Vec::new(), 1, &big),
                         Err(Error::OversizeRecord)));
    }
}
