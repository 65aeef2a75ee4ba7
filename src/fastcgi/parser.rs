//! Parsers for FastCGI records
//!
//! The driver reads framing itself (lengths are known up front), so the
//! interesting work here is parsing record *content*. `record` parses a
//! whole record from a byte slice, which is what the tests exercise.

use super::*;

use nom::bytes::complete::take;
use nom::combinator::map;
use nom::error::ErrorKind;
use nom::multi::many0;
use nom::number::complete::{be_u16, be_u32, be_u8};
use nom::IResult;

/// Parses one complete record, header and padding included.
pub fn record(input: &[u8]) -> IResult<&[u8], Record> {
    let (input, _version) = be_u8(input)?;
    let (input, kind) = be_u8(input)?;
    let (input, id) = be_u16(input)?;
    let (input, content_length) = be_u16(input)?;
    let (input, padding_length) = be_u8(input)?;
    let (input, _reserved) = take(1usize)(input)?;
    let (input, body) = take(content_length)(input)?;
    let (input, _padding) = take(padding_length)(input)?;

    let (_, parsed) = content(kind, body)?;

    Ok((input, Record { id, content: parsed }))
}

/// Parses record content for a known record kind.
pub fn content(kind: u8, input: &[u8]) -> IResult<&[u8], Content> {
    match kind {
        record_kind::BEGIN_REQUEST => begin_request(input),
        record_kind::ABORT_REQUEST =>
            Ok((input, Content::AbortRequest(AbortRequest))),
        record_kind::END_REQUEST => end_request(input),
        record_kind::PARAMS =>
            map(name_value_pairs, Content::Params)(input),
        record_kind::STDIN =>
            Ok((&[][..], Content::Stdin(Vec::from(input)))),
        record_kind::STDOUT =>
            Ok((&[][..], Content::Stdout(Vec::from(input)))),
        record_kind::STDERR =>
            Ok((&[][..], Content::Stderr(Vec::from(input)))),
        record_kind::DATA =>
            Ok((&[][..], Content::Data(Vec::from(input)))),
        record_kind::GET_VALUES =>
            map(name_value_pairs, Content::GetValues)(input),
        record_kind::GET_VALUES_RESULT =>
            map(name_value_pairs, Content::GetValuesResult)(input),
        record_kind::UNKNOWN_TYPE => unknown_type(input),
        _ => Err(nom::Err::Error(
            nom::error::Error::new(input, ErrorKind::Switch)
        ))
    }
}

fn begin_request(input: &[u8]) -> IResult<&[u8], Content> {
    let (input, role) = role(input)?;
    let (input, flags) = be_u8(input)?;
    let (input, _reserved) = take(5usize)(input)?;

    Ok((input, Content::BeginRequest(BeginRequest { role, flags })))
}

fn end_request(input: &[u8]) -> IResult<&[u8], Content> {
    let (input, app_status) = be_u32(input)?;
    let (input, protocol_status) = be_u8(input)?;
    let (input, _reserved) = take(3usize)(input)?;

    Ok((input, Content::EndRequest(EndRequest {
        app_status,
        protocol_status
    })))
}

fn name_value_pairs(input: &[u8]) -> IResult<&[u8], Vec<NameValuePair>> {
    many0(name_value_pair)(input)
}

/// One name-value pair in the variable-width length encoding.
///
/// A length with its top bit set spans four bytes; the top bit is not part
/// of the length itself.
fn name_value_pair(input: &[u8]) -> IResult<&[u8], NameValuePair> {
    let (input, name_length) = pair_length(input)?;
    let (input, value_length) = pair_length(input)?;

    let (input, name) = take(name_length)(input)?;
    let (input, value) = take(value_length)(input)?;

    Ok((input, NameValuePair {
        name: Vec::from(name),
        value: Vec::from(value)
    }))
}

fn pair_length(input: &[u8]) -> IResult<&[u8], u32> {
    let (rest, first) = be_u8(input)?;
    if first >> 7 == 1 {
        // Four-byte form, re-read from the start of the field.
        let (rest, length) = be_u32(input)?;
        Ok((rest, length & 0x7fff_ffff))
    }
    else {
        Ok((rest, first as u32))
    }
}

fn role(input: &[u8]) -> IResult<&[u8], Role> {
    let (rest, tag) = be_u16(input)?;
    let r = match tag {
        1 => Role::Responder,
        2 => Role::Authorizer,
        3 => Role::Filter,
        _ => return Err(nom::Err::Error(
            nom::error::Error::new(input, ErrorKind::Alt)
        ))
    };

    Ok((rest, r))
}

fn unknown_type(input: &[u8]) -> IResult<&[u8], Content> {
    let (input, kind) = be_u8(input)?;
    let (input, _reserved) = take(7usize)(input)?;

    Ok((input, Content::UnknownType(UnknownType(kind))))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn begin_request() {
        let input = [0x01, 0x01, 0x00, 0x01, 0x00, 0x08, 0x00, 0x00,
                     0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];

        let (_, result) = record(&input[..]).unwrap();
        assert_eq!(
            result,
            Record {
                id: 1,
                content: Content::BeginRequest(BeginRequest {
                    role: Role::Responder,
                    flags: 0
                })
            }
        );
    }

    #[test]
    fn params() {
        // Two short pairs plus one with a value long enough to need the
        // four-byte length form.
        let long_value = vec![b'q'; 200];
        let mut body = Vec::new();
        body.extend_from_slice(&[14, 3]);
        body.extend_from_slice(b"REQUEST_METHODGET");
        body.extend_from_slice(&[12, 0]);
        body.extend_from_slice(b"QUERY_STRING");
        body.extend_from_slice(&[11]);
        body.extend_from_slice(&[0x80, 0x00, 0x00, 200]);
        body.extend_from_slice(b"HTTP_COOKIE");
        body.extend_from_slice(&long_value);

        let mut input = vec![1, record_kind::PARAMS, 0, 1,
                             (body.len() >> 8) as u8, body.len() as u8,
                             0, 0];
        input.extend_from_slice(&body);

        let (_, result) = record(&input[..]).unwrap();
        assert_eq!(
            result,
            Record {
                id: 1,
                content: Content::Params(vec![
                    NameValuePair {
                        name: Vec::from(&b"REQUEST_METHOD"[..]),
                        value: Vec::from(&b"GET"[..])
                    },
                    NameValuePair {
                        name: Vec::from(&b"QUERY_STRING"[..]),
                        value: vec![]
                    },
                    NameValuePair {
                        name: Vec::from(&b"HTTP_COOKIE"[..]),
                        value: long_value
                    }
                ])
            }
        );
    }

    #[test]
    fn params_empty() {
        let input = [1, 4, 0, 1, 0, 0, 0, 0];

        let (_, result) = record(&input[..]).unwrap();
        assert_eq!(
            result,
            Record {
                id: 1,
                content: Content::Params(vec![])
            }
        );
    }

    #[test]
    fn stdin() {
        let input = [1, 5, 0, 1, 0, 0, 0, 0];

        let (_, result) = record(&input[..]).unwrap();
        assert_eq!(
            result,
            Record {
                id: 1,
                content: Content::Stdin(vec![])
            }
        );
    }

    #[test]
    fn end_request() {
        let input = [1, 3, 0, 1, 0, 8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];

        let (_, result) = record(&input[..]).unwrap();
        assert_eq!(
            result,
            Record {
                id: 1,
                content: Content::EndRequest(EndRequest {
                    app_status: 0,
                    protocol_status: protocol_status::REQUEST_COMPLETE
                })
            }
        );
    }

    #[test]
    fn padding_is_consumed() {
        // 3 content bytes, 5 padding bytes, then a trailing marker.
        let input = [1, 6, 0, 2, 0, 3, 5, 0,
                     b'a', b'b', b'c', 0, 0, 0, 0, 0,
                     0xEE];

        let (rest, result) = record(&input[..]).unwrap();
        assert_eq!(result, Record {
            id: 2,
            content: Content::Stdout(Vec::from(&b"abc"[..]))
        });
        assert_eq!(rest, [0xEE]);
    }

    #[test]
    fn bogus_role_is_rejected() {
        let input = [1, 1, 0, 1, 0, 8, 0, 0,
                     0, 9, 0, 0, 0, 0, 0, 0];

        assert!(record(&input[..]).is_err());
    }

    #[test]
    fn bogus_kind_is_rejected() {
        let input = [1, 99, 0, 1, 0, 0, 0, 0];

        assert!(record(&input[..]).is_err());
    }
}
