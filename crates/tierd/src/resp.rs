//! RESP (REdis Serialization Protocol) parser and serializer
//!
//! RESP2 framing decoded with nom streaming combinators: `Incomplete`
//! means "wait for more bytes", anything else is a protocol error.

use bytes::{Buf, BufMut, BytesMut};
use nom::{
    bytes::streaming::{tag, take, take_until},
    combinator::map_res,
    error::{Error, ErrorKind},
    multi::count,
    number::streaming::u8 as any_byte,
    sequence::terminated,
    IResult,
};

/// Maximum bulk string size (512MB)
const MAX_BULK_STRING_SIZE: i64 = 512 * 1024 * 1024;

/// Maximum array size (1M elements)
const MAX_ARRAY_SIZE: i64 = 1024 * 1024;

/// Maximum array nesting
const MAX_DEPTH: usize = 32;

/// RESP data types
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// Simple string: +OK\r\n
    SimpleString(String),
    /// Error: -Error message\r\n
    Error(String),
    /// Integer: :1000\r\n
    Integer(i64),
    /// Bulk string: $6\r\nfoobar\r\n
    BulkString(Option<Vec<u8>>),
    /// Array: *2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    /// `+OK`
    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    /// Null bulk string
    pub fn nil() -> Self {
        RespValue::BulkString(None)
    }

    /// Error reply with the `ERR` prefix
    pub fn err(msg: impl std::fmt::Display) -> Self {
        RespValue::Error(format!("ERR {}", msg))
    }

    /// Bulk string from anything byte-like
    pub fn bulk(data: impl Into<Vec<u8>>) -> Self {
        RespValue::BulkString(Some(data.into()))
    }

    /// Text payload of a simple or bulk string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RespValue::SimpleString(s) => Some(s),
            RespValue::BulkString(Some(b)) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Append the encoded form to `out`
    pub fn write_to(&self, out: &mut BytesMut) {
        match self {
            RespValue::SimpleString(s) => put_line(out, b'+', s.as_bytes()),
            RespValue::Error(e) => put_line(out, b'-', e.as_bytes()),
            RespValue::Integer(i) => put_line(out, b':', i.to_string().as_bytes()),
            RespValue::BulkString(None) => out.put_slice(b"$-1\r\n"),
            RespValue::BulkString(Some(data)) => {
                put_line(out, b'$', data.len().to_string().as_bytes());
                out.put_slice(data);
                out.put_slice(b"\r\n");
            }
            RespValue::Array(None) => out.put_slice(b"*-1\r\n"),
            RespValue::Array(Some(items)) => {
                put_line(out, b'*', items.len().to_string().as_bytes());
                for item in items {
                    item.write_to(out);
                }
            }
        }
    }

    /// Parse one value off the front of `buf`
    ///
    /// Returns `Ok(None)` and leaves `buf` untouched when more data is needed.
    pub fn parse(buf: &mut BytesMut) -> Result<Option<RespValue>, String> {
        let (consumed, parsed) = match value(&buf[..], 0) {
            Ok((rest, parsed)) => (buf.len() - rest.len(), parsed),
            Err(nom::Err::Incomplete(_)) => return Ok(None),
            Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
                return Err(describe(e.code))
            }
        };
        buf.advance(consumed);
        Ok(Some(parsed))
    }
}

fn put_line(out: &mut BytesMut, prefix: u8, body: &[u8]) {
    out.put_u8(prefix);
    out.put_slice(body);
    out.put_slice(b"\r\n");
}

fn describe(kind: ErrorKind) -> String {
    match kind {
        ErrorKind::TooLarge => "protocol error: length or nesting exceeds limit".to_string(),
        ErrorKind::Char => "protocol error: unknown type byte".to_string(),
        ErrorKind::Tag => "protocol error: expected CRLF".to_string(),
        ErrorKind::MapRes => "protocol error: malformed line".to_string(),
        other => format!("protocol error: {:?}", other),
    }
}

fn line(input: &[u8]) -> IResult<&[u8], &[u8]> {
    terminated(take_until("\r\n"), tag("\r\n"))(input)
}

fn text_line(input: &[u8]) -> IResult<&[u8], String> {
    map_res(line, |l: &[u8]| String::from_utf8(l.to_vec()))(input)
}

fn int_line(input: &[u8]) -> IResult<&[u8], i64> {
    map_res(line, |l: &[u8]| {
        std::str::from_utf8(l)
            .map_err(|_| ())
            .and_then(|s| s.parse::<i64>().map_err(|_| ()))
    })(input)
}

fn length(input: &[u8], max: i64) -> IResult<&[u8], Option<usize>> {
    let (rest, len) = int_line(input)?;
    match len {
        -1 => Ok((rest, None)),
        n if (0..=max).contains(&n) => Ok((rest, Some(n as usize))),
        _ => Err(nom::Err::Failure(Error::new(input, ErrorKind::TooLarge))),
    }
}

fn bulk_body(input: &[u8], len: usize) -> IResult<&[u8], &[u8]> {
    terminated(take(len), tag("\r\n"))(input)
}

fn value(input: &[u8], depth: usize) -> IResult<&[u8], RespValue> {
    let (rest, kind) = any_byte::<_, Error<&[u8]>>(input)?;
    match kind {
        b'+' => {
            let (rest, s) = text_line(rest)?;
            Ok((rest, RespValue::SimpleString(s)))
        }
        b'-' => {
            let (rest, s) = text_line(rest)?;
            Ok((rest, RespValue::Error(s)))
        }
        b':' => {
            let (rest, i) = int_line(rest)?;
            Ok((rest, RespValue::Integer(i)))
        }
        b'$' => match length(rest, MAX_BULK_STRING_SIZE)? {
            (rest, None) => Ok((rest, RespValue::BulkString(None))),
            (rest, Some(len)) => {
                let (rest, data) = bulk_body(rest, len)?;
                Ok((rest, RespValue::BulkString(Some(data.to_vec()))))
            }
        },
        b'*' if depth >= MAX_DEPTH => Err(nom::Err::Failure(Error::new(
            input,
            ErrorKind::TooLarge,
        ))),
        b'*' => match length(rest, MAX_ARRAY_SIZE)? {
            (rest, None) => Ok((rest, RespValue::Array(None))),
            (rest, Some(len)) => {
                let (rest, items) = count(|i| value(i, depth + 1), len)(rest)?;
                Ok((rest, RespValue::Array(Some(items))))
            }
        },
        _ => Err(nom::Err::Failure(Error::new(input, ErrorKind::Char))),
    }
}
