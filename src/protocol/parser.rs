//! Incremental Wire Protocol Parser
//!
//! Frames raw socket bytes into [`Command`]s. The parser accepts two
//! inbound forms:
//!
//! 1. A single typed value whose first byte is one of `:` `$` `*` `,`
//!    (integer / bulk / array / float). A non-array value is wrapped
//!    in a one-element array before command conversion.
//! 2. A CRLF-terminated ASCII line split on whitespace (inline form),
//!    used for any other first byte.
//!
//! ## How the Parser Works
//!
//! The parser reads from a buffer and returns either:
//! - `Ok(Some((value, consumed)))` - a complete value, `consumed` bytes used
//! - `Ok(None)` - the frame is incomplete, wait for more bytes
//! - `Err(ParseError)` - malformed frame
//!
//! The caller appends incoming network data to a buffer, calls
//! `parse()`, and advances the buffer by `consumed` on success. A
//! `ParseError` is fatal for the connection: the peer gets no reply
//! and the socket is closed.

use crate::protocol::types::{prefix, Command, WireValue, CRLF};
use bytes::Bytes;
use std::num::{ParseFloatError, ParseIntError};
use thiserror::Error;

/// Errors that can occur while decoding a frame.
///
/// Every variant is fatal: the connection is terminated without a reply.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// Invalid integer format
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Invalid float format
    #[error("invalid float: {0}")]
    InvalidFloat(String),

    /// Invalid UTF-8 where text was required
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    /// Bulk string length is negative (but not -1 for null)
    #[error("invalid bulk length: {0}")]
    InvalidBulkLength(i64),

    /// Array length is negative (but not -1 for null)
    #[error("invalid array length: {0}")]
    InvalidArrayLength(i64),

    /// Framing violation (missing CRLF, empty line, bad command shape)
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// The frame exceeds the maximum allowed size
    #[error("frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk string (1 MB; lock ids and signals are short)
pub const MAX_BULK_SIZE: usize = 1024 * 1024;

/// Maximum array nesting depth (prevents stack overflow on hostile input)
pub const MAX_NESTING_DEPTH: usize = 8;

/// Maximum number of elements in one array frame. Commands are a verb
/// plus at most a few arguments, so a large header is hostile input,
/// rejected before any allocation is sized from it.
pub const MAX_ARRAY_LEN: usize = 16;

/// An incremental frame parser.
///
/// One instance lives per connection; it is stateless between frames
/// apart from the nesting-depth counter.
#[derive(Debug, Default)]
pub struct FrameParser {
    depth: usize,
}

impl FrameParser {
    pub fn new() -> Self {
        Self { depth: 0 }
    }

    /// Attempts to parse one wire value from the buffer.
    ///
    /// Returns `Ok(Some((value, consumed)))` on success, `Ok(None)` when
    /// the buffer holds an incomplete frame.
    pub fn parse(&mut self, buf: &[u8]) -> ParseResult<Option<(WireValue, usize)>> {
        self.depth = 0;
        self.parse_value(buf)
    }

    fn parse_value(&mut self, buf: &[u8]) -> ParseResult<Option<(WireValue, usize)>> {
        if buf.is_empty() {
            return Ok(None);
        }

        if self.depth > MAX_NESTING_DEPTH {
            return Err(ParseError::ProtocolError(format!(
                "maximum nesting depth exceeded: {}",
                MAX_NESTING_DEPTH
            )));
        }

        match buf[0] {
            prefix::INTEGER => self.parse_integer(buf),
            prefix::FLOAT => self.parse_float(buf),
            prefix::BULK => self.parse_bulk(buf),
            prefix::ARRAY => self.parse_array(buf),
            _ => self.parse_inline(buf),
        }
    }

    /// Parses an integer: `:<integer>\r\n`
    fn parse_integer(&mut self, buf: &[u8]) -> ParseResult<Option<(WireValue, usize)>> {
        debug_assert!(buf[0] == prefix::INTEGER);

        let Some((line, end)) = take_line(buf, 1)? else {
            return Ok(None);
        };
        let n: i64 = line
            .parse()
            .map_err(|e: ParseIntError| ParseError::InvalidInteger(e.to_string()))?;
        Ok(Some((WireValue::Integer(n), end)))
    }

    /// Parses a float: `,<float>\r\n`
    fn parse_float(&mut self, buf: &[u8]) -> ParseResult<Option<(WireValue, usize)>> {
        debug_assert!(buf[0] == prefix::FLOAT);

        let Some((line, end)) = take_line(buf, 1)? else {
            return Ok(None);
        };
        let f: f64 = line
            .parse()
            .map_err(|e: ParseFloatError| ParseError::InvalidFloat(e.to_string()))?;
        Ok(Some((WireValue::Float(f), end)))
    }

    /// Parses a bulk string: `$<length>\r\n<data>\r\n`
    fn parse_bulk(&mut self, buf: &[u8]) -> ParseResult<Option<(WireValue, usize)>> {
        debug_assert!(buf[0] == prefix::BULK);

        let Some((length, data_start)) = take_length(buf)? else {
            return Ok(None);
        };
        // Null bulk: $-1\r\n
        if length == -1 {
            return Ok(Some((WireValue::Null, data_start)));
        }
        if length < 0 {
            return Err(ParseError::InvalidBulkLength(length));
        }

        let length = length as usize;
        if length > MAX_BULK_SIZE {
            return Err(ParseError::FrameTooLarge {
                size: length,
                max: MAX_BULK_SIZE,
            });
        }

        let total_needed = data_start + length + 2;
        if buf.len() < total_needed {
            return Ok(None);
        }
        if &buf[data_start + length..total_needed] != CRLF {
            return Err(ParseError::ProtocolError(
                "bulk string missing trailing CRLF".to_string(),
            ));
        }

        let data = Bytes::copy_from_slice(&buf[data_start..data_start + length]);
        Ok(Some((WireValue::Bulk(data), total_needed)))
    }

    /// Parses an array: `*<count>\r\n<elements...>`
    fn parse_array(&mut self, buf: &[u8]) -> ParseResult<Option<(WireValue, usize)>> {
        debug_assert!(buf[0] == prefix::ARRAY);

        let Some((count, header_end)) = take_length(buf)? else {
            return Ok(None);
        };
        // Null array: *-1\r\n
        if count == -1 {
            return Ok(Some((WireValue::Null, header_end)));
        }
        if count < 0 || count > MAX_ARRAY_LEN as i64 {
            return Err(ParseError::InvalidArrayLength(count));
        }

        let count = count as usize;
        let mut elements = Vec::with_capacity(count);
        let mut consumed = header_end;

        self.depth += 1;

        for _ in 0..count {
            if consumed >= buf.len() {
                return Ok(None);
            }
            match self.parse_value(&buf[consumed..])? {
                Some((value, element_consumed)) => {
                    elements.push(value);
                    consumed += element_consumed;
                }
                None => return Ok(None),
            }
        }

        self.depth -= 1;

        Ok(Some((WireValue::Array(elements), consumed)))
    }

    /// Parses an inline command line: `<verb> <arg> ...\r\n`
    fn parse_inline(&mut self, buf: &[u8]) -> ParseResult<Option<(WireValue, usize)>> {
        let crlf_pos = match find_crlf(buf) {
            Some(pos) => pos,
            None => {
                if buf.len() > MAX_BULK_SIZE {
                    return Err(ParseError::FrameTooLarge {
                        size: buf.len(),
                        max: MAX_BULK_SIZE,
                    });
                }
                return Ok(None);
            }
        };

        let line = line_str(&buf[..crlf_pos])?;
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.is_empty() {
            return Err(ParseError::ProtocolError("empty inline command".to_string()));
        }

        let elements: Vec<WireValue> = parts
            .into_iter()
            .map(|s| WireValue::Bulk(Bytes::from(s.to_string())))
            .collect();

        Ok(Some((WireValue::Array(elements), crlf_pos + 2)))
    }
}

/// Converts a decoded wire value into a [`Command`].
///
/// Non-array values are wrapped in a one-element list first. Every
/// element must render as a non-array argument string; anything else
/// is a framing violation.
pub fn into_command(value: WireValue) -> ParseResult<Command> {
    let elements = match value {
        WireValue::Array(elements) => elements,
        other => vec![other],
    };

    if elements.is_empty() {
        return Err(ParseError::ProtocolError("empty command".to_string()));
    }

    let mut parts = Vec::with_capacity(elements.len());
    for element in &elements {
        match element.as_arg() {
            Some(s) => parts.push(s),
            None => {
                return Err(ParseError::ProtocolError(
                    "command element is not a scalar".to_string(),
                ))
            }
        }
    }

    let verb = parts.remove(0);
    Ok(Command::new(verb, parts))
}

fn line_str(buf: &[u8]) -> ParseResult<&str> {
    std::str::from_utf8(buf).map_err(|e| ParseError::InvalidUtf8(e.to_string()))
}

/// Reads one CRLF-terminated line starting at `start`. Returns the
/// line text and the index just past the CRLF, or `None` when the
/// terminator has not arrived yet.
fn take_line(buf: &[u8], start: usize) -> ParseResult<Option<(&str, usize)>> {
    match find_crlf(&buf[start..]) {
        Some(pos) => Ok(Some((line_str(&buf[start..start + pos])?, start + pos + 2))),
        None => Ok(None),
    }
}

/// Reads the `<n>\r\n` length header that follows a `$` or `*` prefix
/// byte. Negative values (null markers, malformed lengths) are left to
/// the caller.
fn take_length(buf: &[u8]) -> ParseResult<Option<(i64, usize)>> {
    let Some((line, end)) = take_line(buf, 1)? else {
        return Ok(None);
    };
    let n: i64 = line
        .parse()
        .map_err(|e: ParseIntError| ParseError::InvalidInteger(e.to_string()))?;
    Ok(Some((n, end)))
}

/// Finds the position of CRLF in the buffer.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    for i in 0..buf.len().saturating_sub(1) {
        if buf[i] == b'\r' && buf[i + 1] == b'\n' {
            return Some(i);
        }
    }
    None
}

/// Parses a single frame from bytes. Convenience for tests and tools.
pub fn parse_frame(buf: &[u8]) -> ParseResult<Option<(WireValue, usize)>> {
    FrameParser::new().parse(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_integer() {
        let result = parse_frame(b":1000\r\n").unwrap().unwrap();
        assert_eq!(result.0, WireValue::Integer(1000));
        assert_eq!(result.1, 7);
    }

    #[test]
    fn test_parse_negative_integer() {
        let result = parse_frame(b":-42\r\n").unwrap().unwrap();
        assert_eq!(result.0, WireValue::Integer(-42));
    }

    #[test]
    fn test_parse_float() {
        let result = parse_frame(b",1724400000.25\r\n").unwrap().unwrap();
        assert_eq!(result.0, WireValue::Float(1724400000.25));
    }

    #[test]
    fn test_parse_bulk() {
        let result = parse_frame(b"$5\r\nhello\r\n").unwrap().unwrap();
        assert_eq!(result.0, WireValue::Bulk(Bytes::from("hello")));
        assert_eq!(result.1, 11);
    }

    #[test]
    fn test_parse_null_bulk() {
        let result = parse_frame(b"$-1\r\n").unwrap().unwrap();
        assert_eq!(result.0, WireValue::Null);
    }

    #[test]
    fn test_parse_bulk_incomplete() {
        assert!(parse_frame(b"$5\r\nhel").unwrap().is_none());
    }

    #[test]
    fn test_parse_array() {
        let input = b"*2\r\n$4\r\nconn\r\n$3\r\nabc\r\n";
        let result = parse_frame(input).unwrap().unwrap();
        assert_eq!(
            result.0,
            WireValue::Array(vec![
                WireValue::Bulk(Bytes::from("conn")),
                WireValue::Bulk(Bytes::from("abc")),
            ])
        );
        assert_eq!(result.1, input.len());
    }

    #[test]
    fn test_parse_array_incomplete() {
        assert!(parse_frame(b"*2\r\n$4\r\nconn\r\n").unwrap().is_none());
    }

    #[test]
    fn test_parse_inline_command() {
        let result = parse_frame(b"aq lock-1\r\n").unwrap().unwrap();
        assert_eq!(
            result.0,
            WireValue::Array(vec![
                WireValue::Bulk(Bytes::from("aq")),
                WireValue::Bulk(Bytes::from("lock-1")),
            ])
        );
        assert_eq!(result.1, 11);
    }

    #[test]
    fn test_parse_inline_incomplete() {
        assert!(parse_frame(b"aq lock-1").unwrap().is_none());
    }

    #[test]
    fn test_parse_empty_inline_is_fatal() {
        let result = parse_frame(b"\r\n");
        assert!(matches!(result, Err(ParseError::ProtocolError(_))));
    }

    #[test]
    fn test_parse_invalid_integer_is_fatal() {
        let result = parse_frame(b":not_a_number\r\n");
        assert!(matches!(result, Err(ParseError::InvalidInteger(_))));
    }

    #[test]
    fn test_parse_negative_bulk_length_is_fatal() {
        let result = parse_frame(b"$-7\r\n");
        assert!(matches!(result, Err(ParseError::InvalidBulkLength(-7))));
    }

    #[test]
    fn test_parse_oversized_array_count_is_fatal() {
        // The count must be rejected from the header alone, before any
        // element is parsed or an allocation is sized from it.
        let result = parse_frame(b"*9223372036854775807\r\n");
        assert!(matches!(result, Err(ParseError::InvalidArrayLength(_))));

        let result = parse_frame(b"*2000000000\r\n");
        assert!(matches!(result, Err(ParseError::InvalidArrayLength(_))));

        let result = parse_frame(format!("*{}\r\n", MAX_ARRAY_LEN + 1).as_bytes());
        assert!(matches!(result, Err(ParseError::InvalidArrayLength(_))));
    }

    #[test]
    fn test_into_command_wraps_scalar() {
        let (value, _) = parse_frame(b"$4\r\nping\r\n").unwrap().unwrap();
        let cmd = into_command(value).unwrap();
        assert_eq!(cmd.verb, "ping");
        assert!(cmd.args.is_empty());
    }

    #[test]
    fn test_into_command_typed_array() {
        let (value, _) = parse_frame(b"*2\r\n$2\r\nAQ\r\n$2\r\nL1\r\n").unwrap().unwrap();
        let cmd = into_command(value).unwrap();
        assert_eq!(cmd.verb, "aq");
        assert_eq!(cmd.args, vec!["L1".to_string()]);
    }

    #[test]
    fn test_into_command_rejects_nested_array() {
        let (value, _) = parse_frame(b"*1\r\n*1\r\n:1\r\n").unwrap().unwrap();
        assert!(into_command(value).is_err());
    }

    #[test]
    fn test_into_command_rejects_null_element() {
        let (value, _) = parse_frame(b"*2\r\n$4\r\nconn\r\n$-1\r\n").unwrap().unwrap();
        assert!(into_command(value).is_err());
    }

    #[test]
    fn test_pipelined_frames() {
        let input = b"aq L1\r\naq L2\r\n";
        let (first, consumed) = parse_frame(input).unwrap().unwrap();
        assert_eq!(consumed, 7);
        let cmd = into_command(first).unwrap();
        assert_eq!(cmd.args, vec!["L1".to_string()]);

        let (second, _) = parse_frame(&input[consumed..]).unwrap().unwrap();
        let cmd = into_command(second).unwrap();
        assert_eq!(cmd.args, vec!["L2".to_string()]);
    }

    #[test]
    fn test_roundtrip_structured_reply() {
        let original = WireValue::array(vec![
            WireValue::bulk(Bytes::from("L1")),
            WireValue::float(1000.5),
        ]);
        let serialized = original.serialize();
        let (parsed, _) = parse_frame(&serialized).unwrap().unwrap();
        assert_eq!(original, parsed);
    }
}
