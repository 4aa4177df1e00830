//! Wire Protocol Data Types
//!
//! This module defines the value types used on the LiveLock wire.
//! The protocol is a hybrid of a RESP-like typed format and plain
//! CRLF-terminated command lines.
//!
//! ## Protocol Format
//!
//! Typed values start with a prefix byte:
//! - `:` Integer
//! - `$` Bulk string (length-prefixed, binary safe)
//! - `*` Array
//! - `,` Float
//!
//! Replies additionally use:
//! - `+` Simple string (success)
//! - `-` Error (`-<code> <message>`)
//!
//! All values are terminated with CRLF (`\r\n`).
//!
//! ## Examples
//!
//! Success: `+1\r\n`
//! Error: `-101 wrong arguments\r\n`
//! Integer: `:1000\r\n`
//! Float: `,1724400000.25\r\n`
//! Bulk: `$5\r\nhello\r\n`
//! Array: `*2\r\n$4\r\nconn\r\n$3\r\nabc\r\n`

use bytes::Bytes;
use std::fmt;

/// The CRLF terminator used on the wire
pub const CRLF: &[u8] = b"\r\n";

/// Wire protocol type prefixes
pub mod prefix {
    pub const SIMPLE: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK: u8 = b'$';
    pub const ARRAY: u8 = b'*';
    pub const FLOAT: u8 = b',';
}

/// A value on the LiveLock wire.
///
/// Inbound commands only ever decode to `Integer`, `Float`, `Bulk`,
/// `Array` or `Null`; `Simple` and `Error` exist for the reply side.
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    /// Success reply content. Format: `+<string>\r\n`
    Simple(String),

    /// Typed error reply. Format: `-<code> <message>\r\n`
    Error { code: u16, message: String },

    /// 64-bit signed integer. Format: `:<integer>\r\n`
    Integer(i64),

    /// 64-bit float, used for timestamps. Format: `,<float>\r\n`
    Float(f64),

    /// Binary-safe bulk string. Format: `$<length>\r\n<data>\r\n`
    /// Null bulk: `$-1\r\n`
    Bulk(Bytes),

    /// Null value (null bulk string or null array)
    Null,

    /// Array of sub-values. Format: `*<count>\r\n<element1>...`
    Array(Vec<WireValue>),
}

impl WireValue {
    /// Creates a success reply.
    pub fn simple(s: impl Into<String>) -> Self {
        WireValue::Simple(s.into())
    }

    /// Creates a boolean success reply, encoded as `1` / `0`.
    pub fn boolean(b: bool) -> Self {
        WireValue::Simple(if b { "1" } else { "0" }.to_string())
    }

    pub fn integer(n: i64) -> Self {
        WireValue::Integer(n)
    }

    pub fn float(f: f64) -> Self {
        WireValue::Float(f)
    }

    pub fn bulk(data: impl Into<Bytes>) -> Self {
        WireValue::Bulk(data.into())
    }

    pub fn array(values: Vec<WireValue>) -> Self {
        WireValue::Array(values)
    }

    /// Serializes the value to bytes for sending over the wire.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        buf
    }

    /// Serializes the value into an existing buffer.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            WireValue::Simple(s) => {
                buf.push(prefix::SIMPLE);
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            WireValue::Error { code, message } => {
                buf.push(prefix::ERROR);
                buf.extend_from_slice(code.to_string().as_bytes());
                buf.push(b' ');
                buf.extend_from_slice(message.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            WireValue::Integer(n) => {
                buf.push(prefix::INTEGER);
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.extend_from_slice(CRLF);
            }
            WireValue::Float(f) => {
                buf.push(prefix::FLOAT);
                buf.extend_from_slice(f.to_string().as_bytes());
                buf.extend_from_slice(CRLF);
            }
            WireValue::Bulk(data) => {
                buf.push(prefix::BULK);
                buf.extend_from_slice(data.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                buf.extend_from_slice(data);
                buf.extend_from_slice(CRLF);
            }
            WireValue::Null => {
                buf.push(prefix::BULK);
                buf.extend_from_slice(b"-1");
                buf.extend_from_slice(CRLF);
            }
            WireValue::Array(values) => {
                buf.push(prefix::ARRAY);
                buf.extend_from_slice(values.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                for value in values {
                    value.serialize_into(buf);
                }
            }
        }
    }

    /// Renders an inbound value as a command argument string.
    ///
    /// Returns `None` for values that cannot be an argument (arrays,
    /// nulls, non-UTF-8 bulks).
    pub fn as_arg(&self) -> Option<String> {
        match self {
            WireValue::Bulk(b) => std::str::from_utf8(b).ok().map(|s| s.to_string()),
            WireValue::Simple(s) => Some(s.clone()),
            WireValue::Integer(n) => Some(n.to_string()),
            WireValue::Float(f) => Some(f.to_string()),
            _ => None,
        }
    }
}

impl fmt::Display for WireValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireValue::Simple(s) => write!(f, "+{}", s),
            WireValue::Error { code, message } => write!(f, "(error) {} {}", code, message),
            WireValue::Integer(n) => write!(f, "(integer) {}", n),
            WireValue::Float(x) => write!(f, "(float) {}", x),
            WireValue::Bulk(data) => {
                if let Ok(s) = std::str::from_utf8(data) {
                    write!(f, "\"{}\"", s)
                } else {
                    write!(f, "(binary data, {} bytes)", data.len())
                }
            }
            WireValue::Null => write!(f, "(nil)"),
            WireValue::Array(values) => {
                if values.is_empty() {
                    write!(f, "(empty array)")
                } else {
                    writeln!(f)?;
                    for (i, v) in values.iter().enumerate() {
                        writeln!(f, "{}) {}", i + 1, v)?;
                    }
                    Ok(())
                }
            }
        }
    }
}

/// A decoded client command: verb plus ordered arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// The verb, lower-cased
    pub verb: String,
    /// Ordered argument list
    pub args: Vec<String>,
}

impl Command {
    pub fn new(verb: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            verb: verb.into().to_lowercase(),
            args,
        }
    }
}
