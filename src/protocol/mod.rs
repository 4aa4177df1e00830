//! Wire Protocol Implementation
//!
//! LiveLock speaks a hybrid wire format over TCP: commands arrive
//! either as a single RESP-like typed value (prefix byte `:` `$` `*`
//! `,`) or as a plain CRLF-terminated command line. Replies are
//! `+<content>\r\n` on success, `-<code> <message>\r\n` on error, and
//! full typed serialization for structured results (`find`, `stats`).
//!
//! ## Modules
//!
//! - `types`: the [`WireValue`] enum, [`Command`], and serialization
//! - `parser`: incremental parser for inbound frames
//!
//! Malformed frames are fatal: the connection is closed with no reply.

pub mod parser;
pub mod types;

pub use parser::{into_command, parse_frame, FrameParser, ParseError, ParseResult};
pub use types::{Command, WireValue};
