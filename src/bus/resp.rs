//! Module: bus::resp
//!
//! Framing for the bus wire protocol (RESP2, as spoken by Redis).
//!
//! - `RespFrame`: one reply or push frame read from the bus.
//! - `Command`: an outgoing command, always an array of bulk strings.
//! - `RespError`: malformed input. Any of these is fatal for the link.
//!
//! Decoding is two-phase: `peek` finds
//! the length of the first complete frame without consuming anything, then
//! `decode` splits exactly that many bytes off the buffer and parses them.

use bytes::{BufMut, Bytes, BytesMut};
use memchr::memchr;
use smallvec::SmallVec;
use std::{error::Error as StdError, fmt, str};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const TAG_SIMPLE: u8 = b'+';
const TAG_ERROR: u8 = b'-';
const TAG_INTEGER: u8 = b':';
const TAG_BULK: u8 = b'$';
const TAG_ARRAY: u8 = b'*';

const CRLF: &[u8] = b"\r\n";

/// Same ceiling Redis applies to a single bulk string.
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

// -----------------------------------------------------------------------------
// ----- RespFrame -------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespFrame {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Option<Bytes>),
    Array(Option<Vec<RespFrame>>),
}

// -----------------------------------------------------------------------------
// ----- RespFrame: Static -----------------------------------------------------

impl RespFrame {
    /// Length of the first complete frame in `bytes`, or `None` if more input
    /// is needed.
    pub fn peek(bytes: &[u8]) -> Result<Option<usize>, RespError> {
        scan(bytes, 0)
    }

    /// Pull one complete frame off the front of `buf`. Leaves `buf` untouched
    /// when the frame is incomplete.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<RespFrame>, RespError> {
        let Some(len) = Self::peek(&buf[..])? else {
            return Ok(None);
        };

        let frame_bytes = buf.split_to(len).freeze();
        Self::from_bytes(frame_bytes).map(Some)
    }

    /// Parse exactly one frame. Trailing bytes are an error.
    pub fn from_bytes(bytes: Bytes) -> Result<RespFrame, RespError> {
        let (frame, end) = parse_at(&bytes, 0)?;
        if end != bytes.len() {
            return Err(RespError::TrailingBytes(bytes.len() - end));
        }

        Ok(frame)
    }
}

// -----------------------------------------------------------------------------
// ----- RespFrame: Public -----------------------------------------------------

impl RespFrame {
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.write_to(&mut buf);
        buf.freeze()
    }

    /// Text of a simple or bulk string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RespFrame::Simple(s) => Some(s.as_str()),
            RespFrame::Bulk(Some(b)) => str::from_utf8(b).ok(),
            _ => None,
        }
    }

    pub fn as_bulk(&self) -> Option<&Bytes> {
        match self {
            RespFrame::Bulk(Some(b)) => Some(b),
            _ => None,
        }
    }

    fn write_to(&self, buf: &mut BytesMut) {
        match self {
            RespFrame::Simple(s) => write_line(buf, TAG_SIMPLE, s.as_bytes()),
            RespFrame::Error(s) => write_line(buf, TAG_ERROR, s.as_bytes()),
            RespFrame::Integer(n) => write_line(buf, TAG_INTEGER, n.to_string().as_bytes()),
            RespFrame::Bulk(None) => write_line(buf, TAG_BULK, b"-1"),
            RespFrame::Bulk(Some(b)) => write_bulk(buf, b),
            RespFrame::Array(None) => write_line(buf, TAG_ARRAY, b"-1"),
            RespFrame::Array(Some(items)) => {
                write_line(buf, TAG_ARRAY, items.len().to_string().as_bytes());
                for item in items {
                    item.write_to(buf);
                }
            }
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Command ---------------------------------------------------------------

/// Outgoing bus command. Most commands carry at most two arguments, so the
/// arguments live inline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    parts: SmallVec<[Bytes; 3]>,
}

impl Command {
    pub fn new(name: &'static str) -> Self {
        let mut parts = SmallVec::new();
        parts.push(Bytes::from_static(name.as_bytes()));
        Command { parts }
    }

    pub fn arg(mut self, value: impl Into<Bytes>) -> Self {
        self.parts.push(value.into());
        self
    }

    pub fn to_bytes(&self) -> Bytes {
        let body: usize = self.parts.iter().map(|p| p.len() + 16).sum();
        let mut buf = BytesMut::with_capacity(16 + body);

        write_line(&mut buf, TAG_ARRAY, self.parts.len().to_string().as_bytes());
        for part in &self.parts {
            write_bulk(&mut buf, part);
        }

        buf.freeze()
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Scanning ----------------------------------------------------

/// Returns the end offset of the frame starting at `pos`.
fn scan(bytes: &[u8], pos: usize) -> Result<Option<usize>, RespError> {
    let Some(&tag) = bytes.get(pos) else {
        return Ok(None);
    };

    let Some((line, next)) = read_line(bytes, pos + 1)? else {
        return Ok(None);
    };

    match tag {
        TAG_SIMPLE | TAG_ERROR => Ok(Some(next)),

        TAG_INTEGER => {
            parse_int(line)?;
            Ok(Some(next))
        }

        TAG_BULK => {
            let Some(len) = checked_len(parse_int(line)?, MAX_BULK_LEN)? else {
                return Ok(Some(next));
            };

            let end = next + len + CRLF.len();
            if bytes.len() < end {
                return Ok(None);
            }
            if &bytes[end - CRLF.len()..end] != CRLF {
                return Err(RespError::MissingTerminator);
            }

            Ok(Some(end))
        }

        TAG_ARRAY => {
            let Some(count) = checked_len(parse_int(line)?, i64::MAX)? else {
                return Ok(Some(next));
            };

            let mut cursor = next;
            for _ in 0..count {
                match scan(bytes, cursor)? {
                    Some(end) => cursor = end,
                    None => return Ok(None),
                }
            }

            Ok(Some(cursor))
        }

        other => Err(RespError::UnknownTag(other)),
    }
}

/// Parse a frame whose bytes are known to be complete.
fn parse_at(bytes: &Bytes, pos: usize) -> Result<(RespFrame, usize), RespError> {
    let Some(&tag) = bytes.get(pos) else {
        return Err(RespError::UnexpectedEof);
    };

    let (line, next) = read_line(bytes, pos + 1)?.ok_or(RespError::UnexpectedEof)?;

    match tag {
        TAG_SIMPLE => Ok((RespFrame::Simple(utf8(line)?), next)),

        TAG_ERROR => Ok((RespFrame::Error(utf8(line)?), next)),

        TAG_INTEGER => Ok((RespFrame::Integer(parse_int(line)?), next)),

        TAG_BULK => {
            let Some(len) = checked_len(parse_int(line)?, MAX_BULK_LEN)? else {
                return Ok((RespFrame::Bulk(None), next));
            };

            let end = next + len;
            if bytes.len() < end + CRLF.len() {
                return Err(RespError::UnexpectedEof);
            }
            if &bytes[end..end + CRLF.len()] != CRLF {
                return Err(RespError::MissingTerminator);
            }

            Ok((RespFrame::Bulk(Some(bytes.slice(next..end))), end + CRLF.len()))
        }

        TAG_ARRAY => {
            let Some(count) = checked_len(parse_int(line)?, i64::MAX)? else {
                return Ok((RespFrame::Array(None), next));
            };

            let mut items = Vec::with_capacity(count.min(64));
            let mut cursor = next;
            for _ in 0..count {
                let (item, end) = parse_at(bytes, cursor)?;
                items.push(item);
                cursor = end;
            }

            Ok((RespFrame::Array(Some(items)), cursor))
        }

        other => Err(RespError::UnknownTag(other)),
    }
}

/// Line body starting at `from` and the offset just past its CRLF.
#[inline]
fn read_line(bytes: &[u8], from: usize) -> Result<Option<(&[u8], usize)>, RespError> {
    if from > bytes.len() {
        return Ok(None);
    }

    let Some(lf) = memchr(b'\n', &bytes[from..]) else {
        return Ok(None);
    };

    let lf = from + lf;
    if lf == from || bytes[lf - 1] != b'\r' {
        return Err(RespError::MissingTerminator);
    }

    Ok(Some((&bytes[from..lf - 1], lf + 1)))
}

#[inline]
fn parse_int(line: &[u8]) -> Result<i64, RespError> {
    str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(RespError::InvalidInteger)
}

/// `-1` is the null marker; anything else below zero or above `max` is bad.
#[inline]
fn checked_len(len: i64, max: i64) -> Result<Option<usize>, RespError> {
    match len {
        -1 => Ok(None),
        n if n < -1 => Err(RespError::InvalidLength(n)),
        n if n > max => Err(RespError::TooLarge(n)),
        n => Ok(Some(n as usize)),
    }
}

#[inline]
fn utf8(line: &[u8]) -> Result<String, RespError> {
    str::from_utf8(line)
        .map(str::to_owned)
        .map_err(RespError::Utf8Error)
}

// -----------------------------------------------------------------------------
// ----- Internal: Writing -----------------------------------------------------

#[inline]
fn write_line(buf: &mut BytesMut, tag: u8, body: &[u8]) {
    buf.put_u8(tag);
    buf.extend_from_slice(body);
    buf.extend_from_slice(CRLF);
}

#[inline]
fn write_bulk(buf: &mut BytesMut, body: &[u8]) {
    write_line(buf, TAG_BULK, body.len().to_string().as_bytes());
    buf.extend_from_slice(body);
    buf.extend_from_slice(CRLF);
}

// -----------------------------------------------------------------------------
// ----- Error -----------------------------------------------------------------

#[derive(Debug)]
pub enum RespError {
    UnknownTag(u8),
    InvalidInteger,
    InvalidLength(i64),
    TooLarge(i64),
    MissingTerminator,
    TrailingBytes(usize),
    UnexpectedEof,
    Utf8Error(str::Utf8Error),
}

impl fmt::Display for RespError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RespError::UnknownTag(tag) => write!(f, "unknown frame tag: 0x{tag:02x}"),
            RespError::InvalidInteger => write!(f, "invalid integer"),
            RespError::InvalidLength(len) => write!(f, "invalid length: {len}"),
            RespError::TooLarge(len) => write!(f, "frame too large: {len}"),
            RespError::MissingTerminator => write!(f, "missing CRLF terminator"),
            RespError::TrailingBytes(n) => write!(f, "{n} trailing bytes after frame"),
            RespError::UnexpectedEof => write!(f, "unexpected EOF"),
            RespError::Utf8Error(e) => write!(f, "UTF-8 error: {e}"),
        }
    }
}

impl StdError for RespError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            RespError::Utf8Error(e) => Some(e),
            _ => None,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(s: &str) -> RespFrame {
        RespFrame::Bulk(Some(Bytes::copy_from_slice(s.as_bytes())))
    }

    #[test]
    fn command_encoding() {
        let cmd = Command::new("PUBLISH").arg("sid:1").arg(r#"{"type":"X"}"#);
        assert_eq!(
            &cmd.to_bytes()[..],
            b"*3\r\n$7\r\nPUBLISH\r\n$5\r\nsid:1\r\n$12\r\n{\"type\":\"X\"}\r\n"
        );
    }

    #[test]
    fn decode_message_push() {
        let wire = b"*3\r\n$7\r\nmessage\r\n$5\r\nsid:1\r\n$2\r\n{}\r\n";
        let mut buf = BytesMut::from(&wire[..]);

        let frame = RespFrame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(
            frame,
            RespFrame::Array(Some(vec![bulk("message"), bulk("sid:1"), bulk("{}")]))
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn incomplete_frames_are_left_in_place() {
        let wire = b"*3\r\n$9\r\nsubscribe\r\n$4\r\nsio1\r\n:1\r\n";

        for cut in 0..wire.len() {
            let mut buf = BytesMut::from(&wire[..cut]);
            assert!(RespFrame::decode(&mut buf).unwrap().is_none(), "cut at {cut}");
            assert_eq!(buf.len(), cut);
        }

        let mut buf = BytesMut::from(&wire[..]);
        assert!(RespFrame::decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn decodes_pipelined_replies_in_order() {
        let mut buf = BytesMut::from(&b"+OK\r\n:2\r\n$4\r\nECHO\r\n-ERR nope\r\n"[..]);

        assert_eq!(
            RespFrame::decode(&mut buf).unwrap(),
            Some(RespFrame::Simple("OK".into()))
        );
        assert_eq!(RespFrame::decode(&mut buf).unwrap(), Some(RespFrame::Integer(2)));
        assert_eq!(RespFrame::decode(&mut buf).unwrap(), Some(bulk("ECHO")));

        let err = RespFrame::decode(&mut buf).unwrap().unwrap();
        assert!(matches!(err, RespFrame::Error(_)));
        assert_eq!(err.as_str(), None);
        assert_eq!(RespFrame::decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn null_values() {
        let mut buf = BytesMut::from(&b"$-1\r\n*-1\r\n"[..]);
        assert_eq!(RespFrame::decode(&mut buf).unwrap(), Some(RespFrame::Bulk(None)));
        assert_eq!(RespFrame::decode(&mut buf).unwrap(), Some(RespFrame::Array(None)));
    }

    #[test]
    fn bulk_may_contain_crlf() {
        let mut buf = BytesMut::from(&b"$4\r\na\r\nb\r\n"[..]);
        let frame = RespFrame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.as_bulk().map(|b| &b[..]), Some(&b"a\r\nb"[..]));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            RespFrame::peek(b"?oops\r\n"),
            Err(RespError::UnknownTag(b'?'))
        ));
        assert!(matches!(
            RespFrame::peek(b":abc\r\n"),
            Err(RespError::InvalidInteger)
        ));
        assert!(matches!(
            RespFrame::peek(b"$-5\r\n"),
            Err(RespError::InvalidLength(-5))
        ));
        assert!(matches!(
            RespFrame::peek(b"$3\r\nabcXY"),
            Err(RespError::MissingTerminator)
        ));
        assert!(matches!(
            RespFrame::peek(b"+OK\n"),
            Err(RespError::MissingTerminator)
        ));
    }

    #[test]
    fn rejects_oversized_bulk() {
        let header = format!("${}\r\n", MAX_BULK_LEN + 1);
        assert!(matches!(
            RespFrame::peek(header.as_bytes()),
            Err(RespError::TooLarge(_))
        ));
    }

    #[test]
    fn from_bytes_rejects_trailing_input() {
        let err = RespFrame::from_bytes(Bytes::from_static(b"+OK\r\n+OK\r\n")).unwrap_err();
        assert!(matches!(err, RespError::TrailingBytes(5)));
    }

    #[test]
    fn frame_encoding_matches_wire() {
        let frame = RespFrame::Array(Some(vec![
            bulk("subscribe"),
            bulk("sio"),
            RespFrame::Integer(1),
        ]));
        assert_eq!(
            &frame.to_bytes()[..],
            b"*3\r\n$9\r\nsubscribe\r\n$3\r\nsio\r\n:1\r\n"
        );
        assert_eq!(&RespFrame::Simple("PONG".into()).to_bytes()[..], b"+PONG\r\n");
        assert_eq!(&RespFrame::Bulk(None).to_bytes()[..], b"$-1\r\n");
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
