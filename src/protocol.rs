//! The wire codec: framed request decoding and reply encoding.
//!
//! Requests are always an array of bulk strings. Replies are one of simple
//! string, error, integer, bulk string (nullable), or array (nullable,
//! arbitrarily nested). Grounded in the teacher's request/response framing
//! (`redis/obj.rs`'s `CRLF`/`OK`/`NULL_BULK` constants) but generalized into
//! a standalone async codec over `tokio::io`.

use crate::error::ProtocolError;
use bytes::Bytes;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const CRLF: &[u8] = b"\r\n";

/// A fully decoded reply value, independent of how it will be serialized.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Option<Bytes>),
    Array(Option<Vec<Reply>>),
}

impl Reply {
    pub fn ok() -> Reply {
        Reply::Simple("OK".into())
    }

    pub fn nil() -> Reply {
        Reply::Bulk(None)
    }

    pub fn nil_array() -> Reply {
        Reply::Array(None)
    }

    pub fn bulk(bytes: impl Into<Bytes>) -> Reply {
        Reply::Bulk(Some(bytes.into()))
    }

    pub fn from_string(s: impl Into<String>) -> Reply {
        Reply::Bulk(Some(Bytes::from(s.into())))
    }

    pub fn array(items: Vec<Reply>) -> Reply {
        Reply::Array(Some(items))
    }

    pub fn error(msg: impl Into<String>) -> Reply {
        Reply::Error(msg.into())
    }
}

impl From<crate::error::CommandError> for Reply {
    fn from(e: crate::error::CommandError) -> Self {
        Reply::Error(e.wire_message())
    }
}

/// Reads one framed request (an array of bulk strings) from `reader`.
///
/// Returns `Ok(None)` on a clean end-of-stream before any bytes of a new
/// frame were read, distinct from a framing error mid-frame.
pub async fn read_request<R>(reader: &mut R) -> Result<Option<Vec<Bytes>>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let n = read_line(reader, &mut line).await?;
    if n == 0 {
        return Ok(None);
    }
    if line.first() != Some(&b'*') {
        return Err(ProtocolError::InvalidFraming(
            "expected array marker '*'".into(),
        ));
    }
    let count: i64 = parse_ascii_i64(&line[1..])
        .ok_or_else(|| ProtocolError::InvalidFraming("bad array length".into()))?;
    if count < 0 {
        return Ok(Some(Vec::new()));
    }
    let mut items = Vec::with_capacity(count as usize);
    for _ in 0..count {
        items.push(read_bulk(reader).await?);
    }
    Ok(Some(items))
}

async fn read_bulk<R>(reader: &mut R) -> Result<Bytes, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let n = read_line(reader, &mut line).await?;
    if n == 0 {
        return Err(ProtocolError::Eof);
    }
    if line.first() != Some(&b'$') {
        return Err(ProtocolError::InvalidFraming(
            "expected bulk marker '$'".into(),
        ));
    }
    let len: i64 = parse_ascii_i64(&line[1..])
        .ok_or_else(|| ProtocolError::InvalidFraming("bad bulk length".into()))?;
    if len < 0 {
        return Ok(Bytes::new());
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    let mut crlf = [0u8; 2];
    reader.read_exact(&mut crlf).await?;
    if &crlf != CRLF {
        return Err(ProtocolError::InvalidFraming(
            "declared length disagrees with bytes read".into(),
        ));
    }
    Ok(Bytes::from(buf))
}

/// Reads a single `\r\n`-terminated line, trimming the terminator. Returns
/// the number of bytes read including the terminator, 0 on clean EOF.
async fn read_line<R>(reader: &mut R, out: &mut Vec<u8>) -> Result<usize, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    out.clear();
    let n = reader.read_until(b'\n', out).await?;
    if n == 0 {
        return Ok(0);
    }
    if out.last() != Some(&b'\n') {
        return Err(ProtocolError::InvalidFraming("unterminated line".into()));
    }
    out.pop();
    if out.last() == Some(&b'\r') {
        out.pop();
    }
    Ok(n)
}

fn parse_ascii_i64(bytes: &[u8]) -> Option<i64> {
    std::str::from_utf8(bytes).ok()?.trim().parse().ok()
}

/// Serializes and writes `reply` to `writer`. Does not flush.
pub async fn write_reply<W>(writer: &mut W, reply: &Reply) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::new();
    encode(reply, &mut buf);
    writer.write_all(&buf).await?;
    Ok(())
}

fn encode(reply: &Reply, buf: &mut Vec<u8>) {
    match reply {
        Reply::Simple(s) => {
            buf.push(b'+');
            buf.extend_from_slice(s.as_bytes());
            buf.extend_from_slice(CRLF);
        }
        Reply::Error(e) => {
            buf.push(b'-');
            buf.extend_from_slice(e.as_bytes());
            buf.extend_from_slice(CRLF);
        }
        Reply::Integer(n) => {
            buf.push(b':');
            buf.extend_from_slice(n.to_string().as_bytes());
            buf.extend_from_slice(CRLF);
        }
        Reply::Bulk(None) => buf.extend_from_slice(b"$-1\r\n"),
        Reply::Bulk(Some(b)) => {
            buf.push(b'$');
            buf.extend_from_slice(b.len().to_string().as_bytes());
            buf.extend_from_slice(CRLF);
            buf.extend_from_slice(b);
            buf.extend_from_slice(CRLF);
        }
        Reply::Array(None) => buf.extend_from_slice(b"*-1\r\n"),
        Reply::Array(Some(items)) => {
            buf.push(b'*');
            buf.extend_from_slice(items.len().to_string().as_bytes());
            buf.extend_from_slice(CRLF);
            for item in items {
                encode(item, buf);
            }
        }
    }
}

/// Encodes a request frame (array of bulk strings) exactly as a client would
/// send it. Used by the AOF writer to persist the original command frame and
/// by tests to drive the server.
pub fn encode_request(args: &[Bytes]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.push(b'*');
    buf.extend_from_slice(args.len().to_string().as_bytes());
    buf.extend_from_slice(CRLF);
    for a in args {
        buf.push(b'$');
        buf.extend_from_slice(a.len().to_string().as_bytes());
        buf.extend_from_slice(CRLF);
        buf.extend_from_slice(a);
        buf.extend_from_slice(CRLF);
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn round_trips_a_request() {
        let args = vec![Bytes::from("SET"), Bytes::from("foo"), Bytes::from("bar")];
        let frame = encode_request(&args);
        let mut reader = BufReader::new(Cursor::new(frame));
        let decoded = read_request(&mut reader).await.unwrap().unwrap();
        assert_eq!(decoded, args);
    }

    #[tokio::test]
    async fn rejects_bad_array_marker() {
        let mut reader = BufReader::new(Cursor::new(b"not-an-array\r\n".to_vec()));
        let err = read_request(&mut reader).await.unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidFraming(_)));
    }

    #[tokio::test]
    async fn reports_clean_eof_distinctly() {
        let mut reader = BufReader::new(Cursor::new(Vec::new()));
        let decoded = read_request(&mut reader).await.unwrap();
        assert!(decoded.is_none());
    }

    #[test]
    fn encodes_nested_arrays() {
        let reply = Reply::array(vec![
            Reply::bulk("a"),
            Reply::Array(Some(vec![Reply::Integer(1), Reply::Integer(2)])),
        ]);
        let mut buf = Vec::new();
        encode(&reply, &mut buf);
        assert_eq!(buf, b"*2\r\n$1\r\na\r\n*2\r\n:1\r\n:2\r\n".to_vec());
    }

    #[test]
    fn encodes_null_bulk_and_array() {
        let mut buf = Vec::new();
        encode(&Reply::nil(), &mut buf);
        assert_eq!(buf, b"$-1\r\n");
        let mut buf = Vec::new();
        encode(&Reply::nil_array(), &mut buf);
        assert_eq!(buf, b"*-1\r\n");
    }
}
