//! Line-oriented wire codec.
//!
//! Requests are single `\n`-terminated lines (an optional `\r` before the
//! terminator is stripped). `WRITE <off> <len>` is followed by exactly `len` raw
//! bytes with no framing. Replies are `OK\n`, `OK <n>\n` optionally followed by
//! `n` raw bytes, or `ERR\n`.

use std::fmt;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{AppError, AppResult};

pub const OK_LINE: &[u8] = b"OK\n";
pub const ERR_LINE: &[u8] = b"ERR\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Open(String),
    List,
    Stat(String),
    Read { offset: u64, len: u64 },
    Write { offset: u64, len: u64 },
    Delete(String),
    ListTrash,
    Trash(String),
    Restore(String),
    PurgeTrash(String),
}

impl Command {
    /// Decode one request line (terminator already stripped).
    pub fn parse(line: &str) -> AppResult<Command> {
        let (verb, rest) = match line.split_once(' ') {
            Some((v, r)) => (v, Some(r)),
            None => (line, None),
        };
        match verb {
            "OPEN" => Ok(Command::Open(name_arg(verb, rest)?)),
            "LIST" => { no_args(verb, rest)?; Ok(Command::List) }
            "STAT" => Ok(Command::Stat(name_arg(verb, rest)?)),
            "READ" => { let (offset, len) = range_args(verb, rest)?; Ok(Command::Read { offset, len }) }
            "WRITE" => { let (offset, len) = range_args(verb, rest)?; Ok(Command::Write { offset, len }) }
            "DELETE" => Ok(Command::Delete(name_arg(verb, rest)?)),
            "LISTTRASH" => { no_args(verb, rest)?; Ok(Command::ListTrash) }
            "TRASH" => Ok(Command::Trash(name_arg(verb, rest)?)),
            "RESTORE" => Ok(Command::Restore(name_arg(verb, rest)?)),
            "PURGETRASH" => Ok(Command::PurgeTrash(name_arg(verb, rest)?)),
            other => Err(AppError::protocol(format!("unknown command '{}'", other))),
        }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            Command::Open(_) => "OPEN",
            Command::List => "LIST",
            Command::Stat(_) => "STAT",
            Command::Read { .. } => "READ",
            Command::Write { .. } => "WRITE",
            Command::Delete(_) => "DELETE",
            Command::ListTrash => "LISTTRASH",
            Command::Trash(_) => "TRASH",
            Command::Restore(_) => "RESTORE",
            Command::PurgeTrash(_) => "PURGETRASH",
        }
    }

    /// Request line as sent on the wire, terminator included.
    pub fn encode(&self) -> String { format!("{}\n", self) }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Open(n) | Command::Stat(n) | Command::Delete(n)
            | Command::Trash(n) | Command::Restore(n) | Command::PurgeTrash(n) => write!(f, "{} {}", self.verb(), n),
            Command::Read { offset, len } | Command::Write { offset, len } => write!(f, "{} {} {}", self.verb(), offset, len),
            Command::List | Command::ListTrash => f.write_str(self.verb()),
        }
    }
}

fn name_arg(verb: &str, rest: Option<&str>) -> AppResult<String> {
    // Names are the verbatim remainder so they may contain spaces ("photo (1).jpg").
    match rest {
        Some(name) if !name.trim().is_empty() => Ok(name.to_string()),
        _ => Err(AppError::protocol(format!("{} requires a file name", verb))),
    }
}

fn no_args(verb: &str, rest: Option<&str>) -> AppResult<()> {
    match rest {
        Some(r) if !r.trim().is_empty() => Err(AppError::protocol(format!("{} takes no arguments", verb))),
        _ => Ok(()),
    }
}

fn range_args(verb: &str, rest: Option<&str>) -> AppResult<(u64, u64)> {
    let parts: Vec<&str> = rest.unwrap_or("").split_whitespace().collect();
    if parts.len() != 2 {
        return Err(AppError::protocol(format!("{} expects <off> <len>", verb)));
    }
    let offset = parse_i64(parts[0])?;
    let len = parse_i64(parts[1])?;
    if offset < 0 || len < 0 {
        return Err(AppError::argument(format!("{} offset and length must be non-negative (got {} {})", verb, offset, len)));
    }
    Ok((offset as u64, len as u64))
}

fn parse_i64(raw: &str) -> AppResult<i64> {
    raw.parse::<i64>()
        .map_err(|_| AppError::protocol(format!("'{}' is not an integer", raw)))
}

/// A response to one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `OK\n`
    Ok,
    /// `OK <n>\n` with no payload (STAT, WRITE).
    Count(u64),
    /// `OK <len>\n` followed by the bytes (LIST, LISTTRASH, READ).
    Data(Vec<u8>),
    /// `ERR\n`
    Err,
}

impl Reply {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Reply::Ok => OK_LINE.to_vec(),
            Reply::Err => ERR_LINE.to_vec(),
            Reply::Count(n) => format!("OK {}\n", n).into_bytes(),
            Reply::Data(bytes) => {
                let mut out = format!("OK {}\n", bytes.len()).into_bytes();
                out.extend_from_slice(bytes);
                out
            }
        }
    }
}

/// Header of a reply as seen by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyHeader {
    Ok,
    Count(u64),
    Err,
}

impl ReplyHeader {
    pub fn parse(line: &str) -> AppResult<ReplyHeader> {
        match line {
            "OK" => Ok(ReplyHeader::Ok),
            "ERR" => Ok(ReplyHeader::Err),
            _ => {
                let n = line
                    .strip_prefix("OK ")
                    .and_then(|n| n.trim().parse::<u64>().ok())
                    .ok_or_else(|| AppError::protocol(format!("unexpected reply '{}'", line)))?;
                Ok(ReplyHeader::Count(n))
            }
        }
    }
}

/// Read one line of at most `max_len` bytes (terminator and optional `\r`
/// excluded). Returns `Ok(None)` once the peer has closed the stream, including
/// when it closes mid-line. An over-long line is consumed through its
/// terminator and reported as a protocol error so the session can carry on.
pub async fn read_line<R>(reader: &mut R, max_len: usize) -> AppResult<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line: Vec<u8> = Vec::new();
    let mut overflow = false;
    loop {
        let (done, used) = {
            let buf = reader.fill_buf().await.map_err(AppError::Transport)?;
            if buf.is_empty() {
                return Ok(None);
            }
            match buf.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    if !overflow { line.extend_from_slice(&buf[..pos]); }
                    (true, pos + 1)
                }
                None => {
                    if !overflow { line.extend_from_slice(buf); }
                    (false, buf.len())
                }
            }
        };
        reader.consume(used);
        // one extra byte of slack for the optional '\r'
        if !overflow && line.len() > max_len + 1 {
            overflow = true;
            line = Vec::new();
        }
        if done { break; }
    }
    if line.last() == Some(&b'\r') { line.pop(); }
    if overflow || line.len() > max_len {
        return Err(AppError::protocol(format!("line exceeds {} bytes", max_len)));
    }
    Ok(Some(String::from_utf8_lossy(&line).into_owned()))
}

/// Read exactly `len` payload bytes however the transport fragments them.
pub async fn read_payload<R>(reader: &mut R, len: u64) -> AppResult<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let got = reader.take(len).read_to_end(&mut buf).await.map_err(AppError::Transport)?;
    if (got as u64) < len {
        return Err(AppError::Transport(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("payload truncated: {} of {} bytes", got, len),
        )));
    }
    Ok(buf)
}

/// Consume and drop `len` payload bytes.
pub async fn discard_payload<R>(reader: &mut R, len: u64) -> AppResult<()>
where
    R: AsyncRead + Unpin,
{
    let copied = tokio::io::copy(&mut reader.take(len), &mut tokio::io::sink())
        .await
        .map_err(AppError::Transport)?;
    if copied < len {
        return Err(AppError::Transport(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("payload truncated: {} of {} bytes", copied, len),
        )));
    }
    Ok(())
}

pub async fn send_reply<W>(writer: &mut W, reply: &Reply) -> AppResult<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&reply.encode()).await.map_err(AppError::Transport)?;
    writer.flush().await.map_err(AppError::Transport)
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod protocol_tests;
