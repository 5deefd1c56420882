//! Async client for the nfstore line protocol.
//!
//! Every command method returns `Ok(None)` / `Ok(false)` when the server
//! answers `ERR`; `Err` is reserved for transport failures and replies that do
//! not parse.

use anyhow::{anyhow, bail, Context, Result};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::config::DEFAULT_MAX_LINE_LEN;
use crate::correlation::CorrelationId;
use crate::protocol::{read_line, read_payload, Command, ReplyHeader};

pub struct Client<S = TcpStream> {
    reader: BufReader<ReadHalf<S>>,
    writer: WriteHalf<S>,
}

impl Client<TcpStream> {
    /// Connect and, when `trace` is given, tag the session with it.
    pub async fn connect<A: ToSocketAddrs>(addr: A, trace: Option<&CorrelationId>) -> Result<Self> {
        let stream = TcpStream::connect(addr).await.context("connect to nfstore server")?;
        stream.set_nodelay(true)?;
        Self::from_stream(stream, trace).await
    }
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite,
{
    pub async fn from_stream(stream: S, trace: Option<&CorrelationId>) -> Result<Self> {
        let (r, w) = tokio::io::split(stream);
        let mut client = Self { reader: BufReader::new(r), writer: w };
        if let Some(id) = trace {
            client.send_raw(id.preamble().as_bytes()).await?;
        }
        Ok(client)
    }

    pub async fn open(&mut self, name: &str) -> Result<bool> {
        self.expect_ok(Command::Open(name.to_string())).await
    }

    pub async fn list(&mut self) -> Result<Option<Vec<String>>> {
        Ok(self.data(Command::List).await?.map(|b| split_names(&b)))
    }

    pub async fn stat(&mut self, name: &str) -> Result<Option<u64>> {
        match self.call(&Command::Stat(name.to_string()), None).await? {
            ReplyHeader::Count(n) => Ok(Some(n)),
            ReplyHeader::Err => Ok(None),
            ReplyHeader::Ok => bail!("STAT reply without size"),
        }
    }

    pub async fn read(&mut self, offset: u64, len: u64) -> Result<Option<Vec<u8>>> {
        self.data(Command::Read { offset, len }).await
    }

    pub async fn write(&mut self, offset: u64, data: &[u8]) -> Result<Option<u64>> {
        let cmd = Command::Write { offset, len: data.len() as u64 };
        match self.call(&cmd, Some(data)).await? {
            ReplyHeader::Count(n) => Ok(Some(n)),
            ReplyHeader::Err => Ok(None),
            ReplyHeader::Ok => bail!("WRITE reply without count"),
        }
    }

    pub async fn delete(&mut self, name: &str) -> Result<bool> {
        self.expect_ok(Command::Delete(name.to_string())).await
    }

    pub async fn list_trash(&mut self) -> Result<Option<Vec<String>>> {
        Ok(self.data(Command::ListTrash).await?.map(|b| split_names(&b)))
    }

    pub async fn trash(&mut self, name: &str) -> Result<bool> {
        self.expect_ok(Command::Trash(name.to_string())).await
    }

    pub async fn restore(&mut self, name: &str) -> Result<bool> {
        self.expect_ok(Command::Restore(name.to_string())).await
    }

    pub async fn purge_trash(&mut self, name: &str) -> Result<bool> {
        self.expect_ok(Command::PurgeTrash(name.to_string())).await
    }

    /// Send arbitrary bytes, e.g. a malformed request.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Read one reply header line.
    pub async fn read_header(&mut self) -> Result<ReplyHeader> {
        let line = read_line(&mut self.reader, DEFAULT_MAX_LINE_LEN)
            .await?
            .ok_or_else(|| anyhow!("server closed the connection"))?;
        Ok(ReplyHeader::parse(&line)?)
    }

    /// Read exactly `len` reply payload bytes.
    pub async fn read_body(&mut self, len: u64) -> Result<Vec<u8>> {
        Ok(read_payload(&mut self.reader, len).await?)
    }

    async fn call(&mut self, cmd: &Command, payload: Option<&[u8]>) -> Result<ReplyHeader> {
        self.writer.write_all(cmd.encode().as_bytes()).await?;
        if let Some(p) = payload {
            self.writer.write_all(p).await?;
        }
        self.writer.flush().await?;
        self.read_header().await
    }

    async fn expect_ok(&mut self, cmd: Command) -> Result<bool> {
        match self.call(&cmd, None).await? {
            ReplyHeader::Ok => Ok(true),
            ReplyHeader::Err => Ok(false),
            ReplyHeader::Count(n) => bail!("unexpected 'OK {}' for {}", n, cmd.verb()),
        }
    }

    async fn data(&mut self, cmd: Command) -> Result<Option<Vec<u8>>> {
        match self.call(&cmd, None).await? {
            ReplyHeader::Count(n) => Ok(Some(self.read_body(n).await?)),
            ReplyHeader::Err => Ok(None),
            ReplyHeader::Ok => bail!("{} reply without length", cmd.verb()),
        }
    }
}

fn split_names(payload: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(payload)
        .lines()
        .filter(|l| !l.is_empty())
        .map(|l| l.to_string())
        .collect()
}
