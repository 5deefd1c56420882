//! Per-connection protocol state machine.
//!
//! `AwaitingTrace -> Running -> Closed`. The first line may be a `TRACE <id>`
//! preamble; anything else is kept and executed as the first command. Every
//! non-transport failure is answered with `ERR` and the loop continues.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, BufReader, ReadHalf, WriteHalf};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::correlation::CorrelationId;
use crate::error::{AppError, AppResult};
use crate::protocol::{discard_payload, read_line, read_payload, send_reply, Command, Reply};
use crate::storage::{listing_payload, FileHandle, DEFAULT_FILE};

use super::ServerContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingTrace,
    Running,
    Closed,
}

pub struct Session<S> {
    ctx: Arc<ServerContext>,
    reader: BufReader<ReadHalf<S>>,
    writer: WriteHalf<S>,
    conn_id: u64,
    trace: Option<CorrelationId>,
    active: Option<FileHandle>,
    state: SessionState,
}

/// Outcome of waiting for the next request line.
enum Next {
    Line(AppResult<Option<String>>),
    Stop,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite,
{
    pub fn new(ctx: Arc<ServerContext>, stream: S, conn_id: u64) -> Self {
        let (r, w) = tokio::io::split(stream);
        Self {
            ctx,
            reader: BufReader::new(r),
            writer: w,
            conn_id,
            trace: None,
            active: None,
            state: SessionState::AwaitingTrace,
        }
    }

    pub fn state(&self) -> SessionState { self.state }
    pub fn trace(&self) -> Option<&CorrelationId> { self.trace.as_ref() }
    pub fn active_file(&self) -> Option<&str> { self.active.as_ref().map(|h| h.name()) }

    /// Serve until the peer disconnects, the transport fails or `stop` fires.
    /// The active file handle is closed on every exit path.
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) -> AppResult<()> {
        let result = self.drive(&mut stop).await;
        self.active = None;
        self.state = SessionState::Closed;
        debug!(target: "nfstore::session", conn_id = self.conn_id, "session closed");
        result
    }

    async fn drive(&mut self, stop: &mut watch::Receiver<bool>) -> AppResult<()> {
        let mut pending = match self.next_line(stop).await {
            Next::Stop | Next::Line(Ok(None)) => return Ok(()),
            Next::Line(Ok(Some(line))) => match CorrelationId::from_preamble(&line) {
                Some(id) => {
                    tracing::Span::current().record("trace", id.as_str());
                    info!(target: "nfstore::session", trace = %id, "trace id set");
                    self.trace = Some(id);
                    None
                }
                None => Some(Ok(Some(line))),
            },
            Next::Line(Err(e)) if e.is_fatal() => return Err(e),
            Next::Line(Err(e)) => Some(Err(e)),
        };
        self.state = SessionState::Running;

        match self.ctx.files.open(DEFAULT_FILE).await {
            Ok(h) => self.active = Some(h),
            Err(e) => {
                warn!(target: "nfstore::session", "cannot open {}: {}", DEFAULT_FILE, e);
                return send_reply(&mut self.writer, &Reply::Err).await;
            }
        }

        loop {
            let next = match pending.take() {
                Some(line) => line,
                None => match self.next_line(stop).await {
                    Next::Line(line) => line,
                    Next::Stop => {
                        debug!(target: "nfstore::session", "stopping for server shutdown");
                        return Ok(());
                    }
                },
            };
            let line = match next {
                Ok(Some(line)) => line,
                Ok(None) => return Ok(()),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    self.refuse(&e, "bad request line");
                    send_reply(&mut self.writer, &Reply::Err).await?;
                    continue;
                }
            };
            if line.is_empty() {
                continue;
            }
            self.handle_line(&line).await?;
        }
    }

    async fn next_line(&mut self, stop: &mut watch::Receiver<bool>) -> Next {
        if *stop.borrow() {
            return Next::Stop;
        }
        let max = self.ctx.config.max_line_len;
        tokio::select! {
            biased;
            _ = stop.changed() => Next::Stop,
            line = read_line(&mut self.reader, max) => Next::Line(line),
        }
    }

    /// Execute one request line and send its reply. Only transport loss is an error.
    async fn handle_line(&mut self, line: &str) -> AppResult<()> {
        let reply = match Command::parse(line) {
            Ok(cmd) => {
                debug!(target: "nfstore::session", file = ?self.active_file(), "dispatch {}", cmd);
                match self.dispatch(cmd).await {
                    Ok(reply) => reply,
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        self.refuse(&e, line);
                        Reply::Err
                    }
                }
            }
            Err(e) => {
                self.refuse(&e, line);
                Reply::Err
            }
        };
        send_reply(&mut self.writer, &reply).await
    }

    async fn dispatch(&mut self, cmd: Command) -> AppResult<Reply> {
        match cmd {
            Command::Open(name) => {
                crate::storage::validate_name(&name)?;
                // the old handle is closed before the new one is opened
                self.active = None;
                match self.ctx.files.open(&name).await {
                    Ok(h) => self.active = Some(h),
                    Err(e) => {
                        self.reopen_placeholder().await;
                        return Err(e);
                    }
                }
                info!(target: "nfstore::session", file = %name, "active file switched");
                Ok(Reply::Ok)
            }
            Command::List => Ok(Reply::Data(listing_payload(&self.ctx.files.list().await?))),
            Command::Stat(name) => Ok(Reply::Count(self.ctx.files.stat(&name).await?)),
            Command::Read { offset, len } => {
                let handle = self.active.as_mut().ok_or_else(no_active_file)?;
                Ok(Reply::Data(self.ctx.files.read(handle, offset, len).await?))
            }
            Command::Write { offset, len } => {
                if len > self.ctx.config.max_write_len {
                    discard_payload(&mut self.reader, len).await?;
                    return Err(AppError::argument(format!(
                        "write of {} bytes exceeds limit of {}", len, self.ctx.config.max_write_len
                    )));
                }
                let data = match read_payload(&mut self.reader, len).await {
                    Ok(d) => d,
                    Err(e) => {
                        // the peer may still be reading
                        let _ = send_reply(&mut self.writer, &Reply::Err).await;
                        return Err(e);
                    }
                };
                let handle = self.active.as_mut().ok_or_else(no_active_file)?;
                Ok(Reply::Count(self.ctx.files.write(handle, offset, &data).await?))
            }
            Command::Delete(name) | Command::Trash(name) => self.trash_file(&name).await,
            Command::ListTrash => Ok(Reply::Data(listing_payload(&self.ctx.trash.list().await?))),
            Command::Restore(name) => {
                self.ctx.trash.restore(&name).await?;
                Ok(Reply::Ok)
            }
            Command::PurgeTrash(name) => {
                self.ctx.trash.purge(&name).await?;
                Ok(Reply::Ok)
            }
        }
    }

    /// Move `name` to the trash. When it is the active file the handle is
    /// closed first and the placeholder becomes active afterwards.
    async fn trash_file(&mut self, name: &str) -> AppResult<Reply> {
        let was_active = self.active_file() == Some(name);
        if was_active {
            self.active = None;
        }
        let moved = self.ctx.trash.trash(name).await;
        if was_active {
            self.reopen_placeholder().await;
        }
        moved.map(|_| Reply::Ok)
    }

    /// Fall back to the placeholder after the active file went away.
    async fn reopen_placeholder(&mut self) {
        match self.ctx.files.open(DEFAULT_FILE).await {
            Ok(h) => self.active = Some(h),
            Err(e) => warn!(target: "nfstore::session", "cannot reopen {}: {}", DEFAULT_FILE, e),
        }
    }

    fn refuse(&self, e: &AppError, what: &str) {
        warn!(target: "nfstore::session", code = e.code_str(), "ERR for '{}': {}", truncate(what, 128), e);
    }
}

fn no_active_file() -> AppError {
    AppError::io("no active file", std::io::Error::new(std::io::ErrorKind::NotFound, "placeholder could not be reopened"))
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod session_tests;
