//! One persistent connection: read a line, dispatch, write a line, repeat

use std::{io, sync::Arc};

use tokio::io::{
    split, AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt,
    BufReader, ReadHalf, WriteHalf,
};
use tracing::{debug, warn};

use super::{DEFAULT_MAX_LINE_BYTES, STREAM_TARGET};
use crate::errors::DecodeError;
use crate::rpc::{
    dispatcher::Dispatcher,
    envelope::{decode_line, encode_response, is_terminator, Response},
};
use crate::shutdown::ShutdownSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The client sent an empty line.
    Terminator,
    /// End of stream or connection reset.
    PeerClosed,
    /// A line that was not a request and carried no recoverable id, or one
    /// longer than the line limit.
    ProtocolViolation,
    Shutdown,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("connection i/o failed: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
    #[error("failed to encode response: {source}")]
    Encode {
        #[from]
        source: serde_json::Error,
    },
    #[error("dispatch worker was cancelled")]
    WorkerLost,
}

pub struct Session<S> {
    peer: String,
    reader: BufReader<ReadHalf<S>>,
    writer: WriteHalf<S>,
    dispatcher: Arc<Dispatcher>,
    shutdown: ShutdownSignal,
    state: SessionState,
    max_line_bytes: usize,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(
        stream: S,
        peer: impl Into<String>,
        dispatcher: Arc<Dispatcher>,
        shutdown: ShutdownSignal,
    ) -> Self {
        let (reader, writer) = split(stream);
        Self {
            peer: peer.into(),
            reader: BufReader::new(reader),
            writer,
            dispatcher,
            shutdown,
            state: SessionState::Open,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }

    /// Caps a request line, terminator included.
    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Serves requests until the session closes. The response to each request
    /// is written and flushed before the next line is read.
    pub async fn run(&mut self) -> Result<CloseReason, SessionError> {
        let outcome = self.serve().await;
        self.state = SessionState::Closed;
        let _ = self.writer.shutdown().await;

        match &outcome {
            Ok(reason) => debug!(
                target: STREAM_TARGET,
                peer = %self.peer,
                reason = ?reason,
                "session closed"
            ),
            Err(err) => warn!(
                target: STREAM_TARGET,
                peer = %self.peer,
                error = %err,
                "session failed"
            ),
        }
        outcome
    }

    async fn serve(&mut self) -> Result<CloseReason, SessionError> {
        let mut line = Vec::new();
        loop {
            line.clear();
            let read = tokio::select! {
                biased;
                () = self.shutdown.wait() => return Ok(CloseReason::Shutdown),
                read = read_line_limited(&mut self.reader, &mut line, self.max_line_bytes) => read,
            };

            match read {
                Ok(0) => return Ok(CloseReason::PeerClosed),
                Ok(read) if read >= self.max_line_bytes && line.last() != Some(&b'\n') => {
                    warn!(
                        target: STREAM_TARGET,
                        peer = %self.peer,
                        limit = self.max_line_bytes,
                        "closing connection after oversized request line"
                    );
                    return Ok(CloseReason::ProtocolViolation);
                }
                Ok(_) => {}
                Err(err) if is_disconnect(&err) => return Ok(CloseReason::PeerClosed),
                Err(err) => return Err(err.into()),
            }

            let Some(response) = self.handle_line(&line).await? else {
                return Ok(self.close_reason_for(&line));
            };

            let bytes = encode_response(&response)?;
            match self.write_all(&bytes).await {
                Ok(()) => {}
                Err(err) if is_disconnect(&err) => return Ok(CloseReason::PeerClosed),
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Returns `None` when the line ends the session instead of producing a response.
    async fn handle_line(&self, line: &[u8]) -> Result<Option<Response>, SessionError> {
        let text = match std::str::from_utf8(line) {
            Ok(text) => text,
            Err(_) => return Ok(self.reject(&DecodeError::Utf8)),
        };

        if is_terminator(text) {
            return Ok(None);
        }

        if self.dispatcher.debug() {
            debug!(target: STREAM_TARGET, peer = %self.peer, line = text.trim_end(), "request line");
        }

        let request = match decode_line(text) {
            Ok(request) => request,
            Err(err) => return Ok(self.reject(&err)),
        };

        let dispatcher = Arc::clone(&self.dispatcher);
        let response = tokio::task::spawn_blocking(move || dispatcher.dispatch(&request))
            .await
            .map_err(|_| SessionError::WorkerLost)?;
        Ok(Some(response))
    }

    fn reject(&self, err: &DecodeError) -> Option<Response> {
        match err.salvaged_id() {
            Some(id) => Some(self.dispatcher.decode_failure_response(id.clone(), err)),
            None => {
                warn!(
                    target: STREAM_TARGET,
                    peer = %self.peer,
                    error = %err,
                    "closing connection after unparsable request"
                );
                None
            }
        }
    }

    fn close_reason_for(&self, line: &[u8]) -> CloseReason {
        match std::str::from_utf8(line) {
            Ok(text) if is_terminator(text) => CloseReason::Terminator,
            _ => CloseReason::ProtocolViolation,
        }
    }

    async fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await
    }
}

/// Reads up to and including `\n`, but never more than `limit` bytes.
async fn read_line_limited<R>(reader: &mut R, line: &mut Vec<u8>, limit: usize) -> io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let limit = u64::try_from(limit).unwrap_or(u64::MAX);
    reader.take(limit).read_until(b'\n', line).await
}

fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
    )
}
