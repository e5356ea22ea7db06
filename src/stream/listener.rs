//! Accept loop for the stream transport

use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    net::{TcpListener, TcpSocket},
    task::JoinSet,
};
use tracing::{debug, info, warn};

use super::{
    session::{CloseReason, Session, SessionError},
    DEFAULT_MAX_LINE_BYTES, STREAM_TARGET,
};
use crate::errors::ServerError;
use crate::rpc::dispatcher::Dispatcher;
use crate::shutdown::ShutdownSignal;

const LISTEN_BACKLOG: u32 = 1024;
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(150);

/// Binds `addr` with address reuse enabled so a restarted server does not
/// trip over sockets left in `TIME_WAIT`.
pub fn bind_reusable(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    let bind_error = |source: io::Error| ServerError::Bind { addr, source };

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(bind_error)?;
    socket.set_reuseaddr(true).map_err(bind_error)?;
    socket.bind(addr).map_err(bind_error)?;
    socket.listen(LISTEN_BACKLOG).map_err(bind_error)
}

pub struct StreamServer {
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    shutdown: ShutdownSignal,
    shutdown_grace: Duration,
    max_line_bytes: usize,
}

impl StreamServer {
    pub fn bind(
        addr: SocketAddr,
        dispatcher: Arc<Dispatcher>,
        shutdown: ShutdownSignal,
        shutdown_grace: Duration,
    ) -> Result<Self, ServerError> {
        let listener = bind_reusable(addr)?;
        Ok(Self {
            listener,
            dispatcher,
            shutdown,
            shutdown_grace,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        })
    }

    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener
            .local_addr()
            .map_err(|source| ServerError::LocalAddr { source })
    }

    /// Accepts connections until shutdown is signalled, then closes the
    /// listening socket and drains live sessions.
    pub async fn run(self) -> Result<(), ServerError> {
        let Self {
            listener,
            dispatcher,
            shutdown,
            shutdown_grace,
            max_line_bytes,
        } = self;
        let endpoint = listener
            .local_addr()
            .map_err(|source| ServerError::LocalAddr { source })?;
        info!(target: STREAM_TARGET, %endpoint, "stream listener active");

        let mut sessions = JoinSet::new();
        loop {
            tokio::select! {
                biased;
                () = shutdown.wait() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Err(err) = stream.set_nodelay(true) {
                            debug!(target: STREAM_TARGET, %peer, error = %err, "failed to disable nagle");
                        }
                        info!(target: STREAM_TARGET, %peer, "connection opened");
                        let mut session = Session::new(
                            stream,
                            peer.to_string(),
                            Arc::clone(&dispatcher),
                            shutdown.clone(),
                        )
                        .with_max_line_bytes(max_line_bytes);
                        sessions.spawn(async move { session.run().await });
                    }
                    Err(err) => {
                        warn!(target: STREAM_TARGET, error = %err, "accept failed");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
                Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                    log_session_end(finished);
                }
            }
        }

        drop(listener);
        info!(target: STREAM_TARGET, %endpoint, "stream listener closed");

        drain_sessions(&mut sessions, shutdown_grace).await;
        Ok(())
    }
}

async fn drain_sessions(
    sessions: &mut JoinSet<Result<CloseReason, SessionError>>,
    grace: Duration,
) {
    if sessions.is_empty() {
        return;
    }

    let drained = tokio::time::timeout(grace, async {
        while let Some(finished) = sessions.join_next().await {
            log_session_end(finished);
        }
    })
    .await;

    if drained.is_err() {
        warn!(
            target: STREAM_TARGET,
            remaining = sessions.len(),
            "sessions still busy after shutdown grace period, aborting"
        );
        sessions.abort_all();
        while sessions.join_next().await.is_some() {}
    }
}

fn log_session_end(
    finished: Result<Result<CloseReason, SessionError>, tokio::task::JoinError>,
) {
    match finished {
        Ok(Ok(reason)) => info!(target: STREAM_TARGET, reason = ?reason, "connection closed"),
        Ok(Err(_)) => {}
        Err(err) if err.is_panic() => {
            warn!(target: STREAM_TARGET, error = %err, "session task panicked");
        }
        Err(_) => {}
    }
}
