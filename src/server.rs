use std::{
    io,
    net::{SocketAddr, TcpStream as StdTcpStream},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
    thread,
};

use strum::{Display, EnumString};
use thiserror::Error;
use tokio::{
    net::{TcpListener, TcpSocket, TcpStream},
    select,
    sync::Notify,
    task::JoinError,
};

use crate::remote::{serve_connection, SessionEnd};

/// How accepted connections are served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ConcurrencyMode {
    /// One client at a time, on the accept loop's behalf.
    #[default]
    Sequential,
    /// A dedicated thread per client.
    Concurrent,
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("failed to accept connection: {0}")]
    Accept(#[source] io::Error),
    #[error("session worker failed: {0}")]
    Worker(#[from] JoinError),
}

/// State shared between the accept loop and every session.
#[derive(Debug, Default)]
struct ServerState {
    stopping: AtomicBool,
    wake: Notify,
    active: Mutex<usize>,
}

impl ServerState {
    fn request_stop(&self) {
        if !self.stopping.swap(true, Ordering::SeqCst) {
            info!("server stop requested");
        }
        // stored as a permit if the accept loop isn't waiting yet
        self.wake.notify_one();
    }

    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    fn connection_opened(&self) -> usize {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        *active += 1;
        *active
    }

    fn connection_closed(&self) -> usize {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        *active = active.saturating_sub(1);
        *active
    }

    fn active_connections(&self) -> usize {
        *self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Requests shutdown of a running [`Server`] from outside it.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    state: Arc<ServerState>,
}

impl ServerHandle {
    pub fn stop(&self) {
        self.state.request_stop();
    }

    pub fn is_stopping(&self) -> bool {
        self.state.is_stopping()
    }

    pub fn active_connections(&self) -> usize {
        self.state.active_connections()
    }
}

pub struct Server {
    listener: TcpListener,
    mode: ConcurrencyMode,
    state: Arc<ServerState>,
}

impl Server {
    pub async fn bind(addr: SocketAddr, mode: ConcurrencyMode) -> Result<Self, ServerError> {
        let bind_error = |source| ServerError::Bind { addr, source };

        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4(),
            SocketAddr::V6(_) => TcpSocket::new_v6(),
        }
        .map_err(bind_error)?;
        socket.set_reuseaddr(true).map_err(bind_error)?;
        socket.bind(addr).map_err(bind_error)?;
        let listener = socket.listen(1024).map_err(bind_error)?;

        info!(%addr, %mode, "server listening");

        Ok(Self {
            listener,
            mode,
            state: Arc::default(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            state: self.state.clone(),
        }
    }

    /// Accepts clients until a stop is requested, either by a client's
    /// `stop-server` or through a [`ServerHandle`].
    ///
    /// Sessions still open in concurrent mode are left to finish on their own
    /// threads.
    pub async fn run(self) -> Result<(), ServerError> {
        while !self.state.is_stopping() {
            let (stream, peer) = select! {
                accepted = self.listener.accept() => accepted.map_err(ServerError::Accept)?,
                _ = self.state.wake.notified() => continue,
            };

            info!(%peer, "accepted connection");

            let stream = match into_blocking(stream) {
                Ok(stream) => stream,
                Err(err) => {
                    warn!(%peer, "failed to prepare connection: {err}");
                    continue;
                }
            };

            let state = self.state.clone();
            match self.mode {
                ConcurrencyMode::Sequential => {
                    tokio::task::spawn_blocking(move || run_session(stream, peer, &state)).await?;
                }
                ConcurrencyMode::Concurrent => {
                    let spawned = thread::Builder::new()
                        .name(format!("dsh-session-{peer}"))
                        .spawn(move || run_session(stream, peer, &state));
                    if let Err(err) = spawned {
                        error!(%peer, "failed to start session thread: {err}");
                    }
                }
            }
        }

        info!("server stopped accepting connections");
        Ok(())
    }
}

fn into_blocking(stream: TcpStream) -> io::Result<StdTcpStream> {
    let stream = stream.into_std()?;
    stream.set_nonblocking(false)?;
    Ok(stream)
}

fn run_session(stream: StdTcpStream, peer: SocketAddr, state: &ServerState) {
    let active = state.connection_opened();
    debug!(%peer, active, "session started");

    match serve_connection(stream) {
        Ok(SessionEnd::ServerStop) => {
            info!(%peer, "client requested server stop");
            state.request_stop();
        }
        Ok(SessionEnd::ClientExited) => {
            info!(%peer, "client exited");
        }
        Err(err) => warn!(%peer, "communication error: {err}"),
    }

    let active = state.connection_closed();
    debug!(%peer, active, "session ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_count_never_underflows() {
        let state = ServerState::default();
        assert_eq!(state.connection_opened(), 1);
        assert_eq!(state.connection_opened(), 2);
        assert_eq!(state.connection_closed(), 1);
        assert_eq!(state.connection_closed(), 0);
        assert_eq!(state.connection_closed(), 0);
    }

    #[test]
    fn modes_parse_from_names() {
        assert_eq!("concurrent".parse(), Ok(ConcurrencyMode::Concurrent));
        assert_eq!(ConcurrencyMode::Sequential.to_string(), "sequential");
    }

    #[tokio::test]
    async fn stop_before_run_returns_immediately() {
        let server = Server::bind("127.0.0.1:0".parse().unwrap(), ConcurrencyMode::Sequential)
            .await
            .unwrap();
        let handle = server.handle();
        handle.stop();
        assert!(handle.is_stopping());

        server.run().await.unwrap();
        assert_eq!(handle.active_connections(), 0);
    }
}
