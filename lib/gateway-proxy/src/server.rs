//! HTTP/1.1 accept loop with graceful drain, and the registration server
//! lifecycle built on it.

use crate::error::ServerError;
use crate::rpc::RegistrationService;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

/// Serve HTTP/1.1 connections from `listener` until `shutdown` turns true.
///
/// On shutdown the listener is closed, every open connection finishes its
/// in-flight request and closes, and the call returns once all have drained.
pub async fn serve_connections<F, Fut>(
    listener: TcpListener,
    handler: F,
    mut shutdown: watch::Receiver<bool>,
) where
    F: Fn(Request<Incoming>) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Response<Full<Bytes>>> + Send + 'static,
{
    let mut connections = JoinSet::new();

    loop {
        let accepted = tokio::select! {
            _ = stop_requested(&mut shutdown) => break,
            accepted = listener.accept() => accepted,
        };

        let (stream, remote_addr) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("Failed to accept connection: {}", e);
                continue;
            }
        };

        debug!("Accepted connection from {}", remote_addr);
        let handler = handler.clone();
        let mut conn_shutdown = shutdown.clone();

        connections.spawn(async move {
            let io = TokioIo::new(stream);
            let service = service_fn(move |req| {
                let response = handler(req);
                async move { Ok::<_, Infallible>(response.await) }
            });

            let conn = http1::Builder::new().serve_connection(io, service);
            tokio::pin!(conn);

            tokio::select! {
                result = conn.as_mut() => {
                    if let Err(e) = result {
                        debug!("Connection from {} ended: {}", remote_addr, e);
                    }
                }
                _ = stop_requested(&mut conn_shutdown) => {
                    conn.as_mut().graceful_shutdown();
                    if let Err(e) = conn.await {
                        debug!("Connection from {} ended during drain: {}", remote_addr, e);
                    }
                }
            }
        });

        while connections.try_join_next().is_some() {}
    }

    drop(listener);
    debug!("Draining {} open connections", connections.len());
    while connections.join_next().await.is_some() {}
}

/// Resolves once `shutdown` is true. Pends forever if the sender is gone.
async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerState {
    Created,
    Serving(SocketAddr),
    Stopped,
}

/// Registration RPC server.
///
/// `run` binds and serves until `stop` is called; a stopped server cannot
/// be run again.
pub struct RegistrationServer {
    addr: SocketAddr,
    service: Arc<RegistrationService>,
    started: AtomicBool,
    state: watch::Sender<ServerState>,
    shutdown: watch::Sender<bool>,
}

impl RegistrationServer {
    pub fn new(addr: SocketAddr, service: Arc<RegistrationService>) -> Self {
        let (state, _) = watch::channel(ServerState::Created);
        let (shutdown, _) = watch::channel(false);
        Self {
            addr,
            service,
            started: AtomicBool::new(false),
            state,
            shutdown,
        }
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Bind and serve. Returns after `stop` once open connections drain.
    pub async fn run(&self) -> Result<(), ServerError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(match self.state() {
                ServerState::Stopped => ServerError::Stopped,
                _ => ServerError::AlreadyRunning,
            });
        }
        if self.state() == ServerState::Stopped {
            return Err(ServerError::Stopped);
        }

        let bound = match TcpListener::bind(self.addr).await {
            Ok(listener) => listener.local_addr().map(|addr| (listener, addr)),
            Err(e) => Err(e),
        };
        let (listener, local_addr) = match bound {
            Ok(bound) => bound,
            Err(e) => {
                error!("Failed to bind registration RPC server to {}: {}", self.addr, e);
                self.state.send_replace(ServerState::Stopped);
                return Err(ServerError::Io(e));
            }
        };

        let serving = self.state.send_if_modified(|state| {
            if *state == ServerState::Created {
                *state = ServerState::Serving(local_addr);
                true
            } else {
                false
            }
        });
        if !serving {
            return Err(ServerError::Stopped);
        }

        info!("Registration RPC server listening on {}", local_addr);

        let service = self.service.clone();
        let handler = move |req: Request<Incoming>| {
            let service = service.clone();
            async move { service.handle(req).await }
        };
        serve_connections(listener, handler, self.shutdown.subscribe()).await;

        self.state.send_replace(ServerState::Stopped);
        info!("Registration RPC server on {} stopped", local_addr);
        Ok(())
    }

    /// Ask the server to stop. A server that never ran goes straight to
    /// `Stopped`.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
        self.state.send_if_modified(|state| {
            if *state == ServerState::Created {
                *state = ServerState::Stopped;
                true
            } else {
                false
            }
        });
    }

    /// Wait until the server is serving; `None` if it stopped first
    pub async fn serving_addr(&self) -> Option<SocketAddr> {
        let mut state = self.state.subscribe();
        loop {
            match *state.borrow_and_update() {
                ServerState::Serving(addr) => return Some(addr),
                ServerState::Stopped => return None,
                ServerState::Created => {}
            }
            if state.changed().await.is_err() {
                return None;
            }
        }
    }
}
