// TCP listener and supervisor
// Accepts device sockets, spawns one session task each, owns shutdown

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::connection::Connection;
use super::session::{DeviceSession, SessionSettings};
use crate::store::StoreGateway;

/// TCP server that accepts and supervises device connections.
pub struct TcpServer {
    addr: SocketAddr,
    cancel: CancellationToken,
    accept_task: JoinHandle<()>,
}

impl TcpServer {
    /// Bind and start accepting. Every accepted socket gets its own
    /// session task holding a reference to the store gateway.
    pub async fn start(
        addr: SocketAddr,
        store: Arc<dyn StoreGateway>,
        settings: SessionSettings,
        shutdown: CancellationToken,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let cancel = shutdown.child_token();
        let task_cancel = cancel.clone();

        let accept_task = tokio::spawn(async move {
            let mut sessions = JoinSet::new();
            loop {
                tokio::select! {
                    result = listener.accept() => match result {
                        Ok((stream, peer_addr)) => {
                            debug!(peer = %peer_addr, "device connected");
                            let connection = Connection::new(stream, peer_addr);
                            let mut session = DeviceSession::new(
                                connection,
                                store.clone(),
                                settings.clone(),
                                task_cancel.clone(),
                            );
                            sessions.spawn(async move {
                                if let Err(e) = session.run().await {
                                    warn!(peer = %peer_addr, error = %e, "session error");
                                }
                            });
                        }
                        Err(e) => warn!(error = %e, "accept error"),
                    },
                    // Reap finished sessions so the set stays small.
                    Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
                    _ = task_cancel.cancelled() => break,
                }
            }
            // Stopped accepting; drain live sessions. Each observes the
            // cancellation token at its next suspension point.
            while sessions.join_next().await.is_some() {}
        });

        info!("device listener on {} (TCP)", local_addr);

        Ok(TcpServer {
            addr: local_addr,
            cancel,
            accept_task,
        })
    }

    /// Get the address the server is listening on
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting, signal every live session, and wait up to
    /// `drain` for them to finish before giving up.
    pub async fn shutdown(self, drain: Duration) {
        self.cancel.cancel();
        if time::timeout(drain, self.accept_task).await.is_err() {
            warn!(addr = %self.addr, "drain budget exceeded, forcing close");
        }
    }
}
