//! Session management server
//!
//! Listens on the daemon's unix socket, accepts client connections and
//! hands each one to a [`connection::ClientConnection`] task. Clients are
//! tracked by a connection id so their sessions and media keys can be
//! reaped on disconnect.

pub(crate) mod connection;

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::UnixListener;
use tracing::{info, warn};

use crate::cdm::CdmService;
use crate::error::Result;
use crate::service::ServiceHandle;
use crate::shm::SharedMemoryBuffer;

use connection::ClientConnection;

pub struct SessionManagementServer {
    listener: UnixListener,
    playback: ServiceHandle,
    cdm: Arc<CdmService>,
    shm: Arc<SharedMemoryBuffer>,
    next_client_id: AtomicU64,
}

impl SessionManagementServer {
    /// Binds the socket, replacing a stale one left by a previous run.
    pub fn bind(
        socket_path: &Path,
        playback: ServiceHandle,
        cdm: Arc<CdmService>,
        shm: Arc<SharedMemoryBuffer>,
    ) -> Result<Self> {
        if socket_path.exists() {
            std::fs::remove_file(socket_path)?;
        }
        let listener = UnixListener::bind(socket_path)?;
        info!("Listening on {}", socket_path.display());
        Ok(Self { listener, playback, cdm, shm, next_client_id: AtomicU64::new(1) })
    }

    /// Accept loop; runs until the task is cancelled.
    pub async fn run(&self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    let client_id = self.next_client_id.fetch_add(1, Ordering::SeqCst);
                    info!("Client {} connected", client_id);
                    let playback = self.playback.clone();
                    let cdm = self.cdm.clone();
                    let shm_fd = self.shm.fd();
                    let shm_size = self.shm.size();
                    tokio::spawn(async move {
                        ClientConnection::run(client_id, stream, playback, cdm, shm_fd, shm_size)
                            .await;
                    });
                }
                Err(err) => {
                    warn!("Accept failed: {}", err);
                }
            }
        }
    }
}
