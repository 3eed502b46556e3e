//! Per-session worker thread
//!
//! A single-consumer FIFO of player tasks serviced by one dedicated
//! thread. All `PlayerContext` mutation and all pipeline calls (other
//! than documented read-only getters) happen here. Shutdown is
//! cooperative: a terminal task breaks the loop and the owner joins.

use std::sync::mpsc::{Receiver, Sender};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use super::inner::PlayerInner;
use super::tasks::PlayerTask;
use crate::error::PlayerError;

pub(crate) struct WorkerThread {
    tx: Sender<PlayerTask>,
    handle: Option<JoinHandle<()>>,
}

impl WorkerThread {
    pub fn spawn(session_id: i32, mut inner: PlayerInner, tx: Sender<PlayerTask>, rx: Receiver<PlayerTask>) -> Self {
        let handle = thread::Builder::new()
            .name(format!("playout-worker-{session_id}"))
            .spawn(move || {
                debug!("Worker thread started");
                while let Ok(task) = rx.recv() {
                    if matches!(task, PlayerTask::Shutdown) {
                        break;
                    }
                    inner.execute(task);
                }
                inner.shutdown();
                debug!("Worker thread finished");
            })
            .expect("spawning the session worker thread");
        Self { tx, handle: Some(handle) }
    }

    /// Enqueues a task; order of execution is submission order.
    pub fn post(&self, task: PlayerTask) -> Result<(), PlayerError> {
        self.tx.send(task).map_err(|_| PlayerError::WorkerGone)
    }

    /// Posts the terminal task and joins the thread.
    pub fn shutdown(&mut self) {
        if self.tx.send(PlayerTask::Shutdown).is_err() {
            warn!("Worker already gone at shutdown");
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}
