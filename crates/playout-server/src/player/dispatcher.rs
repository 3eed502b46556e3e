//! Bus dispatcher thread
//!
//! Blocks on the pipeline bus and translates messages into worker tasks.
//! It never calls into the pipeline beyond popping messages; a posted
//! wakeup message makes it exit cleanly.

use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use super::backend::{BusMessage, BusWaker, BusWatch};
use super::tasks::PlayerTask;

pub(crate) struct DispatcherThread {
    waker: Arc<dyn BusWaker>,
    handle: Option<JoinHandle<()>>,
}

impl DispatcherThread {
    pub fn spawn(
        session_id: i32,
        mut bus: Box<dyn BusWatch>,
        waker: Arc<dyn BusWaker>,
        task_tx: Sender<PlayerTask>,
    ) -> Self {
        let handle = thread::Builder::new()
            .name(format!("playout-gst-bus-{session_id}"))
            .spawn(move || {
                debug!("Bus dispatcher started");
                loop {
                    let task = match bus.next_message() {
                        BusMessage::Wakeup => break,
                        BusMessage::StateChanged { old, new, pending } => {
                            PlayerTask::HandleBusStateChanged { old, new, pending }
                        }
                        BusMessage::Eos => PlayerTask::HandleBusEos,
                        BusMessage::Error { message } => PlayerTask::HandleBusError { message },
                        BusMessage::Warning { message } => {
                            warn!("Pipeline warning: {}", message);
                            continue;
                        }
                        BusMessage::Qos { source_type, info } => {
                            PlayerTask::HandleQos { source_type, info }
                        }
                    };
                    if task_tx.send(task).is_err() {
                        break;
                    }
                }
                debug!("Bus dispatcher finished");
            })
            .expect("spawning the bus dispatcher thread");
        Self { waker, handle: Some(handle) }
    }

    pub fn stop(&mut self) {
        self.waker.wake();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DispatcherThread {
    fn drop(&mut self) {
        self.stop();
    }
}
