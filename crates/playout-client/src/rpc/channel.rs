//! The multiplexed client ↔ server channel
//!
//! One unix-socket connection carries every call, reply and event for
//! this process. Calls block the caller until the reply lands (or the
//! channel dies); a dedicated reader thread routes replies to waiting
//! callers and fans events out to subscribers. Before each outbound call
//! the channel reattaches itself if the previous connection dropped.

use std::collections::HashMap;
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, Sender, SyncSender};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;

use playout_protocol::envelope::{read_frame, write_frame};
use playout_protocol::{fdpass, Frame, FrameKind, Method, ReplyStatus};
use tracing::{debug, info, warn};

use crate::error::{ClientError, Result};

type PendingMap = Arc<Mutex<HashMap<u32, SyncSender<Frame>>>>;
type SubscriberMap = Arc<Mutex<HashMap<u64, Sender<Frame>>>>;

pub struct ClientChannel {
    socket_path: PathBuf,
    /// Writer half; `None` while disconnected.
    writer: Mutex<Option<UnixStream>>,
    connected: Arc<AtomicBool>,
    pending: PendingMap,
    subscribers: SubscriberMap,
    next_correlation: AtomicU32,
    next_subscriber: AtomicU64,
    /// Descriptor captured by the reader thread after a
    /// `GetSharedMemory` reply.
    shared_memory_fd: Arc<Mutex<Option<OwnedFd>>>,
}

impl ClientChannel {
    /// Connects to the daemon socket.
    pub fn connect(socket_path: impl AsRef<Path>) -> Result<Arc<Self>> {
        let channel = Arc::new(Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            writer: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            next_correlation: AtomicU32::new(1),
            next_subscriber: AtomicU64::new(1),
            shared_memory_fd: Arc::new(Mutex::new(None)),
        });
        channel.attach()?;
        Ok(channel)
    }

    fn attach(&self) -> Result<()> {
        let stream = UnixStream::connect(&self.socket_path)?;
        let reader = stream.try_clone()?;
        *self.writer.lock().unwrap() = Some(stream);
        self.connected.store(true, Ordering::SeqCst);
        info!("Channel attached to {}", self.socket_path.display());

        let connected = self.connected.clone();
        let pending = self.pending.clone();
        let subscribers = self.subscribers.clone();
        let shared_memory_fd = self.shared_memory_fd.clone();
        thread::Builder::new()
            .name("playout-channel-reader".into())
            .spawn(move || {
                reader_loop(reader, &pending, &subscribers, &shared_memory_fd);
                connected.store(false, Ordering::SeqCst);
                // Waiters see a closed reply channel instead of a hang.
                pending.lock().unwrap().clear();
                debug!("Channel reader finished");
            })
            .map_err(ClientError::Io)?;
        Ok(())
    }

    /// Reattaches a dropped channel; called before every outbound call.
    pub fn reattach_if_required(&self) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        warn!("Channel down, attempting reattach");
        self.attach().map_err(|_| ClientError::Disconnected)
    }

    /// Issues a call and blocks until its reply arrives. Protocol-level
    /// failures come back as errors carrying the server's message.
    pub fn call(&self, method: Method, payload: &impl prost::Message) -> Result<Frame> {
        self.reattach_if_required()?;

        let correlation_id = self.next_correlation.fetch_add(1, Ordering::SeqCst);
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        self.pending.lock().unwrap().insert(correlation_id, reply_tx);

        {
            let mut writer = self.writer.lock().unwrap();
            let Some(stream) = writer.as_mut() else {
                self.pending.lock().unwrap().remove(&correlation_id);
                return Err(ClientError::Disconnected);
            };
            if let Err(err) = write_frame(stream, &Frame::call(correlation_id, method, payload)) {
                self.pending.lock().unwrap().remove(&correlation_id);
                self.connected.store(false, Ordering::SeqCst);
                warn!("Write of {:?} call failed: {}", method, err);
                return Err(ClientError::Disconnected);
            }
        }

        let reply = reply_rx.recv().map_err(|_| ClientError::Disconnected)?;
        match reply.reply_status() {
            ReplyStatus::Ok => Ok(reply),
            ReplyStatus::BadSession => Err(ClientError::BadSession(reply.error_message.clone())),
            _ => Err(ClientError::CallFailed(reply.error_message.clone())),
        }
    }

    /// Registers an event subscriber; frames arrive in server emission
    /// order. Dropping the subscription closes the receiver.
    pub fn subscribe_events(&self) -> (u64, Receiver<Frame>) {
        let (tx, rx) = mpsc::channel();
        let id = self.next_subscriber.fetch_add(1, Ordering::SeqCst);
        self.subscribers.lock().unwrap().insert(id, tx);
        (id, rx)
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().unwrap().remove(&id);
    }

    /// The descriptor received with the last `GetSharedMemory` reply.
    pub fn take_shared_memory_fd(&self) -> Option<OwnedFd> {
        self.shared_memory_fd.lock().unwrap().take()
    }
}

fn reader_loop(
    stream: UnixStream,
    pending: &PendingMap,
    subscribers: &SubscriberMap,
    shared_memory_fd: &Mutex<Option<OwnedFd>>,
) {
    let mut reader = stream;
    loop {
        let frame = match read_frame(&mut reader) {
            Ok(frame) => frame,
            Err(err) => {
                debug!("Channel read finished: {}", err);
                return;
            }
        };
        match frame.kind() {
            FrameKind::Reply => {
                // The shared-memory descriptor rides right behind its
                // reply; pick it up before anything else reads bytes.
                if frame.method() == Method::GetSharedMemory
                    && frame.reply_status() == ReplyStatus::Ok
                {
                    match fdpass::recv_fd(reader.as_raw_fd()) {
                        Ok(fd) => *shared_memory_fd.lock().unwrap() = Some(fd),
                        Err(err) => {
                            warn!("Reply had no shared memory descriptor: {}", err);
                            return;
                        }
                    }
                }
                let waiter = pending.lock().unwrap().remove(&frame.correlation_id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(frame);
                    }
                    None => warn!("Reply for unknown call {}", frame.correlation_id),
                }
            }
            FrameKind::Event => {
                let subscribers = subscribers.lock().unwrap();
                for tx in subscribers.values() {
                    let _ = tx.send(frame.clone());
                }
            }
            other => warn!("Ignoring unexpected {:?} frame from server", other),
        }
    }
}
