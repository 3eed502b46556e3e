//! Client-side mapping of the daemon's shared media buffer

use std::os::fd::{AsRawFd, OwnedFd};
use std::ptr::NonNull;
use std::sync::Arc;

use playout_protocol::messages::{GetSharedMemoryRequest, GetSharedMemoryResponse};
use playout_protocol::Method;
use tracing::info;

use crate::error::{ClientError, Result};
use crate::rpc::ClientChannel;

enum Backing {
    Mapped { fd: OwnedFd },
    #[cfg(test)]
    Heap { _storage: Box<[u8]> },
}

/// Read/write view of the daemon's media buffer.
pub struct SharedMemoryClient {
    base: NonNull<u8>,
    len: u32,
    backing: Backing,
}

// Safety: the mapping is fixed for the client's lifetime; writers agree
// on disjoint windows through the need-data protocol.
unsafe impl Send for SharedMemoryClient {}
unsafe impl Sync for SharedMemoryClient {}

impl SharedMemoryClient {
    /// Requests the descriptor from the daemon and maps the region.
    pub fn fetch(channel: &Arc<ClientChannel>) -> Result<Self> {
        let reply = channel.call(Method::GetSharedMemory, &GetSharedMemoryRequest {})?;
        let response: GetSharedMemoryResponse = reply.decode_payload()?;
        let fd = channel
            .take_shared_memory_fd()
            .ok_or_else(|| ClientError::SharedMemory("no descriptor received".to_string()))?;
        Self::map(fd, response.size)
    }

    /// Maps an already received descriptor.
    pub fn map(fd: OwnedFd, size: u32) -> Result<Self> {
        // Safety: mapping a descriptor we own for its announced size; the
        // mapping is released in Drop.
        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size as usize,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd.as_raw_fd(),
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(ClientError::SharedMemory(format!(
                "mmap of {size} bytes failed: {}",
                std::io::Error::last_os_error()
            )));
        }
        let base = NonNull::new(base.cast::<u8>())
            .ok_or_else(|| ClientError::SharedMemory("mmap returned null".to_string()))?;
        info!("Mapped {} bytes of shared media buffer", size);
        Ok(Self { base, len: size, backing: Backing::Mapped { fd } })
    }

    /// Heap-backed region for tests.
    #[cfg(test)]
    pub(crate) fn for_tests(size: u32) -> Self {
        let mut storage = vec![0u8; size as usize].into_boxed_slice();
        let base = NonNull::new(storage.as_mut_ptr()).unwrap();
        Self { base, len: size, backing: Backing::Heap { _storage: storage } }
    }

    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for SharedMemoryClient {
    fn drop(&mut self) {
        if let Backing::Mapped { .. } = self.backing {
            // Safety: base/len describe the mapping created in map().
            unsafe {
                libc::munmap(self.base.as_ptr().cast(), self.len as usize);
            }
        }
    }
}
