//! Partitioned shared-memory media buffer
//!
//! One anonymous memfd holds `max_playbacks` partitions laid out
//! back to back, each split into an audio and a video sub-region (audio
//! first, audio smaller by policy). The descriptor is created once and
//! never changes for the lifetime of the buffer; clients map it read/write
//! and write sample payloads at offsets agreed per need-data request.
//!
//! Partition table mutation is serialized by one mutex. Reads of a mapped
//! partition go lock free: sub-region bounds cannot move while the
//! partition stays mapped.

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr::NonNull;
use std::sync::Mutex;

use playout_common::{MediaSourceType, SessionId};
use tracing::{debug, warn};

use crate::error::ShmError;

/// Result alias local to the shared memory buffer.
pub type Result<T> = std::result::Result<T, ShmError>;

/// Server-side owner of the shared media buffer.
pub struct SharedMemoryBuffer {
    fd: OwnedFd,
    len: u32,
    base: NonNull<u8>,
    audio_len: u32,
    video_len: u32,
    /// Slot index → session occupying it.
    partitions: Mutex<Vec<Option<SessionId>>>,
}

// Safety: the mapping is fixed for the lifetime of the buffer and all
// range computations go through the mutex-guarded partition table or
// bounds-checked accessors.
unsafe impl Send for SharedMemoryBuffer {}
unsafe impl Sync for SharedMemoryBuffer {}

impl SharedMemoryBuffer {
    /// Creates the memfd and maps it into this process.
    pub fn new(max_playbacks: u32, audio_len: u32, video_len: u32) -> Result<Self> {
        let partition_len = audio_len
            .checked_add(video_len)
            .ok_or(ShmError::TooLarge(audio_len as u64 + video_len as u64))?;
        let len = partition_len.checked_mul(max_playbacks).ok_or(ShmError::TooLarge(
            partition_len as u64 * max_playbacks as u64,
        ))?;

        // Safety: memfd_create takes a static name and flag word.
        let raw = unsafe { libc::memfd_create(c"playout-media-buffer".as_ptr(), libc::MFD_CLOEXEC) };
        if raw < 0 {
            return Err(ShmError::Create(std::io::Error::last_os_error()));
        }
        // Safety: raw is a fresh descriptor owned from here on.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        // Safety: the descriptor is valid and len is the intended size.
        if unsafe { libc::ftruncate(fd.as_raw_fd(), len as libc::off_t) } < 0 {
            return Err(ShmError::Resize { size: len, source: std::io::Error::last_os_error() });
        }

        // Safety: mapping a valid fd for its full length; the mapping is
        // released in Drop.
        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len as usize,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd.as_raw_fd(),
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(ShmError::Map(std::io::Error::last_os_error()));
        }
        let base = NonNull::new(base.cast::<u8>()).ok_or_else(|| {
            ShmError::Map(std::io::Error::new(std::io::ErrorKind::Other, "mmap returned null"))
        })?;

        debug!(
            "Shared media buffer created: {} partitions of {} bytes ({} audio / {} video)",
            max_playbacks, partition_len, audio_len, video_len
        );

        Ok(Self {
            fd,
            len,
            base,
            audio_len,
            video_len,
            partitions: Mutex::new(vec![None; max_playbacks as usize]),
        })
    }

    /// Assigns a free partition to `session_id`. Idempotent for an already
    /// mapped session; fails when every slot is taken.
    pub fn map_partition(&self, session_id: SessionId) -> Result<()> {
        let mut partitions = self.partitions.lock().unwrap();
        if partitions.iter().any(|slot| *slot == Some(session_id)) {
            return Ok(());
        }
        match partitions.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                *slot = Some(session_id);
                Ok(())
            }
            None => Err(ShmError::NoFreePartition),
        }
    }

    /// Returns the session's partition to the free pool and zero-fills it.
    pub fn unmap_partition(&self, session_id: SessionId) -> Result<()> {
        let mut partitions = self.partitions.lock().unwrap();
        let index = partitions
            .iter()
            .position(|slot| *slot == Some(session_id))
            .ok_or(ShmError::NotMapped(session_id.0))?;
        partitions[index] = None;

        let offset = index as u32 * self.partition_len();
        // Safety: the partition range is inside the mapping and no reader
        // holds offsets into it once the slot is cleared.
        unsafe {
            std::ptr::write_bytes(
                self.base.as_ptr().add(offset as usize),
                0,
                self.partition_len() as usize,
            );
        }
        Ok(())
    }

    /// Byte offset of the session's sub-region for `source_type`, from the
    /// start of the mapping. Stable while the partition stays mapped.
    pub fn data_offset(&self, session_id: SessionId, source_type: MediaSourceType) -> Result<u32> {
        let index = self.partition_index(session_id)?;
        let partition_offset = index as u32 * self.partition_len();
        match source_type {
            MediaSourceType::Audio => Ok(partition_offset),
            MediaSourceType::Video => Ok(partition_offset + self.audio_len),
            MediaSourceType::Unknown => Err(ShmError::NotMapped(session_id.0)),
        }
    }

    /// Capacity of the session's sub-region for `source_type`.
    pub fn max_data_len(&self, session_id: SessionId, source_type: MediaSourceType) -> Result<u32> {
        self.partition_index(session_id)?;
        match source_type {
            MediaSourceType::Audio => Ok(self.audio_len),
            MediaSourceType::Video => Ok(self.video_len),
            MediaSourceType::Unknown => Err(ShmError::NotMapped(session_id.0)),
        }
    }

    /// Zero-fills the session's sub-region for `source_type`.
    pub fn clear_data(&self, session_id: SessionId, source_type: MediaSourceType) -> Result<()> {
        let offset = self.data_offset(session_id, source_type)?;
        let len = self.max_data_len(session_id, source_type)?;
        // Safety: offset/len describe a sub-region of the mapping held
        // alive by &self.
        unsafe {
            std::ptr::write_bytes(self.base.as_ptr().add(offset as usize), 0, len as usize);
        }
        Ok(())
    }

    /// Copies `len` bytes starting at the absolute `offset` out of the
    /// session's partition. The range must stay inside that partition.
    pub fn copy_out(&self, session_id: SessionId, offset: u32, len: u32) -> Result<Vec<u8>> {
        let index = self.partition_index(session_id)?;
        let start = index as u32 * self.partition_len();
        let end = start + self.partition_len();
        let range_end = offset.checked_add(len).ok_or(ShmError::OutOfBounds { offset, len })?;
        if offset < start || range_end > end {
            warn!(
                "Rejecting shared memory read [{}, {}) outside partition [{}, {}) of session {}",
                offset, range_end, start, end, session_id
            );
            return Err(ShmError::OutOfBounds { offset, len });
        }
        let mut out = vec![0u8; len as usize];
        // Safety: the range was validated against the session partition.
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.base.as_ptr().add(offset as usize),
                out.as_mut_ptr(),
                len as usize,
            );
        }
        Ok(out)
    }

    /// The descriptor shared with clients. Immutable for the buffer's
    /// lifetime.
    pub fn fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// Total size of the region in bytes.
    pub fn size(&self) -> u32 {
        self.len
    }

    #[cfg(test)]
    pub(crate) fn base_ptr_for_tests(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    fn partition_len(&self) -> u32 {
        self.audio_len + self.video_len
    }

    fn partition_index(&self, session_id: SessionId) -> Result<usize> {
        self.partitions
            .lock()
            .unwrap()
            .iter()
            .position(|slot| *slot == Some(session_id))
            .ok_or(ShmError::NotMapped(session_id.0))
    }
}

impl Drop for SharedMemoryBuffer {
    fn drop(&mut self) {
        // Safety: base/len describe the mapping created in new().
        unsafe {
            libc::munmap(self.base.as_ptr().cast(), self.len as usize);
        }
    }
}
