//! Frame writer: lays segments out in a need-data window
//!
//! One writer exists per need-data request, created lazily on the first
//! `addSegment`. Payloads are appended in the media region, one metadata
//! record per frame in the metadata region; both are bounded by the
//! window the server granted.

use std::ptr::NonNull;

use bytes::BytesMut;
use playout_common::frame::FrameRecord;
use playout_common::{AddSegmentStatus, MediaSegment, ShmInfo};
use tracing::warn;

pub struct FrameWriter {
    base: NonNull<u8>,
    region_len: u32,
    shm_info: ShmInfo,
    metadata_used: u32,
    media_used: u32,
    frames: u32,
}

// Safety: the writer only touches the window named by shm_info, which
// the server keeps reserved until the request is answered.
unsafe impl Send for FrameWriter {}

impl FrameWriter {
    pub fn new(base: NonNull<u8>, region_len: u32, shm_info: ShmInfo) -> Self {
        Self { base, region_len, shm_info, metadata_used: 0, media_used: 0, frames: 0 }
    }

    /// Frames written so far; reported back on `haveData`.
    pub fn num_frames(&self) -> u32 {
        self.frames
    }

    pub fn write_frame(&mut self, segment: &MediaSegment) -> AddSegmentStatus {
        let data_len = segment.data.len() as u32;
        let data_offset = self.shm_info.media_data_offset + self.media_used;
        let record = FrameRecord::for_segment(segment, data_offset);
        let record_len = record.encoded_len() as u32;

        if self.metadata_used + record_len > self.shm_info.max_metadata_bytes
            || self.media_used + data_len > self.shm_info.max_media_bytes
        {
            return AddSegmentStatus::NoSpace;
        }

        let metadata_offset = self.shm_info.metadata_offset + self.metadata_used;
        let metadata_end = metadata_offset as u64 + record_len as u64;
        let data_end = data_offset as u64 + data_len as u64;
        if metadata_end > self.region_len as u64 || data_end > self.region_len as u64 {
            warn!("Need-data window exceeds the mapped region");
            return AddSegmentStatus::Error;
        }

        let mut encoded = BytesMut::with_capacity(record.encoded_len());
        record.encode(&mut encoded);

        // Safety: both ranges were bounds-checked against the mapping
        // and the granted window above.
        unsafe {
            std::ptr::copy_nonoverlapping(
                segment.data.as_ptr(),
                self.base.as_ptr().add(data_offset as usize),
                data_len as usize,
            );
            std::ptr::copy_nonoverlapping(
                encoded.as_ptr(),
                self.base.as_ptr().add(metadata_offset as usize),
                encoded.len(),
            );
        }

        self.media_used += data_len;
        self.metadata_used += record_len;
        self.frames += 1;
        AddSegmentStatus::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use playout_common::frame;

    fn window(region: &mut [u8]) -> (NonNull<u8>, ShmInfo) {
        let base = NonNull::new(region.as_mut_ptr()).unwrap();
        let info = ShmInfo {
            max_metadata_bytes: 256,
            metadata_offset: 0,
            media_data_offset: 256,
            max_media_bytes: region.len() as u32 - 256,
        };
        (base, info)
    }

    fn audio_segment(payload: &'static [u8]) -> MediaSegment {
        MediaSegment::new_audio(0, 21_333_000, 48_000, 2, Bytes::from_static(payload))
    }

    #[test]
    fn written_frames_read_back_as_records() {
        let mut region = vec![0u8; 4096];
        let (base, info) = window(&mut region);
        let mut writer = FrameWriter::new(base, 4096, info);

        assert_eq!(writer.write_frame(&audio_segment(b"one")), AddSegmentStatus::Ok);
        assert_eq!(writer.write_frame(&audio_segment(b"twoo")), AddSegmentStatus::Ok);
        assert_eq!(writer.num_frames(), 2);

        let records = frame::read_records(&region[..256], 2).unwrap();
        assert_eq!(records[0].data_len, 3);
        assert_eq!(records[1].data_len, 4);
        let second = &region[records[1].data_offset as usize..][..4];
        assert_eq!(second, b"twoo");
    }

    #[test]
    fn media_exhaustion_reports_no_space() {
        let mut region = vec![0u8; 512];
        let base = NonNull::new(region.as_mut_ptr()).unwrap();
        let info = ShmInfo {
            max_metadata_bytes: 128,
            metadata_offset: 0,
            media_data_offset: 128,
            max_media_bytes: 8,
        };
        let mut writer = FrameWriter::new(base, 512, info);

        assert_eq!(writer.write_frame(&audio_segment(b"12345")), AddSegmentStatus::Ok);
        assert_eq!(writer.write_frame(&audio_segment(b"6789a")), AddSegmentStatus::NoSpace);
        assert_eq!(writer.num_frames(), 1);
    }

    #[test]
    fn metadata_exhaustion_reports_no_space() {
        let mut region = vec![0u8; 4096];
        let base = NonNull::new(region.as_mut_ptr()).unwrap();
        let info = ShmInfo {
            max_metadata_bytes: 70,
            metadata_offset: 0,
            media_data_offset: 70,
            max_media_bytes: 1024,
        };
        let mut writer = FrameWriter::new(base, 4096, info);

        assert_eq!(writer.write_frame(&audio_segment(b"x")), AddSegmentStatus::Ok);
        assert_eq!(writer.write_frame(&audio_segment(b"y")), AddSegmentStatus::NoSpace);
    }

    #[test]
    fn window_outside_the_region_is_an_error() {
        let mut region = vec![0u8; 128];
        let base = NonNull::new(region.as_mut_ptr()).unwrap();
        let info = ShmInfo {
            max_metadata_bytes: 64,
            metadata_offset: 0,
            media_data_offset: 4096,
            max_media_bytes: 1024,
        };
        let mut writer = FrameWriter::new(base, 128, info);
        assert_eq!(writer.write_frame(&audio_segment(b"x")), AddSegmentStatus::Error);
    }
}
