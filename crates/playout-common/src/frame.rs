//! Shared-memory frame record layout
//!
//! A need-data request is answered by writing frame payloads into the
//! request's media region and one metadata record per frame into its
//! metadata region. Both sides of the boundary use this module: the client
//! frame writer encodes records, the server data reader decodes them.
//!
//! Records are variable length, little endian, and self-delimiting: a
//! `u32` byte count followed by the fields of [`FrameRecord`]. Offsets
//! stored in a record are absolute within the shared memory mapping.

use bytes::{Buf, BufMut};

use crate::error::{Error, Result};
use crate::types::{MediaSegment, MediaSourceType, SubSamplePair};

const SOURCE_AUDIO: u8 = 1;
const SOURCE_VIDEO: u8 = 2;

/// Decoded metadata of one frame in shared memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRecord {
    pub source_type: MediaSourceType,
    pub timestamp_ns: i64,
    pub duration_ns: i64,
    pub sample_rate: u32,
    pub channels: u32,
    pub width: u32,
    pub height: u32,
    /// Absolute offset of the payload within the shared memory mapping.
    pub data_offset: u32,
    pub data_len: u32,
    pub encrypted: bool,
    pub media_key_session_id: i32,
    pub key_id: Vec<u8>,
    pub init_vector: Vec<u8>,
    pub sub_samples: Vec<SubSamplePair>,
    pub init_with_last_15: u32,
}

impl FrameRecord {
    /// Builds the record for `segment`, pointing at payload bytes already
    /// placed at `data_offset`.
    pub fn for_segment(segment: &MediaSegment, data_offset: u32) -> Self {
        Self {
            source_type: segment.source_type,
            timestamp_ns: segment.timestamp_ns,
            duration_ns: segment.duration_ns,
            sample_rate: segment.sample_rate,
            channels: segment.channels,
            width: segment.width,
            height: segment.height,
            data_offset,
            data_len: segment.data.len() as u32,
            encrypted: segment.encrypted,
            media_key_session_id: segment.media_key_session_id,
            key_id: segment.key_id.clone(),
            init_vector: segment.init_vector.clone(),
            sub_samples: segment.sub_samples.clone(),
            init_with_last_15: segment.init_with_last_15,
        }
    }

    /// Encoded size including the leading length field.
    pub fn encoded_len(&self) -> usize {
        4 + self.body_len()
    }

    fn body_len(&self) -> usize {
        // type + timing + four dimension fields + offset/len + encryption
        // header + three length-prefixed variable sections.
        1 + 8 + 8 + 4 * 4 + 4 + 4 + 1 + 4 + 4
            + 2 + self.key_id.len()
            + 2 + self.init_vector.len()
            + 2 + self.sub_samples.len() * 8
    }

    /// Appends the record to `buf`. The caller has checked capacity via
    /// [`Self::encoded_len`]; `BufMut` growth is unbounded here.
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.body_len() as u32);
        buf.put_u8(match self.source_type {
            MediaSourceType::Audio => SOURCE_AUDIO,
            MediaSourceType::Video => SOURCE_VIDEO,
            MediaSourceType::Unknown => 0,
        });
        buf.put_i64_le(self.timestamp_ns);
        buf.put_i64_le(self.duration_ns);
        buf.put_u32_le(self.sample_rate);
        buf.put_u32_le(self.channels);
        buf.put_u32_le(self.width);
        buf.put_u32_le(self.height);
        buf.put_u32_le(self.data_offset);
        buf.put_u32_le(self.data_len);
        buf.put_u8(u8::from(self.encrypted));
        buf.put_i32_le(self.media_key_session_id);
        buf.put_u32_le(self.init_with_last_15);
        buf.put_u16_le(self.key_id.len() as u16);
        buf.put_slice(&self.key_id);
        buf.put_u16_le(self.init_vector.len() as u16);
        buf.put_slice(&self.init_vector);
        buf.put_u16_le(self.sub_samples.len() as u16);
        for pair in &self.sub_samples {
            buf.put_u32_le(pair.clear_bytes);
            buf.put_u32_le(pair.encrypted_bytes);
        }
    }

    /// Decodes one record from the front of `buf`.
    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < 4 {
            return Err(Error::MalformedFrame("truncated length field".into()));
        }
        let body_len = buf.get_u32_le() as usize;
        if buf.remaining() < body_len {
            return Err(Error::MalformedFrame(format!(
                "record body claims {body_len} bytes, {} remaining",
                buf.remaining()
            )));
        }

        let source_type = match buf.get_u8() {
            SOURCE_AUDIO => MediaSourceType::Audio,
            SOURCE_VIDEO => MediaSourceType::Video,
            other => {
                return Err(Error::MalformedFrame(format!("unknown source type {other}")));
            }
        };
        let timestamp_ns = buf.get_i64_le();
        let duration_ns = buf.get_i64_le();
        let sample_rate = buf.get_u32_le();
        let channels = buf.get_u32_le();
        let width = buf.get_u32_le();
        let height = buf.get_u32_le();
        let data_offset = buf.get_u32_le();
        let data_len = buf.get_u32_le();
        let encrypted = buf.get_u8() != 0;
        let media_key_session_id = buf.get_i32_le();
        let init_with_last_15 = buf.get_u32_le();

        let key_id = take_section(buf, "key id")?;
        let init_vector = take_section(buf, "init vector")?;

        if buf.remaining() < 2 {
            return Err(Error::MalformedFrame("truncated subsample count".into()));
        }
        let sub_sample_count = buf.get_u16_le() as usize;
        if buf.remaining() < sub_sample_count * 8 {
            return Err(Error::MalformedFrame("truncated subsample table".into()));
        }
        let mut sub_samples = Vec::with_capacity(sub_sample_count);
        for _ in 0..sub_sample_count {
            sub_samples.push(SubSamplePair {
                clear_bytes: buf.get_u32_le(),
                encrypted_bytes: buf.get_u32_le(),
            });
        }

        Ok(Self {
            source_type,
            timestamp_ns,
            duration_ns,
            sample_rate,
            channels,
            width,
            height,
            data_offset,
            data_len,
            encrypted,
            media_key_session_id,
            key_id,
            init_vector,
            sub_samples,
            init_with_last_15,
        })
    }
}

fn take_section(buf: &mut impl Buf, what: &str) -> Result<Vec<u8>> {
    if buf.remaining() < 2 {
        return Err(Error::MalformedFrame(format!("truncated {what} length")));
    }
    let len = buf.get_u16_le() as usize;
    if buf.remaining() < len {
        return Err(Error::MalformedFrame(format!("truncated {what}")));
    }
    let mut section = vec![0u8; len];
    buf.copy_to_slice(&mut section);
    Ok(section)
}

/// Decodes `count` records from a metadata region.
pub fn read_records(metadata: &[u8], count: u32) -> Result<Vec<FrameRecord>> {
    let mut cursor = metadata;
    let mut records = Vec::with_capacity(count as usize);
    for _ in 0..count {
        records.push(FrameRecord::decode(&mut cursor)?);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{Bytes, BytesMut};

    fn encrypted_segment() -> MediaSegment {
        let mut segment =
            MediaSegment::new_video(90_000, 40_000_000, 1920, 1080, Bytes::from_static(b"payload"));
        segment.encrypted = true;
        segment.media_key_session_id = 42;
        segment.key_id = vec![0xaa, 0xbb];
        segment.init_vector = vec![1; 16];
        segment.sub_samples = vec![SubSamplePair { clear_bytes: 4, encrypted_bytes: 3 }];
        segment
    }

    #[test]
    fn record_roundtrip() {
        let segment = encrypted_segment();
        let record = FrameRecord::for_segment(&segment, 4096);

        let mut buf = BytesMut::new();
        record.encode(&mut buf);
        assert_eq!(buf.len(), record.encoded_len());

        let decoded = FrameRecord::decode(&mut buf.freeze()).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(decoded.data_len, 7);
        assert_eq!(decoded.data_offset, 4096);
    }

    #[test]
    fn read_records_walks_consecutive_entries() {
        let audio = MediaSegment::new_audio(0, 21_333_000, 48_000, 2, Bytes::from_static(b"aac"));
        let video = encrypted_segment();

        let mut buf = BytesMut::new();
        FrameRecord::for_segment(&audio, 100).encode(&mut buf);
        FrameRecord::for_segment(&video, 200).encode(&mut buf);

        let records = read_records(&buf, 2).unwrap();
        assert_eq!(records[0].source_type, MediaSourceType::Audio);
        assert_eq!(records[1].source_type, MediaSourceType::Video);
        assert_eq!(records[1].key_id, vec![0xaa, 0xbb]);
    }

    #[test]
    fn decode_rejects_truncated_record() {
        let segment = encrypted_segment();
        let mut buf = BytesMut::new();
        FrameRecord::for_segment(&segment, 0).encode(&mut buf);
        let truncated = &buf[..buf.len() - 3];
        assert!(FrameRecord::decode(&mut &truncated[..]).is_err());
    }
}
