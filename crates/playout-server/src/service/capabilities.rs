//! Pipeline capabilities exposed to clients

use playout_common::MediaSourceType;

const AUDIO_MIME_TYPES: &[&str] = &["audio/mp4", "audio/aac", "audio/x-eac3", "audio/x-opus"];
const VIDEO_MIME_TYPES: &[&str] =
    &["video/h264", "video/h265", "video/x-av1", "video/x-vp9"];

/// Answers the capabilities module from a static support table.
pub struct CapabilitiesService;

impl CapabilitiesService {
    pub fn supported_mime_types(&self, source_type: MediaSourceType) -> Vec<String> {
        let table = match source_type {
            MediaSourceType::Audio => AUDIO_MIME_TYPES,
            MediaSourceType::Video => VIDEO_MIME_TYPES,
            MediaSourceType::Unknown => return Vec::new(),
        };
        table.iter().map(|mime| mime.to_string()).collect()
    }

    pub fn is_mime_type_supported(&self, mime_type: &str) -> bool {
        AUDIO_MIME_TYPES.contains(&mime_type) || VIDEO_MIME_TYPES.contains(&mime_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_mime_types_are_supported() {
        let capabilities = CapabilitiesService;
        assert!(capabilities.is_mime_type_supported("video/h264"));
        assert!(capabilities.is_mime_type_supported("audio/mp4"));
        assert!(!capabilities.is_mime_type_supported("application/x-subrip"));
    }

    #[test]
    fn tables_are_split_by_source_type() {
        let capabilities = CapabilitiesService;
        let audio = capabilities.supported_mime_types(MediaSourceType::Audio);
        assert!(audio.contains(&"audio/x-eac3".to_string()));
        assert!(!audio.contains(&"video/h264".to_string()));
        assert!(capabilities.supported_mime_types(MediaSourceType::Unknown).is_empty());
    }
}
