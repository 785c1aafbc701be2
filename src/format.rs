//! Negotiated track format descriptions.
//!
//! A [`TrackFormat`] describes one elementary stream after its encoder has
//! settled on concrete parameters. The core never negotiates formats
//! itself; a transform collaborator reports the format it ended up with,
//! and the sink collaborator receives it verbatim when the track is
//! registered.

/// Kind of media carried by a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    /// Audio samples.
    Audio,
    /// Video frames.
    Video,
}

impl MediaKind {
    /// Returns the name of this media kind.
    pub fn name(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

/// A negotiated elementary-stream format.
///
/// Opaque to the scheduling core: it is produced by a transform
/// collaborator, handed downstream through a
/// [`OneShotCell`](crate::future::OneShotCell), and consumed by the sink
/// collaborator when a track is registered.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackFormat {
    /// Media kind of the track.
    pub media: MediaKind,
    /// Codec name, MIME style (e.g. `audio/mp4a-latm`).
    pub codec: String,
    /// Sample rate in Hz (audio).
    pub sample_rate: u32,
    /// Channel count (audio).
    pub channels: u16,
    /// Target bit rate in bits per second.
    pub bit_rate: u32,
    /// Frame width in pixels (video).
    pub width: u32,
    /// Frame height in pixels (video).
    pub height: u32,
    /// Codec-specific configuration bytes, if the codec produced any.
    pub codec_data: Vec<u8>,
}

impl TrackFormat {
    /// Create an audio track format.
    pub fn audio(codec: impl Into<String>, sample_rate: u32, channels: u16, bit_rate: u32) -> Self {
        Self {
            media: MediaKind::Audio,
            codec: codec.into(),
            sample_rate,
            channels,
            bit_rate,
            width: 0,
            height: 0,
            codec_data: Vec::new(),
        }
    }

    /// Create a video track format.
    pub fn video(codec: impl Into<String>, width: u32, height: u32, bit_rate: u32) -> Self {
        Self {
            media: MediaKind::Video,
            codec: codec.into(),
            sample_rate: 0,
            channels: 0,
            bit_rate,
            width,
            height,
            codec_data: Vec::new(),
        }
    }

    /// Create an AAC-LC audio format, the usual choice for recorded audio.
    pub fn aac(sample_rate: u32, channels: u16, bit_rate: u32) -> Self {
        Self::audio("audio/mp4a-latm", sample_rate, channels, bit_rate)
    }

    /// Attach codec-specific configuration bytes.
    pub fn with_codec_data(mut self, data: Vec<u8>) -> Self {
        self.codec_data = data;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aac_format() {
        let fmt = TrackFormat::aac(44_100, 2, 128_000);
        assert_eq!(fmt.media, MediaKind::Audio);
        assert_eq!(fmt.codec, "audio/mp4a-latm");
        assert_eq!(fmt.sample_rate, 44_100);
        assert_eq!(fmt.channels, 2);
    }

    #[test]
    fn test_video_format() {
        let fmt = TrackFormat::video("video/avc", 1920, 1080, 4_000_000).with_codec_data(vec![1, 2]);
        assert_eq!(fmt.media, MediaKind::Video);
        assert_eq!(fmt.width, 1920);
        assert_eq!(fmt.codec_data, vec![1, 2]);
    }
}
