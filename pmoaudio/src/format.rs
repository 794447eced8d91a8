//! Source codec identification and transcode targets.
//!
//! Codec detection prefers content sniffing (magic bytes) over the file
//! extension, so a mislabeled file is still classified correctly.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::AudioError;

/// Bytes read from the start of a file for magic-based detection.
pub const SNIFF_LEN: usize = 12;

/// Source codec of a library file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    Flac,
    Wav,
    Aiff,
    Mp3,
    Ogg,
    M4a,
}

impl AudioCodec {
    /// Identifies a codec from the leading bytes of a file.
    ///
    /// Short buffers are fine: a check only matches when enough bytes are
    /// present.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.len() >= 4 && &bytes[..4] == b"fLaC" {
            return Some(AudioCodec::Flac);
        }
        if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WAVE" {
            return Some(AudioCodec::Wav);
        }
        if bytes.len() >= 12
            && &bytes[..4] == b"FORM"
            && (&bytes[8..12] == b"AIFF" || &bytes[8..12] == b"AIFC")
        {
            return Some(AudioCodec::Aiff);
        }
        if bytes.len() >= 4 && &bytes[..4] == b"OggS" {
            return Some(AudioCodec::Ogg);
        }
        if bytes.len() >= 8 && &bytes[4..8] == b"ftyp" {
            return Some(AudioCodec::M4a);
        }
        if is_mp3(bytes) {
            return Some(AudioCodec::Mp3);
        }
        None
    }

    /// Identifies a codec from a lowercase-insensitive file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "flac" => Some(AudioCodec::Flac),
            "wav" | "wave" => Some(AudioCodec::Wav),
            "aiff" | "aif" | "aifc" => Some(AudioCodec::Aiff),
            "mp3" => Some(AudioCodec::Mp3),
            "ogg" | "oga" => Some(AudioCodec::Ogg),
            "m4a" | "mp4" => Some(AudioCodec::M4a),
            _ => None,
        }
    }

    /// Classifies a file on disk, sniffing content first and falling back to
    /// the extension.
    pub fn detect(path: &Path) -> Result<Self, AudioError> {
        let file = File::open(path)?;
        let mut header = Vec::with_capacity(SNIFF_LEN);
        file.take(SNIFF_LEN as u64).read_to_end(&mut header)?;

        if let Some(codec) = Self::sniff(&header) {
            return Ok(codec);
        }
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
            .ok_or_else(|| AudioError::UnknownFormat(path.display().to_string()))
    }
}

fn is_mp3(bytes: &[u8]) -> bool {
    if bytes.len() >= 3 && &bytes[..3] == b"ID3" {
        return true;
    }
    if bytes.len() >= 2 && bytes[0] == 0xFF && (bytes[1] & 0xE0) == 0xE0 {
        return true;
    }
    false
}

/// True when the file carries an extension the decoder stack can open.
pub fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .and_then(AudioCodec::from_extension)
        .is_some()
}

/// Transcode target container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetFormat {
    #[default]
    Flac,
    Wav,
    Aiff,
}

impl TargetFormat {
    /// Parses the short destination tag used in cache keys and URLs.
    pub fn from_desttype(tag: &str) -> Option<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "flac" => Some(TargetFormat::Flac),
            "wav" => Some(TargetFormat::Wav),
            "aiff" => Some(TargetFormat::Aiff),
            _ => None,
        }
    }

    /// Short tag identifying the target, part of cache keys and file names.
    pub fn desttype(&self) -> &'static str {
        match self {
            TargetFormat::Flac => "flac",
            TargetFormat::Wav => "wav",
            TargetFormat::Aiff => "aiff",
        }
    }

    pub fn extension(&self) -> &'static str {
        self.desttype()
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            TargetFormat::Flac => "audio/flac",
            TargetFormat::Wav => "audio/wav",
            TargetFormat::Aiff => "audio/aiff",
        }
    }

    /// The source codec a passthrough of this target would match.
    pub fn source_codec(&self) -> AudioCodec {
        match self {
            TargetFormat::Flac => AudioCodec::Flac,
            TargetFormat::Wav => AudioCodec::Wav,
            TargetFormat::Aiff => AudioCodec::Aiff,
        }
    }

    /// Container header size used by size prediction.
    pub fn header_size(&self) -> u64 {
        match self {
            TargetFormat::Flac => crate::flac::FLAC_HEADER_SIZE,
            TargetFormat::Wav => crate::wav::WAV_HEADER_SIZE,
            TargetFormat::Aiff => crate::aiff::AIFF_HEADER_SIZE,
        }
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.desttype())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniff_recognizes_magic_bytes() {
        assert_eq!(AudioCodec::sniff(b"fLaC\x00\x00\x00\x22"), Some(AudioCodec::Flac));
        assert_eq!(
            AudioCodec::sniff(b"RIFF\x24\x00\x00\x00WAVE"),
            Some(AudioCodec::Wav)
        );
        assert_eq!(
            AudioCodec::sniff(b"FORM\x00\x00\x00\x2eAIFF"),
            Some(AudioCodec::Aiff)
        );
        assert_eq!(
            AudioCodec::sniff(b"FORM\x00\x00\x00\x2eAIFC"),
            Some(AudioCodec::Aiff)
        );
        assert_eq!(AudioCodec::sniff(b"OggS\x00\x02"), Some(AudioCodec::Ogg));
        assert_eq!(AudioCodec::sniff(b"ID3\x04\x00"), Some(AudioCodec::Mp3));
        assert_eq!(AudioCodec::sniff(&[0xFF, 0xFB, 0x90, 0x00]), Some(AudioCodec::Mp3));
        assert_eq!(
            AudioCodec::sniff(b"\x00\x00\x00\x20ftypM4A "),
            Some(AudioCodec::M4a)
        );
    }

    #[test]
    fn sniff_rejects_short_or_unknown_input() {
        assert_eq!(AudioCodec::sniff(b""), None);
        assert_eq!(AudioCodec::sniff(b"fL"), None);
        // RIFF prefix without the WAVE signature
        assert_eq!(AudioCodec::sniff(b"RIFF\x24\x00"), None);
        assert_eq!(AudioCodec::sniff(b"not audio at all"), None);
    }

    #[test]
    fn extension_detection_is_case_insensitive() {
        assert_eq!(AudioCodec::from_extension("FLAC"), Some(AudioCodec::Flac));
        assert_eq!(AudioCodec::from_extension("Aif"), Some(AudioCodec::Aiff));
        assert_eq!(AudioCodec::from_extension("txt"), None);
    }

    #[test]
    fn desttype_round_trip() {
        for target in [TargetFormat::Flac, TargetFormat::Wav, TargetFormat::Aiff] {
            assert_eq!(TargetFormat::from_desttype(target.desttype()), Some(target));
        }
        assert_eq!(TargetFormat::from_desttype("mp3"), None);
    }

    #[test]
    fn mime_types() {
        assert_eq!(TargetFormat::Flac.mime_type(), "audio/flac");
        assert_eq!(TargetFormat::Wav.mime_type(), "audio/wav");
        assert_eq!(TargetFormat::Aiff.mime_type(), "audio/aiff");
    }
}
