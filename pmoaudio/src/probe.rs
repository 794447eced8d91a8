//! Stream probing.
//!
//! `probe` opens a file just far enough to learn its technical parameters
//! (duration, sample rate, channels, bit depth) without decoding audio.
//! Tags are read with `lofty` on a best-effort basis: a file without tags,
//! or one lofty cannot parse, still probes successfully.

use std::fs;
use std::path::Path;

use lofty::{config::ParseOptions, prelude::*, probe::Probe};
use symphonia::core::codecs::CODEC_TYPE_NULL;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::AudioError;
use crate::format::AudioCodec;

/// Technical parameters of a source file.
#[derive(Debug, Clone)]
pub struct AudioProbe {
    pub codec: AudioCodec,
    /// Total duration in seconds, 0.0 when the container does not say.
    pub duration_secs: f64,
    pub sample_rate: u32,
    pub channels: usize,
    pub bits_per_sample: u32,
    /// Average bit rate in bits per second, 0 when unknown.
    pub bit_rate: u32,
    /// Source file size in bytes.
    pub file_size: u64,
    pub tags: AudioTags,
}

/// Descriptive metadata, all optional.
#[derive(Debug, Clone, Default)]
pub struct AudioTags {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub year: Option<u32>,
    pub genre: Option<String>,
    pub track: Option<u32>,
    pub track_total: Option<u32>,
}

/// Probes a source file.
///
/// The container is identified by content sniffing, then symphonia resolves
/// the default audio track. Fields symphonia does not know (common for MP3
/// duration) fall back to lofty's reading, then to neutral defaults.
pub fn probe(path: &Path) -> Result<AudioProbe, AudioError> {
    let codec = AudioCodec::detect(path)?;
    let file_size = fs::metadata(path)?.len();

    let file = fs::File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|err| AudioError::Probe(err.to_string()))?;

    let format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| AudioError::NoAudioTrack(path.display().to_string()))?;
    let params = &track.codec_params;

    let sample_rate = params.sample_rate.unwrap_or(44100);
    let channels = params.channels.map(|ch| ch.count()).unwrap_or(2);
    let mut bits_per_sample = params.bits_per_sample.unwrap_or(0);
    let mut duration_secs = params
        .n_frames
        .map(|frames| frames as f64 / sample_rate as f64)
        .unwrap_or(0.0);

    // Second opinion from lofty: tags, plus duration/bit depth fallbacks.
    let mut bit_rate = 0u32;
    let mut tags = AudioTags::default();
    if let Ok(tagged) = Probe::open(path).and_then(|p| p.options(ParseOptions::new()).read()) {
        let properties = tagged.properties();
        if duration_secs == 0.0 {
            duration_secs = properties.duration().as_secs_f64();
        }
        if bits_per_sample == 0 {
            bits_per_sample = properties.bit_depth().map(u32::from).unwrap_or(0);
        }
        // lofty reports kbit/s
        bit_rate = properties.audio_bitrate().unwrap_or(0) * 1000;

        if let Some(tag) = tagged.primary_tag().or_else(|| tagged.first_tag()) {
            tags.title = tag.title().map(|s| s.to_string());
            tags.artist = tag.artist().map(|s| s.to_string());
            tags.album = tag.album().map(|s| s.to_string());
            tags.year = tag.year();
            tags.genre = tag.genre().map(|s| s.to_string());
            tags.track = tag.track();
            tags.track_total = tag.track_total();
        }
    }

    if bits_per_sample == 0 {
        bits_per_sample = 16;
    }
    if bit_rate == 0 && duration_secs > 0.0 {
        bit_rate = ((file_size as f64 * 8.0) / duration_secs) as u32;
    }

    Ok(AudioProbe {
        codec,
        duration_secs,
        sample_rate,
        channels,
        bits_per_sample,
        bit_rate,
        file_size,
        tags,
    })
}
