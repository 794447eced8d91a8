//! Incremental PCM decoding.
//!
//! `PcmReader` wraps a symphonia format reader + decoder pair and yields one
//! interleaved block of samples per call, so the caller can interleave
//! encoding with liveness checks instead of decoding a whole file up front.
//!
//! Samples are full-scale `i32` regardless of the source bit depth (a 16-bit
//! source sample `s` comes out as `s << 16`); encoders narrow them back down
//! to the target depth.

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::AudioError;

/// Resolved signal parameters of an open decoder.
#[derive(Debug, Clone, Copy)]
pub struct PcmSpec {
    pub sample_rate: u32,
    pub channels: usize,
    pub bits_per_sample: u32,
}

/// Block-by-block PCM decoder over one audio track.
pub struct PcmReader {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    spec: PcmSpec,
    n_frames: Option<u64>,
    sample_buf: Option<SampleBuffer<i32>>,
}

impl PcmReader {
    /// Opens a source file and prepares a decoder for its default audio track.
    pub fn open(path: &Path) -> Result<Self, AudioError> {
        let file = File::open(path)?;
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
        let track_id = track.id;
        let params = track.codec_params.clone();

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|err| AudioError::Decode(err.to_string()))?;

        let spec = PcmSpec {
            sample_rate: params.sample_rate.unwrap_or(44100),
            channels: params.channels.map(|ch| ch.count()).unwrap_or(2),
            bits_per_sample: params.bits_per_sample.unwrap_or(16),
        };

        Ok(Self {
            format,
            decoder,
            track_id,
            spec,
            n_frames: params.n_frames,
            sample_buf: None,
        })
    }

    /// Signal parameters, refined from the first decoded block when the
    /// container header was incomplete.
    pub fn spec(&self) -> PcmSpec {
        self.spec
    }

    /// Total frame count when the container declares it.
    pub fn total_frames(&self) -> Option<u64> {
        self.n_frames
    }

    /// Decodes the next block of interleaved samples.
    ///
    /// Returns `Ok(None)` at end of stream. Undecodable packets are skipped,
    /// as are packets belonging to other tracks.
    pub fn next_block(&mut self) -> Result<Option<Vec<i32>>, AudioError> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(SymphoniaError::IoError(err))
                    if err.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(err) => return Err(err.into()),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    if self.sample_buf.is_none() {
                        let spec = *decoded.spec();
                        self.spec.sample_rate = spec.rate;
                        self.spec.channels = spec.channels.count();
                        self.sample_buf =
                            Some(SampleBuffer::<i32>::new(decoded.capacity() as u64, spec));
                    }
                    if let Some(buf) = self.sample_buf.as_mut() {
                        buf.copy_interleaved_ref(decoded);
                        if !buf.samples().is_empty() {
                            return Ok(Some(buf.samples().to_vec()));
                        }
                    }
                }
                Err(SymphoniaError::DecodeError(err)) => {
                    tracing::debug!("skipping undecodable packet: {err}");
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}
