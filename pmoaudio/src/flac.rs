//! FLAC encoding through `flacenc`.
//!
//! `flacenc` is a whole-buffer encoder: it consumes every sample of the
//! stream at once and returns the complete FLAC byte stream. Callers that
//! need progressive output write the returned bytes out in slices.

use flacenc::bitsink::ByteSink;
use flacenc::component::BitRepr;
use flacenc::error::Verify;

use crate::error::AudioError;

/// `fLaC` marker plus a STREAMINFO block, the minimum flacenc emits.
pub const FLAC_HEADER_SIZE: u64 = 42;

/// Encodes interleaved samples to a complete FLAC stream.
///
/// `samples` are full-scale 32-bit values as produced by [`crate::PcmReader`];
/// they are narrowed to `bits_per_sample` before encoding. flacenc exposes no
/// libFLAC-style compression presets, so the encoder runs with its verified
/// default parameters.
pub fn encode_flac(
    samples: &[i32],
    channels: usize,
    bits_per_sample: usize,
    sample_rate: usize,
) -> Result<Vec<u8>, AudioError> {
    let shift = 32 - bits_per_sample as u32;
    let scaled: Vec<i32> = samples.iter().map(|s| s >> shift).collect();

    let config = flacenc::config::Encoder::default()
        .into_verified()
        .map_err(|e| AudioError::Encode(format!("FLAC config error: {e:?}")))?;
    let source =
        flacenc::source::MemSource::from_samples(&scaled, channels, bits_per_sample, sample_rate);
    let flac_stream = flacenc::encode_with_fixed_block_size(&config, source, config.block_size)
        .map_err(|e| AudioError::Encode(format!("FLAC encode error: {e:?}")))?;

    let mut sink = ByteSink::new();
    flac_stream
        .write(&mut sink)
        .map_err(|e| AudioError::Encode(format!("FLAC write error: {e:?}")))?;
    Ok(sink.into_inner())
}
