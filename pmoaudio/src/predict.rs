//! Output size prediction.
//!
//! The predicted size is what a `HEAD` request reports before any transcode
//! has run, and what the cache's disk-space pruning reserves room for. It
//! only needs to be close: the exact size replaces it when the run finishes.

use crate::format::{AudioCodec, TargetFormat};
use crate::probe::AudioProbe;

/// Empirical lossless ratio of FLAC output to raw PCM.
const FLAC_RATIO_PERCENT: u64 = 65;

/// Predicts the output size in bytes for transcoding `probe` to `target`.
///
/// PCM targets are exact up to rounding: frames x channels x bytes per
/// sample, plus the container header. FLAC applies an empirical 65 % ratio
/// to the PCM size. A FLAC source headed for FLAC without forced re-encode
/// will be passed through, so it predicts its own file size.
///
/// Channel counts above 2 predict as stereo, although the encoders keep all
/// channels; a zero-duration probe predicts the bare header.
pub fn predicted_size(
    probe: &AudioProbe,
    target: TargetFormat,
    bits_per_sample: u32,
    recode_same: bool,
) -> u64 {
    if target == TargetFormat::Flac && probe.codec == AudioCodec::Flac && !recode_same {
        return probe.file_size;
    }

    let frames = (probe.duration_secs * probe.sample_rate as f64).round() as u64;
    let channels = probe.channels.min(2) as u64;
    let bytes_per_sample = (bits_per_sample / 8) as u64;
    let pcm_bytes = frames * channels * bytes_per_sample;

    match target {
        TargetFormat::Wav | TargetFormat::Aiff => pcm_bytes + target.header_size(),
        TargetFormat::Flac => pcm_bytes * FLAC_RATIO_PERCENT / 100 + target.header_size(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::AudioTags;

    fn probe_for(codec: AudioCodec, duration_secs: f64, channels: usize) -> AudioProbe {
        AudioProbe {
            codec,
            duration_secs,
            sample_rate: 44100,
            channels,
            bits_per_sample: 16,
            bit_rate: 0,
            file_size: 123_456,
            tags: AudioTags::default(),
        }
    }

    #[test]
    fn wav_prediction_is_pcm_plus_header() {
        let probe = probe_for(AudioCodec::Flac, 10.0, 2);
        let predicted = predicted_size(&probe, TargetFormat::Wav, 16, false);
        assert_eq!(predicted, 441000 * 4 + 44);
    }

    #[test]
    fn flac_prediction_applies_ratio() {
        let probe = probe_for(AudioCodec::Wav, 10.0, 2);
        let predicted = predicted_size(&probe, TargetFormat::Flac, 16, false);
        assert_eq!(predicted, 441000 * 4 * 65 / 100 + 42);
    }

    #[test]
    fn flac_source_predicts_passthrough_size() {
        let probe = probe_for(AudioCodec::Flac, 10.0, 2);
        assert_eq!(
            predicted_size(&probe, TargetFormat::Flac, 16, false),
            probe.file_size
        );
        // Forced re-encode goes back to the formula
        assert_ne!(
            predicted_size(&probe, TargetFormat::Flac, 16, true),
            probe.file_size
        );
    }

    #[test]
    fn zero_duration_predicts_header_only() {
        let probe = probe_for(AudioCodec::Wav, 0.0, 2);
        assert_eq!(predicted_size(&probe, TargetFormat::Wav, 16, false), 44);
        assert_eq!(predicted_size(&probe, TargetFormat::Aiff, 16, false), 54);
        assert_eq!(predicted_size(&probe, TargetFormat::Flac, 16, false), 42);
    }

    #[test]
    fn multichannel_predicts_as_stereo() {
        let stereo = probe_for(AudioCodec::Wav, 10.0, 2);
        let surround = probe_for(AudioCodec::Wav, 10.0, 6);
        assert_eq!(
            predicted_size(&stereo, TargetFormat::Wav, 16, false),
            predicted_size(&surround, TargetFormat::Wav, 16, false)
        );
    }

    #[test]
    fn bit_depth_scales_prediction() {
        let probe = probe_for(AudioCodec::Flac, 10.0, 2);
        let p16 = predicted_size(&probe, TargetFormat::Aiff, 16, false);
        let p24 = predicted_size(&probe, TargetFormat::Aiff, 24, false);
        assert_eq!(p24 - 54, (p16 - 54) / 2 * 3);
    }
}
