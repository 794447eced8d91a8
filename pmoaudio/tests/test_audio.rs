//! End-to-end checks of the codec layer: files written by the encoders must
//! be accepted by the probing and decoding paths.

use std::fs;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use pmoaudio::{encode_flac, is_audio_file, probe, AudioCodec, PcmReader, WavEncoder};
use tempfile::tempdir;

/// Builds a small stereo 16-bit WAV on disk and returns the samples it holds
/// (full-scale, as `PcmReader` yields them).
fn write_test_wav(path: &Path, frames: usize) -> Vec<i32> {
    let mut encoder = WavEncoder::new(44100, 2, 16);
    let mut samples = Vec::with_capacity(frames * 2);
    for i in 0..frames {
        let left = ((i as i32 % 2000) - 1000) << 16;
        let right = (1000 - (i as i32 % 2000)) << 16;
        samples.push(left);
        samples.push(right);
    }

    let mut file = fs::File::create(path).unwrap();
    file.write_all(&encoder.header(0)).unwrap();
    file.write_all(&encoder.encode_block(&samples)).unwrap();
    for patch in encoder.finalize() {
        file.seek(SeekFrom::Start(patch.offset)).unwrap();
        file.write_all(&patch.bytes).unwrap();
    }
    file.flush().unwrap();
    samples
}

#[test]
fn test_wav_round_trip_through_symphonia() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ramp.wav");
    let samples = write_test_wav(&path, 4410);

    let info = probe(&path).unwrap();
    assert_eq!(info.codec, AudioCodec::Wav);
    assert_eq!(info.sample_rate, 44100);
    assert_eq!(info.channels, 2);
    assert_eq!(info.bits_per_sample, 16);
    // 4410 frames at 44100 Hz
    assert!((info.duration_secs - 0.1).abs() < 0.01);
    assert!(info.tags.title.is_none());

    let mut reader = PcmReader::open(&path).unwrap();
    let mut decoded = Vec::new();
    while let Some(block) = reader.next_block().unwrap() {
        decoded.extend_from_slice(&block);
    }
    assert_eq!(decoded.len(), samples.len());
    for (got, want) in decoded.iter().zip(samples.iter()) {
        assert_eq!(got >> 16, want >> 16);
    }
}

#[test]
fn test_flac_encode_produces_decodable_stream() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tone.flac");

    let frames = 8192;
    let mut samples = Vec::with_capacity(frames * 2);
    for i in 0..frames {
        let value = ((i as i32 % 512) - 256) << 16;
        samples.push(value);
        samples.push(-value);
    }

    let encoded = encode_flac(&samples, 2, 16, 44100).unwrap();
    assert_eq!(&encoded[..4], b"fLaC");
    assert_eq!(AudioCodec::sniff(&encoded), Some(AudioCodec::Flac));
    fs::write(&path, &encoded).unwrap();

    let mut reader = PcmReader::open(&path).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.sample_rate, 44100);
    assert_eq!(spec.channels, 2);

    let mut decoded = Vec::new();
    while let Some(block) = reader.next_block().unwrap() {
        decoded.extend_from_slice(&block);
    }
    assert_eq!(decoded.len(), samples.len());
    for (got, want) in decoded.iter().zip(samples.iter()) {
        assert_eq!(got >> 16, want >> 16);
    }
}

#[test]
fn test_detect_falls_back_to_extension() {
    let dir = tempdir().unwrap();

    // Content wins over the extension
    let mislabeled = dir.path().join("actually_flac.mp3");
    fs::write(&mislabeled, b"fLaC\x00\x00\x00\x22padding").unwrap();
    assert_eq!(AudioCodec::detect(&mislabeled).unwrap(), AudioCodec::Flac);

    // Unrecognized content falls back to the extension
    let headerless = dir.path().join("raw.flac");
    fs::write(&headerless, b"\x00\x01\x02\x03\x04\x05\x06\x07\x08\x09\x0a\x0b").unwrap();
    assert_eq!(AudioCodec::detect(&headerless).unwrap(), AudioCodec::Flac);

    // Neither content nor extension
    let unknown = dir.path().join("notes.txt");
    fs::write(&unknown, b"hello").unwrap();
    assert!(AudioCodec::detect(&unknown).is_err());
}

#[test]
fn test_is_audio_file() {
    assert!(is_audio_file(Path::new("/music/album/track.flac")));
    assert!(is_audio_file(Path::new("track.MP3")));
    assert!(!is_audio_file(Path::new("cover.jpg")));
    assert!(!is_audio_file(Path::new("no_extension")));
}
