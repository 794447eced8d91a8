//! AIFF encoding.
//!
//! Big-endian counterpart of the WAV encoder: `FORM`/`COMM`/`SSND` layout,
//! sample rate stored as an 80-bit extended float, three size fields patched
//! on finalize (FORM size, COMM frame count, SSND size).

use crate::wav::HeaderPatch;

/// `FORM` (8) + form type (4) + `COMM` (8 + 18) + `SSND` header (8 + 8).
pub const AIFF_HEADER_SIZE: u64 = 54;

/// Streaming PCM AIFF encoder.
pub struct AiffEncoder {
    sample_rate: u32,
    channels: u16,
    bits_per_sample: u16,
    frames_written: u64,
}

impl AiffEncoder {
    pub fn new(sample_rate: u32, channels: u16, bits_per_sample: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample,
            frames_written: 0,
        }
    }

    fn bytes_per_frame(&self) -> u64 {
        self.channels as u64 * (self.bits_per_sample as u64 / 8)
    }

    /// Builds the 54-byte header with sizes derived from `estimated_frames`.
    pub fn header(&self, estimated_frames: u64) -> Vec<u8> {
        let data_bytes = estimated_frames * self.bytes_per_frame();
        let form_size = data_bytes
            .saturating_add(AIFF_HEADER_SIZE - 8)
            .min(u32::MAX as u64) as u32;
        let ssnd_size = data_bytes.saturating_add(8).min(u32::MAX as u64) as u32;
        let num_frames = estimated_frames.min(u32::MAX as u64) as u32;

        let mut header = Vec::with_capacity(AIFF_HEADER_SIZE as usize);
        header.extend_from_slice(b"FORM");
        header.extend_from_slice(&form_size.to_be_bytes());
        header.extend_from_slice(b"AIFF");
        header.extend_from_slice(b"COMM");
        header.extend_from_slice(&18u32.to_be_bytes());
        header.extend_from_slice(&self.channels.to_be_bytes());
        header.extend_from_slice(&num_frames.to_be_bytes());
        header.extend_from_slice(&self.bits_per_sample.to_be_bytes());
        header.extend_from_slice(&encode_extended_f80(self.sample_rate));
        header.extend_from_slice(b"SSND");
        header.extend_from_slice(&ssnd_size.to_be_bytes());
        header.extend_from_slice(&0u32.to_be_bytes()); // offset
        header.extend_from_slice(&0u32.to_be_bytes()); // block size
        header
    }

    /// Encodes one block of full-scale interleaved samples to big-endian PCM.
    pub fn encode_block(&mut self, samples: &[i32]) -> Vec<u8> {
        let bytes_per_sample = (self.bits_per_sample / 8) as usize;
        let shift = 32 - self.bits_per_sample as u32;
        let mut out = Vec::with_capacity(samples.len() * bytes_per_sample);
        for &sample in samples {
            let value = sample >> shift;
            let be = value.to_be_bytes();
            out.extend_from_slice(&be[4 - bytes_per_sample..]);
        }
        self.frames_written += (samples.len() / self.channels as usize) as u64;
        out
    }

    /// Exact size corrections for FORM, COMM and SSND.
    pub fn finalize(&self) -> Vec<HeaderPatch> {
        let data_bytes = self.frames_written * self.bytes_per_frame();
        let form_size = data_bytes
            .saturating_add(AIFF_HEADER_SIZE - 8)
            .min(u32::MAX as u64) as u32;
        let ssnd_size = data_bytes.saturating_add(8).min(u32::MAX as u64) as u32;
        let num_frames = self.frames_written.min(u32::MAX as u64) as u32;
        vec![
            HeaderPatch {
                offset: 4,
                bytes: form_size.to_be_bytes().to_vec(),
            },
            HeaderPatch {
                offset: 22,
                bytes: num_frames.to_be_bytes().to_vec(),
            },
            HeaderPatch {
                offset: 42,
                bytes: ssnd_size.to_be_bytes().to_vec(),
            },
        ]
    }

    /// PCM bytes written so far, header excluded.
    pub fn data_bytes(&self) -> u64 {
        self.frames_written * self.bytes_per_frame()
    }
}

/// Encodes a sample rate as the 80-bit extended float the COMM chunk expects:
/// 15-bit biased exponent, explicit-leading-one 64-bit mantissa, big-endian.
fn encode_extended_f80(rate: u32) -> [u8; 10] {
    if rate == 0 {
        return [0u8; 10];
    }
    let mut exponent: u16 = 16383 + 31;
    let mut mantissa = (rate as u64) << 32;
    while mantissa & 0x8000_0000_0000_0000 == 0 {
        mantissa <<= 1;
        exponent -= 1;
    }
    let mut out = [0u8; 10];
    out[..2].copy_from_slice(&exponent.to_be_bytes());
    out[2..].copy_from_slice(&mantissa.to_be_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extended_f80_canonical_rates() {
        assert_eq!(
            encode_extended_f80(44100),
            [0x40, 0x0E, 0xAC, 0x44, 0, 0, 0, 0, 0, 0]
        );
        assert_eq!(
            encode_extended_f80(48000),
            [0x40, 0x0E, 0xBB, 0x80, 0, 0, 0, 0, 0, 0]
        );
        assert_eq!(
            encode_extended_f80(96000),
            [0x40, 0x0F, 0xBB, 0x80, 0, 0, 0, 0, 0, 0]
        );
        assert_eq!(encode_extended_f80(0), [0u8; 10]);
    }

    #[test]
    fn header_layout() {
        let enc = AiffEncoder::new(44100, 2, 16);
        let header = enc.header(250);
        assert_eq!(header.len(), AIFF_HEADER_SIZE as usize);
        assert_eq!(&header[0..4], b"FORM");
        // 250 frames * 4 bytes + 46
        assert_eq!(u32::from_be_bytes(header[4..8].try_into().unwrap()), 1046);
        assert_eq!(&header[8..12], b"AIFF");
        assert_eq!(&header[12..16], b"COMM");
        assert_eq!(u32::from_be_bytes(header[16..20].try_into().unwrap()), 18);
        assert_eq!(u16::from_be_bytes(header[20..22].try_into().unwrap()), 2);
        assert_eq!(u32::from_be_bytes(header[22..26].try_into().unwrap()), 250);
        assert_eq!(u16::from_be_bytes(header[26..28].try_into().unwrap()), 16);
        assert_eq!(&header[28..38], &encode_extended_f80(44100));
        assert_eq!(&header[38..42], b"SSND");
        assert_eq!(u32::from_be_bytes(header[42..46].try_into().unwrap()), 1008);
        assert_eq!(u32::from_be_bytes(header[46..50].try_into().unwrap()), 0);
        assert_eq!(u32::from_be_bytes(header[50..54].try_into().unwrap()), 0);
    }

    #[test]
    fn encode_block_is_big_endian() {
        let mut enc = AiffEncoder::new(44100, 2, 16);
        let samples = [1 << 16, 0x1234 << 16];
        let bytes = enc.encode_block(&samples);
        assert_eq!(bytes, vec![0x00, 0x01, 0x12, 0x34]);
        assert_eq!(enc.frames_written, 1);
    }

    #[test]
    fn finalize_patches_three_fields() {
        let mut enc = AiffEncoder::new(44100, 2, 16);
        enc.encode_block(&[0; 200]); // 100 frames, 400 bytes
        let patches = enc.finalize();
        assert_eq!(patches.len(), 3);
        assert_eq!(patches[0].offset, 4);
        assert_eq!(
            u32::from_be_bytes(patches[0].bytes.clone().try_into().unwrap()),
            446
        );
        assert_eq!(patches[1].offset, 22);
        assert_eq!(
            u32::from_be_bytes(patches[1].bytes.clone().try_into().unwrap()),
            100
        );
        assert_eq!(patches[2].offset, 42);
        assert_eq!(
            u32::from_be_bytes(patches[2].bytes.clone().try_into().unwrap()),
            408
        );
    }
}
