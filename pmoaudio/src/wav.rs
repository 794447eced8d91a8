//! WAV (RIFF) encoding.
//!
//! The encoder writes a provisional 44-byte header sized from the probe's
//! prediction, streams little-endian PCM into the `data` chunk, and patches
//! the two size fields once the real length is known. RIFF sizes are 32-bit,
//! so lengths saturate at 4 GiB.

/// Canonical PCM WAV header: RIFF + `fmt ` (16 bytes) + `data` chunk header.
pub const WAV_HEADER_SIZE: u64 = 44;

/// One deferred header correction: `bytes` to be written at `offset`.
#[derive(Debug, Clone)]
pub struct HeaderPatch {
    pub offset: u64,
    pub bytes: Vec<u8>,
}

/// Streaming PCM WAV encoder.
pub struct WavEncoder {
    sample_rate: u32,
    channels: u16,
    bits_per_sample: u16,
    data_bytes: u64,
}

impl WavEncoder {
    pub fn new(sample_rate: u32, channels: u16, bits_per_sample: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample,
            data_bytes: 0,
        }
    }

    /// Builds the 44-byte header with size fields derived from
    /// `estimated_data_bytes`; `finalize` corrects them afterwards.
    pub fn header(&self, estimated_data_bytes: u64) -> Vec<u8> {
        let data_size = estimated_data_bytes.min(u32::MAX as u64) as u32;
        let riff_size = data_size.saturating_add(WAV_HEADER_SIZE as u32 - 8);
        let bytes_per_sample = (self.bits_per_sample / 8) as u32;
        let block_align = self.channels as u32 * bytes_per_sample;
        let byte_rate = self.sample_rate * block_align;

        let mut header = Vec::with_capacity(WAV_HEADER_SIZE as usize);
        header.extend_from_slice(b"RIFF");
        header.extend_from_slice(&riff_size.to_le_bytes());
        header.extend_from_slice(b"WAVE");
        header.extend_from_slice(b"fmt ");
        header.extend_from_slice(&16u32.to_le_bytes());
        header.extend_from_slice(&1u16.to_le_bytes()); // PCM
        header.extend_from_slice(&self.channels.to_le_bytes());
        header.extend_from_slice(&self.sample_rate.to_le_bytes());
        header.extend_from_slice(&byte_rate.to_le_bytes());
        header.extend_from_slice(&(block_align as u16).to_le_bytes());
        header.extend_from_slice(&self.bits_per_sample.to_le_bytes());
        header.extend_from_slice(b"data");
        header.extend_from_slice(&data_size.to_le_bytes());
        header
    }

    /// Encodes one block of full-scale interleaved samples to little-endian
    /// PCM at the target bit depth.
    pub fn encode_block(&mut self, samples: &[i32]) -> Vec<u8> {
        let bytes_per_sample = (self.bits_per_sample / 8) as usize;
        let shift = 32 - self.bits_per_sample as u32;
        let mut out = Vec::with_capacity(samples.len() * bytes_per_sample);
        for &sample in samples {
            let value = sample >> shift;
            let le = value.to_le_bytes();
            out.extend_from_slice(&le[..bytes_per_sample]);
        }
        self.data_bytes += out.len() as u64;
        out
    }

    /// Exact size corrections for the RIFF and `data` chunk fields.
    pub fn finalize(&self) -> Vec<HeaderPatch> {
        let data_size = self.data_bytes.min(u32::MAX as u64) as u32;
        let riff_size = data_size.saturating_add(WAV_HEADER_SIZE as u32 - 8);
        vec![
            HeaderPatch {
                offset: 4,
                bytes: riff_size.to_le_bytes().to_vec(),
            },
            HeaderPatch {
                offset: 40,
                bytes: data_size.to_le_bytes().to_vec(),
            },
        ]
    }

    /// PCM bytes written so far, header excluded.
    pub fn data_bytes(&self) -> u64 {
        self.data_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_cd_stereo() {
        let enc = WavEncoder::new(44100, 2, 16);
        let header = enc.header(1000);
        assert_eq!(header.len(), WAV_HEADER_SIZE as usize);
        assert_eq!(&header[0..4], b"RIFF");
        assert_eq!(u32::from_le_bytes(header[4..8].try_into().unwrap()), 1036);
        assert_eq!(&header[8..12], b"WAVE");
        assert_eq!(&header[12..16], b"fmt ");
        assert_eq!(u32::from_le_bytes(header[16..20].try_into().unwrap()), 16);
        assert_eq!(u16::from_le_bytes(header[20..22].try_into().unwrap()), 1);
        assert_eq!(u16::from_le_bytes(header[22..24].try_into().unwrap()), 2);
        assert_eq!(u32::from_le_bytes(header[24..28].try_into().unwrap()), 44100);
        // byte rate = 44100 * 2 * 2
        assert_eq!(
            u32::from_le_bytes(header[28..32].try_into().unwrap()),
            176400
        );
        assert_eq!(u16::from_le_bytes(header[32..34].try_into().unwrap()), 4);
        assert_eq!(u16::from_le_bytes(header[34..36].try_into().unwrap()), 16);
        assert_eq!(&header[36..40], b"data");
        assert_eq!(u32::from_le_bytes(header[40..44].try_into().unwrap()), 1000);
    }

    #[test]
    fn encode_block_16_bit_little_endian() {
        let mut enc = WavEncoder::new(44100, 2, 16);
        // Full-scale samples for the 16-bit values 1, -1, 0x1234
        let samples = [1 << 16, -(1 << 16), 0x1234 << 16];
        let bytes = enc.encode_block(&samples);
        assert_eq!(bytes, vec![0x01, 0x00, 0xFF, 0xFF, 0x34, 0x12]);
        assert_eq!(enc.data_bytes(), 6);
    }

    #[test]
    fn encode_block_24_bit() {
        let mut enc = WavEncoder::new(96000, 2, 24);
        let samples = [0x123456 << 8, -(1 << 8)];
        let bytes = enc.encode_block(&samples);
        assert_eq!(bytes, vec![0x56, 0x34, 0x12, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn finalize_patches_both_size_fields() {
        let mut enc = WavEncoder::new(44100, 2, 16);
        enc.encode_block(&[0; 100]);
        let patches = enc.finalize();
        assert_eq!(patches.len(), 2);
        assert_eq!(patches[0].offset, 4);
        assert_eq!(
            u32::from_le_bytes(patches[0].bytes.clone().try_into().unwrap()),
            200 + 36
        );
        assert_eq!(patches[1].offset, 40);
        assert_eq!(
            u32::from_le_bytes(patches[1].bytes.clone().try_into().unwrap()),
            200
        );
    }
}
