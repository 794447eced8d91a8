//! # pmoaudio
//!
//! Audio probing, decoding and encoding for PMOStream.
//!
//! This crate is the codec layer under the transcode cache: it classifies
//! source files, probes their technical parameters, decodes them to
//! interleaved PCM block by block, and encodes PCM to the lossless target
//! containers (FLAC, WAV, AIFF). Everything is synchronous; the cache runs
//! the heavy calls inside `tokio::task::spawn_blocking`.
//!
//! ## Example: probe then decode
//!
//! ```no_run
//! use pmoaudio::{probe, PcmReader};
//! use std::path::Path;
//!
//! fn main() -> Result<(), pmoaudio::AudioError> {
//!     let path = Path::new("track.flac");
//!     let info = probe(path)?;
//!     println!("{} Hz, {} channels", info.sample_rate, info.channels);
//!
//!     let mut reader = PcmReader::open(path)?;
//!     while let Some(block) = reader.next_block()? {
//!         println!("decoded {} samples", block.len());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Example: encode WAV progressively
//!
//! ```
//! use pmoaudio::WavEncoder;
//!
//! let mut encoder = WavEncoder::new(44_100, 2, 16);
//! let header = encoder.header(0);           // provisional sizes
//! let pcm = encoder.encode_block(&[0; 128]);
//! let patches = encoder.finalize();          // exact sizes to patch in
//! assert_eq!(header.len(), 44);
//! assert!(!pcm.is_empty());
//! assert_eq!(patches.len(), 2);
//! ```

pub mod aiff;
pub mod decode;
pub mod error;
pub mod flac;
pub mod format;
pub mod predict;
pub mod probe;
pub mod wav;

pub use aiff::{AiffEncoder, AIFF_HEADER_SIZE};
pub use decode::{PcmReader, PcmSpec};
pub use error::AudioError;
pub use flac::{encode_flac, FLAC_HEADER_SIZE};
pub use format::{is_audio_file, AudioCodec, TargetFormat};
pub use predict::predicted_size;
pub use probe::{probe, AudioProbe, AudioTags};
pub use wav::{HeaderPatch, WavEncoder, WAV_HEADER_SIZE};
