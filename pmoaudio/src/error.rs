use std::io;

#[derive(thiserror::Error, Debug)]
pub enum AudioError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("unknown or unsupported audio format: {0}")]
    UnknownFormat(String),
    #[error("no decodable audio track in {0}")]
    NoAudioTrack(String),
    #[error("probe error: {0}")]
    Probe(String),
    #[error("audio decode error: {0}")]
    Decode(String),
    #[error("FLAC encode error: {0}")]
    Encode(String),
}

impl From<symphonia::core::errors::Error> for AudioError {
    fn from(err: symphonia::core::errors::Error) -> Self {
        AudioError::Decode(err.to_string())
    }
}

impl AudioError {
    /// OS error code when the failure came from the filesystem, 0 otherwise.
    pub fn os_error(&self) -> i32 {
        match self {
            AudioError::Io(err) => err.raw_os_error().unwrap_or(0),
            _ => 0,
        }
    }
}
