use thiserror::Error;

/// Frame parse failures. All of them drop the frame; none abort the slot
/// cycle.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("preamble does not match any configured pattern")]
    PreambleMismatch,

    #[error("declared length {declared} bits overruns the {available} available")]
    LengthOverrun { declared: usize, available: usize },

    #[error("address {0} outside the valid device-id range")]
    AddressOutOfRange(u8),
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("frame parse failed: {0}")]
    Frame(#[from] FrameError),

    #[error("codeword uncorrectable within {max_flips} flips")]
    UncorrectableCodeword { max_flips: usize },

    #[error("no transmission detected in the slot buffer")]
    NoOnsetDetected,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("config file: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("config parse: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("audio device: {0}")]
    Audio(String),
}
