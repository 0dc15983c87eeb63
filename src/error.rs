use thiserror::Error;

#[derive(Debug, Error)]
pub enum TapError {
    #[error("FFT size must be a power of two between 16 and 65536, got {0}")]
    InvalidFftSize(usize),

    #[error("failed to plan a {size}-point FFT")]
    FftPlan { size: usize },

    #[error("socket error: {0}")]
    Socket(#[from] std::io::Error),

    #[error("failed to encode {message} message: {reason}")]
    Encode {
        message: &'static str,
        reason: String,
    },

    #[error("failed to decode {message} message: {reason}")]
    Decode {
        message: &'static str,
        reason: String,
    },

    #[error("invalid state document: {0}")]
    State(#[from] serde_json::Error),

    #[error("unknown parameter index {0}")]
    UnknownParameter(usize),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, TapError>;
