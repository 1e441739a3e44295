use std::fmt;

use flate2::DecompressError;
use thiserror::Error;

/// The engine status a compression error was raised for.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EngineStatus {
    /// The stream needs a preset dictionary that is missing or doesn't match
    NeedDictionary,
    /// Corrupt input, or a checksum mismatch
    DataError,
    /// The decoder was configured with options the engine can't honor
    InvalidArgument,
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineStatus::NeedDictionary => "need dictionary",
            EngineStatus::DataError => "data error",
            EngineStatus::InvalidArgument => "invalid argument",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum CompressionError {
    #[error("initialization failure ({status}): {message}")]
    Initialization { status: EngineStatus, message: String },

    #[error("decompression failure ({status}): {message}")]
    Decompression { status: EngineStatus, message: String },
}

impl CompressionError {
    pub fn initialization<S: ToString>(status: EngineStatus, message: S) -> Self {
        Self::Initialization { status, message: message.to_string() }
    }

    pub fn decompression<S: ToString>(status: EngineStatus, message: S) -> Self {
        Self::Decompression { status, message: message.to_string() }
    }

    pub fn status(&self) -> EngineStatus {
        match self {
            CompressionError::Initialization { status, .. } | CompressionError::Decompression { status, .. } => *status,
        }
    }
}

impl From<DecompressError> for CompressionError {
    fn from(e: DecompressError) -> Self {
        let status = match e.needs_dictionary() {
            Some(_) => EngineStatus::NeedDictionary,
            None => EngineStatus::DataError,
        };
        Self::decompression(status, e)
    }
}
