//! Error types for minimon
//!
//! Backends and platform sources return these; monitors catch them at their
//! boundary and turn them into zeroed or `None` readings.

use std::io;
use thiserror::Error;

/// Result type alias for minimon operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// NVML error (NVIDIA GPUs)
    #[cfg(feature = "nvidia")]
    #[error("NVML error: {0}")]
    Nvml(#[from] nvml_wrapper::error::NvmlError),

    /// WMI query or connection error
    #[cfg(windows)]
    #[error("WMI error: {0}")]
    Wmi(#[from] wmi::WMIError),

    /// Data source is not present on this machine
    #[error("Source unavailable: {0}")]
    Unavailable(String),

    /// A single sample from an otherwise available source failed
    #[error("Sample failed: {0}")]
    SampleFailed(String),

    /// Performance counter category, counter or instance does not exist
    #[error("Counter not found: {0}")]
    CounterNotFound(String),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Unsupported platform
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// System error
    #[error("System error: {0}")]
    System(String),
}

impl Error {
    /// True for errors that mean the source will never work in this session
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Error::Unavailable(_) | Error::UnsupportedPlatform(_) | Error::CounterNotFound(_)
        )
    }
}
