//! Error types for the descrambling primitives.

use thiserror::Error;

/// Errors raised while reading a TS packet header.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TsError {
    /// Fewer bytes available than the header needs.
    #[error("TS header unreadable")]
    HeaderUnreadable,

    /// Adaptation field length leaves no room for a payload.
    #[error("invalid adaptation field length {0}")]
    AdaptationInvalid(u8),
}

/// Errors raised while parsing a control-word string.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// The string is not valid hex.
    #[error("control word is not valid hex: {0:?}")]
    BadHex(String),

    /// Decoded length is not one of the supported control-word sizes.
    #[error("control word has unsupported length of {0} hex chars")]
    BadLength(usize),
}

/// Errors raised by a cipher kernel.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherError {
    /// AES payload transformation failed.
    #[error("AES payload cipher failed")]
    Aes,
}
