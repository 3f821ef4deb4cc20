//! Control-word parsing.
//!
//! Control words arrive as hex strings in one of three encodings: 12 chars
//! for a 6-byte BISS-1 key (the two DVB checksum bytes are inserted), 16
//! chars for a full 8-byte DVB-CSA control word, or 32 chars for a 16-byte
//! AES (BISS-2 / CISSA) key.

use crate::error::KeyError;

/// A parsed control word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlWord {
    /// 8-byte DVB-CSA control word.
    Csa([u8; 8]),
    /// 16-byte AES-128 key.
    Aes([u8; 16]),
}

impl ControlWord {
    /// Parse a hex-encoded control word.
    pub fn parse(s: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(s).map_err(|_| KeyError::BadHex(s.to_string()))?;
        match bytes.len() {
            6 => {
                let mut cw = [0u8; 8];
                cw[..3].copy_from_slice(&bytes[..3]);
                cw[3] = bytes[0].wrapping_add(bytes[1]).wrapping_add(bytes[2]);
                cw[4..7].copy_from_slice(&bytes[3..6]);
                cw[7] = bytes[3].wrapping_add(bytes[4]).wrapping_add(bytes[5]);
                Ok(ControlWord::Csa(cw))
            }
            8 => {
                let mut cw = [0u8; 8];
                cw.copy_from_slice(&bytes);
                Ok(ControlWord::Csa(cw))
            }
            16 => {
                let mut key = [0u8; 16];
                key.copy_from_slice(&bytes);
                Ok(ControlWord::Aes(key))
            }
            n => Err(KeyError::BadLength(n * 2)),
        }
    }

    /// Check if this control word selects the AES cipher.
    pub fn is_aes(&self) -> bool {
        matches!(self, ControlWord::Aes(_))
    }
}
