//! BISS-2 "CISSA" payload cipher: AES-128-CBC with a fixed public IV.
//!
//! The IV is reset for every packet, so each payload is an independent CBC
//! message. Only whole 16-byte blocks are transformed; trailing 1-15 bytes
//! of a payload are carried through untouched.

use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};

use crate::error::CipherError;

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;

/// The fixed CISSA initialization vector ("DVBTMCPTAESCISSA").
pub const CISSA_IV: [u8; 16] = [
    0x44, 0x56, 0x42, 0x54, 0x4d, 0x43, 0x50, 0x54,
    0x41, 0x45, 0x53, 0x43, 0x49, 0x53, 0x53, 0x41,
];

/// A 16-byte CISSA session key.
#[derive(Clone)]
pub struct CissaKey {
    key: [u8; 16],
}

impl CissaKey {
    pub fn new(key: [u8; 16]) -> Self {
        Self { key }
    }

    /// Decrypt the leading whole AES blocks of a payload in place.
    pub fn descramble(&self, data: &mut [u8]) -> Result<(), CipherError> {
        let len = data.len() & !0xf;
        if len == 0 {
            return Ok(());
        }
        let dec = Aes128CbcDec::new(&self.key.into(), &CISSA_IV.into());
        dec.decrypt_padded_mut::<NoPadding>(&mut data[..len])
            .map(|_| ())
            .map_err(|_| CipherError::Aes)
    }

    /// Encrypt the leading whole AES blocks of a payload in place; the
    /// inverse of [`descramble`](CissaKey::descramble).
    pub fn scramble(&self, data: &mut [u8]) -> Result<(), CipherError> {
        let len = data.len() & !0xf;
        if len == 0 {
            return Ok(());
        }
        let enc = Aes128CbcEnc::new(&self.key.into(), &CISSA_IV.into());
        enc.encrypt_padded_mut::<NoPadding>(&mut data[..len], len)
            .map(|_| ())
            .map_err(|_| CipherError::Aes)
    }
}
