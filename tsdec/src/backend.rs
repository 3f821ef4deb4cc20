//! Cipher backend and key register.

use tsdec_core::{CissaKey, CsaBsKey, CsaKey, BATCH_WIDTH};

/// Control-word parity, tracked by the TS scrambling-control bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    Even,
    Odd,
}

impl Parity {
    /// Key-register slot for this parity.
    pub fn index(self) -> usize {
        match self {
            Parity::Even => 0,
            Parity::Odd => 1,
        }
    }
}

/// The active cipher backend with its even/odd key register.
///
/// Both slots always belong to the active arm; switching arms drops both.
/// The even slot is mandatory whenever any key is installed, the odd slot
/// is optional.
pub enum CipherBackend {
    /// Per-packet DVB-CSA.
    Csa([Option<CsaKey>; 2]),
    /// Batched DVB-CSA.
    CsaBs([Option<CsaBsKey>; 2]),
    /// AES-128-CBC (BISS-2 CISSA).
    Aes([Option<CissaKey>; 2]),
}

impl CipherBackend {
    /// Check whether any key is installed (the even slot is mandatory).
    pub fn has_even_key(&self) -> bool {
        match self {
            CipherBackend::Csa(keys) => keys[0].is_some(),
            CipherBackend::CsaBs(keys) => keys[0].is_some(),
            CipherBackend::Aes(keys) => keys[0].is_some(),
        }
    }

    /// Check whether the slot for the given parity is occupied.
    pub fn has_key(&self, parity: Parity) -> bool {
        let slot = parity.index();
        match self {
            CipherBackend::Csa(keys) => keys[slot].is_some(),
            CipherBackend::CsaBs(keys) => keys[slot].is_some(),
            CipherBackend::Aes(keys) => keys[slot].is_some(),
        }
    }

    /// Check whether this backend batches packets before descrambling.
    pub fn is_batched(&self) -> bool {
        matches!(self, CipherBackend::CsaBs(_))
    }

    /// Batch width of the batched arm.
    pub fn batch_size(&self) -> Option<usize> {
        self.is_batched().then_some(BATCH_WIDTH)
    }

    /// Drop both key slots, keeping the arm.
    pub fn clear(&mut self) {
        match self {
            CipherBackend::Csa(keys) => *keys = [None, None],
            CipherBackend::CsaBs(keys) => *keys = [None, None],
            CipherBackend::Aes(keys) => *keys = [None, None],
        }
    }
}
