//! Sans-IO primitives for MPEG-TS descrambling.
//!
//! This crate holds the pure leaves of the descrambler: transport stream
//! header decoding, control-word parsing, the DVB-CSA kernel (per-packet
//! and batched) and the BISS-2 "CISSA" AES-128-CBC kernel. Nothing here
//! performs I/O or keeps pipeline state; the scheduling layer lives in the
//! `tsdec` crate.

pub mod cissa;
pub mod csa;
pub mod cw;
pub mod error;
pub mod ts;

pub use cissa::{CissaKey, CISSA_IV};
pub use csa::{CsaBsKey, CsaKey, BATCH_WIDTH};
pub use cw::ControlWord;
pub use error::{CipherError, KeyError, TsError};
