//! In-band flow definitions.

use std::time::Duration;

use crate::error::ControlError;

/// Flow definition prefix accepted on the input side.
pub const FLOW_PREFIX: &str = "block.mpegts.";

/// A flow-definition announcement, interleaved with packets in the stream.
///
/// The descrambler preserves its position relative to surrounding packets
/// and rewrites the announced latency on the way out when batching adds
/// delay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowDef {
    /// Flow definition string, e.g. `block.mpegts.`.
    pub def: String,
    /// End-to-end latency announced so far.
    pub latency: Duration,
}

impl FlowDef {
    pub fn new(def: impl Into<String>, latency: Duration) -> Self {
        Self {
            def: def.into(),
            latency,
        }
    }

    /// Validate the definition against the accepted input prefix.
    pub fn check(&self) -> Result<(), ControlError> {
        if self.def.starts_with(FLOW_PREFIX) {
            Ok(())
        } else {
            Err(ControlError::InvalidFlow(self.def.clone()))
        }
    }
}
