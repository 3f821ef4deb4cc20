//! Items flowing through the descrambler pipe.

use bytes::Bytes;

use crate::flow::FlowDef;

/// A 188-byte transport stream packet plus pipeline metadata.
///
/// The buffer is shared with upstream consumers; the descrambler never
/// mutates it in place and copies before writing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TsPacket {
    /// Raw packet bytes.
    pub data: Bytes,
    /// Presentation timestamp carried through unchanged, if any.
    pub pts: Option<u64>,
}

impl TsPacket {
    pub fn new(data: Bytes) -> Self {
        Self { data, pts: None }
    }
}

/// An item observed on the pipe: a packet or an in-band flow definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem {
    Packet(TsPacket),
    FlowDef(FlowDef),
}
