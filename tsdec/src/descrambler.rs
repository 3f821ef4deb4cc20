//! The descrambling pipe state machine.
//!
//! Items are either emitted straight through or parked in the hold queue
//! while a batch of scrambled payloads is open. A flush (batch full, parity
//! flip, deadline, or input drained) descrambles the open batch and drains
//! the hold queue downstream in arrival order.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::BytesMut;
use log::{debug, info, warn};
use tokio::time::Instant;

use tsdec_core::cw::ControlWord;
use tsdec_core::ts::{self, ScramblingControl, TsHeader, TS_PAYLOAD_MAX};
use tsdec_core::{CissaKey, CsaBsKey, CsaKey, BATCH_WIDTH};

use crate::backend::{CipherBackend, Parity};
use crate::batch::{BatchBuffer, BatchEntry};
use crate::error::ControlError;
use crate::flow::FlowDef;
use crate::pid::PidSet;
use crate::timer::Deadline;
use crate::types::{StreamItem, TsPacket};

/// Worst expected descramble latency on ordinary hardware.
pub const CSA_LATENCY: Duration = Duration::from_millis(5);

/// An item parked in the hold queue while a batch is open.
enum HeldItem {
    /// Emitted as-is on drain.
    Clear(TsPacket),
    /// A copied packet whose payload belongs to the open batch.
    Pending { buf: BytesMut, pts: Option<u64> },
    /// Applied and published on drain.
    Flow(FlowDef),
}

/// Streaming MPEG-TS descrambler.
///
/// Constructed with an optional flow announcement: presence selects batched
/// CSA when a control word is installed and carries the latency budget for
/// deadline flushes.
pub struct Descrambler {
    backend: CipherBackend,
    pids: PidSet,
    /// Selects batched CSA on key install.
    batched: bool,
    /// Latency budget between the first held packet and its flush.
    latency: Duration,
    hold: VecDeque<HeldItem>,
    batch: BatchBuffer,
    /// Parity of the open batch; meaningful only while it is non-empty.
    batch_parity: Parity,
    deadline: Deadline,
    /// Handle held while output is pending; at most one outstanding.
    retained: bool,
    out_flow: Option<FlowDef>,
}

impl Descrambler {
    pub fn new(flow: Option<FlowDef>) -> Self {
        let (batched, latency) = match flow {
            Some(flow) => {
                let latency = if flow.latency.is_zero() {
                    CSA_LATENCY
                } else {
                    flow.latency
                };
                (true, latency)
            }
            None => (false, CSA_LATENCY),
        };
        Self {
            backend: if batched {
                CipherBackend::CsaBs([None, None])
            } else {
                CipherBackend::Csa([None, None])
            },
            pids: PidSet::new(),
            batched,
            latency,
            hold: VecDeque::new(),
            batch: BatchBuffer::new(BATCH_WIDTH),
            batch_parity: Parity::Even,
            deadline: Deadline::new(),
            retained: false,
            out_flow: None,
        }
    }

    /// Install the even (mandatory) and odd (optional) control words,
    /// recomputing the cipher mode. Existing keys are dropped first.
    pub fn set_key(&mut self, even: &str, odd: &str) -> Result<(), ControlError> {
        self.backend.clear();

        let even_cw =
            ControlWord::parse(even).map_err(|e| ControlError::InvalidKey(e.to_string()))?;
        let odd_cw = if odd.is_empty() {
            None
        } else {
            if even.len() != odd.len() {
                return Err(ControlError::InvalidKey(format!(
                    "control word lengths disagree: {} vs {}",
                    even.len(),
                    odd.len()
                )));
            }
            Some(ControlWord::parse(odd).map_err(|e| ControlError::InvalidKey(e.to_string()))?)
        };

        self.backend = match (even_cw, odd_cw) {
            (ControlWord::Aes(e), None) => CipherBackend::Aes([Some(CissaKey::new(e)), None]),
            (ControlWord::Aes(e), Some(ControlWord::Aes(o))) => {
                CipherBackend::Aes([Some(CissaKey::new(e)), Some(CissaKey::new(o))])
            }
            (ControlWord::Csa(e), None) if self.batched => {
                CipherBackend::CsaBs([Some(CsaBsKey::new(e)), None])
            }
            (ControlWord::Csa(e), Some(ControlWord::Csa(o))) if self.batched => {
                CipherBackend::CsaBs([Some(CsaBsKey::new(e)), Some(CsaBsKey::new(o))])
            }
            (ControlWord::Csa(e), None) => CipherBackend::Csa([Some(CsaKey::new(e)), None]),
            (ControlWord::Csa(e), Some(ControlWord::Csa(o))) => {
                CipherBackend::Csa([Some(CsaKey::new(e)), Some(CsaKey::new(o))])
            }
            _ => {
                return Err(ControlError::InvalidKey(
                    "even and odd control words use different ciphers".to_string(),
                ))
            }
        };
        info!("control words changed");
        Ok(())
    }

    /// Validate a flow definition and feed it through the pipe as an
    /// in-band control record.
    pub fn set_flow_def(&mut self, flow: FlowDef) -> Result<Vec<StreamItem>, ControlError> {
        flow.check()?;
        Ok(self.push(StreamItem::FlowDef(flow)))
    }

    /// Add a PID to the descramble filter.
    pub fn add_pid(&mut self, pid: u16) {
        self.pids.add(pid);
    }

    /// Remove a PID from the descramble filter.
    pub fn del_pid(&mut self, pid: u16) {
        self.pids.del(pid);
    }

    /// Downstream flow definition last published.
    pub fn flow_def(&self) -> Option<&FlowDef> {
        self.out_flow.as_ref()
    }

    /// Deadline of the pending flush, if armed.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadline.get()
    }

    /// Number of items currently held back.
    pub fn held(&self) -> usize {
        self.hold.len()
    }

    /// Check whether the pending-output handle is held.
    pub fn retained(&self) -> bool {
        self.retained
    }

    /// Feed one item through the pipe. Returns the items emitted
    /// downstream, in order. Never fails: malformed packets are dropped.
    pub fn push(&mut self, item: StreamItem) -> Vec<StreamItem> {
        let mut out = Vec::new();
        self.handle(item, &mut out);
        out
    }

    /// Flush the open batch and drain the hold queue downstream.
    pub fn flush(&mut self) -> Vec<StreamItem> {
        let mut out = Vec::new();
        self.flush_into(&mut out);
        out
    }

    /// Timer callback: flush if the armed deadline has expired. A firing
    /// that races a flush which already cancelled the deadline is ignored.
    pub fn on_deadline(&mut self, now: Instant) -> Vec<StreamItem> {
        if self.deadline.is_due(now) {
            self.flush()
        } else {
            Vec::new()
        }
    }

    fn handle(&mut self, item: StreamItem, out: &mut Vec<StreamItem>) {
        let first = self.hold.is_empty();

        let packet = match item {
            StreamItem::FlowDef(flow) => {
                if first {
                    self.apply_flow_def(flow, out);
                } else {
                    self.hold.push_back(HeldItem::Flow(flow));
                }
                return;
            }
            StreamItem::Packet(packet) => packet,
        };

        // Pass through while no key is installed.
        if !self.backend.has_even_key() {
            if !first {
                self.flush_into(out);
            }
            out.push(StreamItem::Packet(packet));
            return;
        }

        let header = match TsHeader::parse(&packet.data) {
            Ok(header) => header,
            Err(err) => {
                warn!("dropping packet: {err}");
                return;
            }
        };

        let (parity, valid) = match header.scrambling {
            ScramblingControl::Even => (Parity::Even, true),
            ScramblingControl::Odd => (Parity::Odd, self.backend.has_key(Parity::Odd)),
            _ => (Parity::Even, false),
        };

        if !valid || !header.has_payload() || !self.pids.contains(header.pid) {
            if first {
                out.push(StreamItem::Packet(packet));
            } else {
                self.hold.push_back(HeldItem::Clear(packet));
            }
            return;
        }

        let payload_off = match ts::payload_offset(&packet.data, &header) {
            Ok(off) => off,
            Err(err) => {
                warn!("dropping packet: {err}");
                return;
            }
        };

        // Items may still be held from a previous batching mode; drain
        // them before a direct emit so input order is kept.
        if !self.backend.is_batched() && !self.hold.is_empty() {
            self.flush_into(out);
        }

        // The input buffer may be shared upstream; descramble a private
        // copy and publish that.
        let mut buf = BytesMut::from(&packet.data[..]);
        ts::clear_scrambling(&mut buf);

        match &self.backend {
            CipherBackend::Aes(keys) => {
                if let Some(key) = &keys[parity.index()] {
                    if let Err(err) = key.descramble(&mut buf[payload_off..]) {
                        warn!("{err}");
                    }
                }
                out.push(StreamItem::Packet(TsPacket {
                    data: buf.freeze(),
                    pts: packet.pts,
                }));
            }
            CipherBackend::Csa(keys) => {
                if let Some(key) = &keys[parity.index()] {
                    key.descramble(&mut buf[payload_off..]);
                }
                out.push(StreamItem::Packet(TsPacket {
                    data: buf.freeze(),
                    pts: packet.pts,
                }));
            }
            CipherBackend::CsaBs(_) => {
                if !self.batch.is_empty() && self.batch_parity != parity {
                    self.flush_into(out);
                }
                self.batch_parity = parity;

                let was_empty = self.hold.is_empty();
                self.batch.push(BatchEntry {
                    hold_index: self.hold.len(),
                    payload_off,
                });
                self.hold.push_back(HeldItem::Pending {
                    buf,
                    pts: packet.pts,
                });

                if was_empty {
                    debug_assert!(!self.retained);
                    self.retained = true;
                    self.deadline.arm(Instant::now() + self.latency);
                }

                if self.batch.is_full() {
                    self.flush_into(out);
                }
            }
        }
    }

    fn flush_into(&mut self, out: &mut Vec<StreamItem>) {
        self.deadline.cancel();

        if !self.batch.is_empty() {
            let mut descrambled = false;
            if let CipherBackend::CsaBs(keys) = &self.backend {
                if let Some(key) = &keys[self.batch_parity.index()] {
                    let mut payloads: Vec<&mut [u8]> = Vec::with_capacity(self.batch.len());
                    let mut entries = self.batch.entries().iter();
                    let mut next = entries.next();
                    for (index, held) in self.hold.iter_mut().enumerate() {
                        let Some(entry) = next else { break };
                        if entry.hold_index != index {
                            continue;
                        }
                        if let HeldItem::Pending { buf, .. } = held {
                            payloads.push(&mut buf[entry.payload_off..]);
                        }
                        next = entries.next();
                    }
                    let before = std::time::Instant::now();
                    key.descramble_batch(&mut payloads, TS_PAYLOAD_MAX);
                    let elapsed = before.elapsed();
                    if elapsed > CSA_LATENCY {
                        warn!("descramble latency too high: {} ms", elapsed.as_millis());
                    }
                    descrambled = true;
                }
            }
            if !descrambled {
                // The register changed under the open batch; the payloads
                // are still scrambled, so their headers must say so again.
                warn!("batch keys are gone, restoring scrambling marks");
                let control = match self.batch_parity {
                    Parity::Even => ScramblingControl::Even,
                    Parity::Odd => ScramblingControl::Odd,
                };
                for held in self.hold.iter_mut() {
                    if let HeldItem::Pending { buf, .. } = held {
                        ts::set_scrambling(buf, control);
                    }
                }
            }
            self.batch.clear();
        }

        while let Some(held) = self.hold.pop_front() {
            match held {
                HeldItem::Clear(packet) => out.push(StreamItem::Packet(packet)),
                HeldItem::Pending { buf, pts } => out.push(StreamItem::Packet(TsPacket {
                    data: buf.freeze(),
                    pts,
                })),
                HeldItem::Flow(flow) => self.apply_flow_def(flow, out),
            }
        }

        self.retained = false;
    }

    fn apply_flow_def(&mut self, mut flow: FlowDef, out: &mut Vec<StreamItem>) {
        if self.backend.is_batched() {
            flow.latency += self.latency + CSA_LATENCY;
        }
        debug!(
            "publishing flow definition {:?}, latency {:?}",
            flow.def, flow.latency
        );
        self.out_flow = Some(flow.clone());
        out.push(StreamItem::FlowDef(flow));
    }
}
