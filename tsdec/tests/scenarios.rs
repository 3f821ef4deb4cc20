// End-to-end descrambling scenarios: pass-through, per-packet CSA, batch
// fill, parity flip, deadline flush and CISSA. Scrambled inputs are built
// with the kernels' own scramble direction.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use tsdec::descrambler::{Descrambler, CSA_LATENCY};
use tsdec::driver;
use tsdec::flow::FlowDef;
use tsdec::types::{StreamItem, TsPacket};
use tsdec_core::ts::SYNC_BYTE;
use tsdec_core::{CissaKey, CsaKey, BATCH_WIDTH};

const EVEN_CW: [u8; 8] = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88];
const ODD_CW: [u8; 8] = [0xa1, 0xb2, 0xc3, 0xd4, 0xe5, 0xf6, 0x07, 0x18];
const AES_KEY: [u8; 16] = [
    0x2b, 0x7e, 0x15, 0x16, 0x28, 0xae, 0xd2, 0xa6, 0xab, 0xf7, 0x15, 0x88, 0x09, 0xcf, 0x4f,
    0x3c,
];

const EVEN_HEX: &str = "1122334455667788";
const ODD_HEX: &str = "a1b2c3d4e5f60718";
const AES_HEX: &str = "2b7e151628aed2a6abf7158809cf4f3c";

fn raw_packet(pid: u16, scrambling: u8, counter: u8, fill: u8) -> Vec<u8> {
    let mut packet = vec![fill; 188];
    packet[0] = SYNC_BYTE;
    packet[1] = (pid >> 8) as u8 & 0x1f;
    packet[2] = pid as u8;
    packet[3] = (scrambling << 6) | 0x10 | (counter & 0x0f);
    packet
}

fn csa_scrambled(pid: u16, scrambling: u8, counter: u8, fill: u8, cw: [u8; 8]) -> TsPacket {
    let mut raw = raw_packet(pid, scrambling, counter, fill);
    CsaKey::new(cw).scramble(&mut raw[4..]);
    TsPacket::new(Bytes::from(raw))
}

fn payload_of(item: &StreamItem) -> &[u8] {
    match item {
        StreamItem::Packet(packet) => &packet.data[4..],
        StreamItem::FlowDef(_) => panic!("expected a packet"),
    }
}

fn scrambling_bits(item: &StreamItem) -> u8 {
    match item {
        StreamItem::Packet(packet) => packet.data[3] >> 6,
        StreamItem::FlowDef(_) => panic!("expected a packet"),
    }
}

// S1: without a key the stream passes through verbatim, in order.
#[test]
fn passthrough_without_key() {
    let mut pipe = Descrambler::new(None);
    pipe.add_pid(0x100);

    let packets: Vec<TsPacket> = (0..3)
        .map(|i| TsPacket::new(Bytes::from(raw_packet(0x100, 0b10, i, 0x20 + i))))
        .collect();

    let mut out = Vec::new();
    for packet in &packets {
        out.extend(pipe.push(StreamItem::Packet(packet.clone())));
    }
    assert_eq!(out.len(), 3);
    for (emitted, expected) in out.iter().zip(&packets) {
        assert_eq!(emitted, &StreamItem::Packet(expected.clone()));
    }
}

// S2: per-packet CSA with only the even word installed.
#[test]
fn csa_even_only() {
    let mut pipe = Descrambler::new(None);
    pipe.add_pid(0x100);
    pipe.set_key(EVEN_HEX, "").unwrap();

    let out = pipe.push(StreamItem::Packet(csa_scrambled(
        0x100, 0b10, 0, 0x9c, EVEN_CW,
    )));
    assert_eq!(out.len(), 1);
    assert_eq!(scrambling_bits(&out[0]), 0);
    assert!(payload_of(&out[0]).iter().all(|&b| b == 0x9c));
}

// S3: batch mode fills to the backend width, then flushes once; the timer
// never fires.
#[test]
fn batch_fill_flushes_once() {
    let mut pipe = Descrambler::new(Some(FlowDef::new("block.mpegts.", Duration::ZERO)));
    pipe.add_pid(0x200);
    pipe.set_key(EVEN_HEX, "").unwrap();

    let mut out = Vec::new();
    for i in 0..BATCH_WIDTH {
        let emitted = pipe.push(StreamItem::Packet(csa_scrambled(
            0x200, 0b10, i as u8, i as u8, EVEN_CW,
        )));
        if i < BATCH_WIDTH - 1 {
            assert!(emitted.is_empty());
        }
        out.extend(emitted);
    }

    assert_eq!(out.len(), BATCH_WIDTH);
    assert!(pipe.next_deadline().is_none());
    for (i, item) in out.iter().enumerate() {
        assert_eq!(scrambling_bits(item), 0);
        assert!(payload_of(item).iter().all(|&b| b == i as u8), "packet {i}");
    }
}

// S4: a parity flip flushes the even batch before the odd packet is
// batched; an explicit flush then emits the odd one.
#[test]
fn parity_flip_flushes_even_batch() {
    let mut pipe = Descrambler::new(Some(FlowDef::new("block.mpegts.", Duration::ZERO)));
    pipe.add_pid(0x100);
    pipe.set_key(EVEN_HEX, ODD_HEX).unwrap();

    for i in 0..3 {
        assert!(pipe
            .push(StreamItem::Packet(csa_scrambled(
                0x100, 0b10, i, 0x60 + i, EVEN_CW
            )))
            .is_empty());
    }

    let flushed = pipe.push(StreamItem::Packet(csa_scrambled(
        0x100, 0b11, 3, 0xee, ODD_CW,
    )));
    assert_eq!(flushed.len(), 3);
    for (i, item) in flushed.iter().enumerate() {
        assert!(payload_of(item).iter().all(|&b| b == 0x60 + i as u8));
    }

    let rest = pipe.flush();
    assert_eq!(rest.len(), 1);
    assert!(payload_of(&rest[0]).iter().all(|&b| b == 0xee));
}

// S5: with the batch never filling, the armed deadline flushes the held
// packets and releases the retained handle.
#[test]
fn deadline_flushes_partial_batch() {
    let mut pipe = Descrambler::new(Some(FlowDef::new(
        "block.mpegts.",
        Duration::from_millis(8),
    )));
    pipe.add_pid(0x100);
    pipe.set_key(EVEN_HEX, "").unwrap();

    assert!(pipe
        .push(StreamItem::Packet(csa_scrambled(0x100, 0b10, 0, 1, EVEN_CW)))
        .is_empty());
    assert!(pipe
        .push(StreamItem::Packet(csa_scrambled(0x100, 0b10, 1, 2, EVEN_CW)))
        .is_empty());
    assert!(pipe.retained());

    let deadline = pipe.next_deadline().expect("deadline armed");
    let out = pipe.on_deadline(deadline);
    assert_eq!(out.len(), 2);
    assert!(!pipe.retained());
    assert!(payload_of(&out[0]).iter().all(|&b| b == 1));
    assert!(payload_of(&out[1]).iter().all(|&b| b == 2));
}

// S5 through the driver: the runtime timer fires the deadline flush.
#[tokio::test(start_paused = true)]
async fn driver_deadline_flush() {
    let (in_tx, in_rx) = mpsc::channel(16);
    let (out_tx, mut out_rx) = mpsc::channel(16);

    let mut pipe = Descrambler::new(Some(FlowDef::new(
        "block.mpegts.",
        Duration::from_millis(8),
    )));
    pipe.add_pid(0x100);
    pipe.set_key(EVEN_HEX, "").unwrap();
    let (_control, _task) = driver::spawn(pipe, in_rx, out_tx);

    for i in 0..2 {
        in_tx
            .send(StreamItem::Packet(csa_scrambled(
                0x100,
                0b10,
                i,
                0x30 + i,
                EVEN_CW,
            )))
            .await
            .unwrap();
    }

    let first = out_rx.recv().await.expect("deadline flush output");
    let second = out_rx.recv().await.expect("deadline flush output");
    assert!(payload_of(&first).iter().all(|&b| b == 0x30));
    assert!(payload_of(&second).iter().all(|&b| b == 0x31));
}

// Driver control surface: keys and PIDs installed through the command
// channel, input drained on close.
#[tokio::test]
async fn driver_control_and_drain() {
    let (in_tx, in_rx) = mpsc::channel(16);
    let (out_tx, mut out_rx) = mpsc::channel(16);

    let pipe = Descrambler::new(None);
    let (control, task) = driver::spawn(pipe, in_rx, out_tx);

    control.add_pid(0x100).await.unwrap();
    control.set_key(EVEN_HEX, "").await.unwrap();
    assert!(control.set_key(EVEN_HEX, AES_HEX).await.is_err());
    // The failed install cleared the register; reinstall.
    control.set_key(EVEN_HEX, "").await.unwrap();

    in_tx
        .send(StreamItem::Packet(csa_scrambled(
            0x100, 0b10, 0, 0x42, EVEN_CW,
        )))
        .await
        .unwrap();
    drop(in_tx);

    let out = out_rx.recv().await.expect("descrambled packet");
    assert!(payload_of(&out).iter().all(|&b| b == 0x42));
    assert!(out_rx.recv().await.is_none());
    task.await.unwrap();
}

// S6: CISSA decrypts the leading whole AES blocks; trailing bytes beyond
// the largest multiple of 16 pass through untouched.
#[test]
fn cissa_leaves_trailing_bytes() {
    let mut pipe = Descrambler::new(None);
    pipe.add_pid(0x300);
    pipe.set_key(AES_HEX, "").unwrap();

    let mut raw = raw_packet(0x300, 0b10, 0, 0x3c);
    CissaKey::new(AES_KEY).scramble(&mut raw[4..]).unwrap();
    // 184-byte payload: bytes beyond 176 stay clear.
    assert!(raw[180..].iter().all(|&b| b == 0x3c));

    let out = pipe.push(StreamItem::Packet(TsPacket::new(Bytes::from(raw))));
    assert_eq!(out.len(), 1);
    assert_eq!(scrambling_bits(&out[0]), 0);
    assert!(payload_of(&out[0]).iter().all(|&b| b == 0x3c));
}

// Ordering invariant: a flow definition interleaved mid-batch drains in
// place, with the batching latency added on the way out.
#[test]
fn flow_def_keeps_its_position() {
    let mut pipe = Descrambler::new(Some(FlowDef::new(
        "block.mpegts.",
        Duration::from_millis(20),
    )));
    pipe.add_pid(0x100);
    pipe.set_key(EVEN_HEX, "").unwrap();

    assert!(pipe
        .push(StreamItem::Packet(csa_scrambled(0x100, 0b10, 0, 7, EVEN_CW)))
        .is_empty());
    assert!(pipe
        .set_flow_def(FlowDef::new("block.mpegts.", Duration::from_millis(100)))
        .unwrap()
        .is_empty());
    assert!(pipe
        .push(StreamItem::Packet(csa_scrambled(0x100, 0b10, 1, 8, EVEN_CW)))
        .is_empty());

    let out = pipe.flush();
    assert_eq!(out.len(), 3);
    assert!(payload_of(&out[0]).iter().all(|&b| b == 7));
    let StreamItem::FlowDef(flow) = &out[1] else {
        panic!("expected the flow def between the packets");
    };
    assert_eq!(
        flow.latency,
        Duration::from_millis(100) + Duration::from_millis(20) + CSA_LATENCY
    );
    assert!(payload_of(&out[2]).iter().all(|&b| b == 8));
}
