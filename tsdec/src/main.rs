//! TS descrambler front end.
//!
//! Reads 188-byte transport stream packets from a file or standard input,
//! descrambles the selected PIDs with the given control words and writes
//! the cleartext stream out.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use clap::Parser;
use clap_num::maybe_hex;
use log::warn;
use tokio::sync::mpsc;

use tsdec::descrambler::Descrambler;
use tsdec::driver;
use tsdec::flow::{FlowDef, FLOW_PREFIX};
use tsdec::types::{StreamItem, TsPacket};
use tsdec_core::ts::{SYNC_BYTE, TS_PACKET_SIZE};

/// Channel depth between the reader, the pipe and the writer.
const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Parser)]
#[clap(name = "tsdec")]
#[clap(about = "Descramble an MPEG-TS stream with DVB-CSA or BISS-2 CISSA control words.")]
#[clap(version)]
struct Cli {
    /// Input TS file; standard input when omitted.
    #[clap(short, long, value_name = "FILE")]
    input: Option<PathBuf>,

    /// Output TS file; standard output when omitted.
    #[clap(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Even control word: 12 or 16 hex chars for CSA, 32 for CISSA.
    #[clap(long, value_name = "HEX")]
    key0: String,

    /// Odd control word, same encoding length as key0.
    #[clap(long, value_name = "HEX", default_value = "")]
    key1: String,

    /// PID to descramble; may be given several times.
    #[clap(long = "pid", value_name = "PID", required = true, value_parser = maybe_hex::<u16>)]
    pids: Vec<u16>,

    /// Latency budget in milliseconds; enables batched descrambling.
    #[clap(long, value_name = "MS")]
    latency: Option<u64>,

    /// Enable debug logging.
    #[clap(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> io::Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_default_env()
        .filter_level(if cli.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    let flow = cli
        .latency
        .map(|ms| FlowDef::new(FLOW_PREFIX, Duration::from_millis(ms)));
    let mut pipe = Descrambler::new(flow);
    for &pid in &cli.pids {
        pipe.add_pid(pid);
    }
    if let Err(err) = pipe.set_key(&cli.key0, &cli.key1) {
        eprintln!("tsdec: {err}");
        std::process::exit(2);
    }

    let (in_tx, in_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (out_tx, mut out_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (_control, task) = driver::spawn(pipe, in_rx, out_tx);

    let output = cli.output.clone();
    let writer = tokio::task::spawn_blocking(move || -> io::Result<()> {
        let mut sink: Box<dyn Write> = match output {
            Some(path) => Box::new(BufWriter::new(File::create(path)?)),
            None => Box::new(BufWriter::new(io::stdout().lock())),
        };
        while let Some(item) = out_rx.blocking_recv() {
            if let StreamItem::Packet(packet) = item {
                sink.write_all(&packet.data)?;
            }
        }
        sink.flush()
    });

    let input = cli.input.clone();
    let reader = tokio::task::spawn_blocking(move || -> io::Result<()> {
        let mut source: Box<dyn Read> = match input {
            Some(path) => Box::new(BufReader::new(File::open(path)?)),
            None => Box::new(BufReader::new(io::stdin().lock())),
        };
        let mut buf = [0u8; TS_PACKET_SIZE];
        loop {
            if !read_packet(&mut source, &mut buf)? {
                break;
            }
            let packet = TsPacket::new(Bytes::copy_from_slice(&buf));
            if in_tx.blocking_send(StreamItem::Packet(packet)).is_err() {
                break;
            }
        }
        Ok(())
    });

    reader
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))??;
    task.await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    writer
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))??;
    Ok(())
}

/// Read one sync-aligned packet. Returns false on a clean end of stream.
///
/// Reads are not guaranteed to stay aligned to 188-byte boundaries; when
/// the sync byte is missing, scan forward one byte at a time until the
/// stream locks again.
fn read_packet(source: &mut dyn Read, buf: &mut [u8; TS_PACKET_SIZE]) -> io::Result<bool> {
    if !read_exact_or_eof(source, buf)? {
        return Ok(false);
    }
    if buf[0] == SYNC_BYTE {
        return Ok(true);
    }

    let mut skipped = 0usize;
    loop {
        match buf.iter().position(|&b| b == SYNC_BYTE) {
            Some(offset) => {
                skipped += offset;
                buf.copy_within(offset.., 0);
                let tail = TS_PACKET_SIZE - offset;
                if !read_exact_or_eof(source, &mut buf[tail..])? {
                    return Ok(false);
                }
                warn!("resynchronized TS after {skipped} bytes");
                return Ok(true);
            }
            None => {
                skipped += TS_PACKET_SIZE;
                if !read_exact_or_eof(source, buf)? {
                    return Ok(false);
                }
            }
        }
    }
}

fn read_exact_or_eof(source: &mut dyn Read, buf: &mut [u8]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => {
                if filled > 0 {
                    warn!("discarding {filled} trailing bytes");
                }
                return Ok(false);
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}
