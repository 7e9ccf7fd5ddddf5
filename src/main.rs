//! smpte2022-fec - SMPTE 2022-1 FEC tools.
//!
//! Generates column/row FEC streams for an RTP media stream, receives media
//! and FEC streams to output a repaired stream, and inspects packets.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use smpte2022_fec::config::{endpoints, MatrixConfig, ReceiverConfig, DEFAULT_COLUMNS, DEFAULT_ROWS, MP2T_PT};
use smpte2022_fec::generator::{FecCollector, FecGenerator};
use smpte2022_fec::transport::{self, SocketListener};
use smpte2022_fec::{logging, FecPacket, FecReceiver, RtpPacket};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Size of one MPEG2-TS packet.
const TS_PACKET_SIZE: usize = 188;

#[derive(Parser)]
#[command(name = "smpte2022-fec")]
#[command(author, version, about, long_about = None)]
#[command(
    about = "SMPTE 2022-1 FEC generator and receiver for RTP/MPEG2-TS streams",
    long_about = "Computes SMPTE 2022-1 column and row FEC streams for an RTP media stream and repairs a received media stream with them."
)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate FEC streams for an incoming media stream
    Generate {
        /// Media stream to protect
        #[arg(long, default_value = endpoints::MEDIA)]
        media: SocketAddr,

        /// Destination of the column FEC stream
        #[arg(long, default_value = endpoints::COL)]
        col: SocketAddr,

        /// Destination of the row FEC stream
        #[arg(long, default_value = endpoints::ROW)]
        row: SocketAddr,

        /// Horizontal size of the FEC matrix (L)
        #[arg(short = 'l', long, default_value_t = DEFAULT_COLUMNS)]
        columns: u8,

        /// Vertical size of the FEC matrix (D)
        #[arg(short = 'd', long, default_value_t = DEFAULT_ROWS)]
        rows: u8,

        /// Stop after this many seconds (default: run forever)
        #[arg(long)]
        stop_after: Option<u64>,
    },

    /// Receive a media stream and its FEC streams, output the repaired stream
    Receive {
        /// Media stream
        #[arg(long, default_value = endpoints::MEDIA)]
        media: SocketAddr,

        /// Column FEC stream (default: media port + 2)
        #[arg(long)]
        col: Option<SocketAddr>,

        /// Row FEC stream (default: media port + 4)
        #[arg(long)]
        row: Option<SocketAddr>,

        /// Receiver settings (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Media packets kept buffered before output
        #[arg(long)]
        delay: Option<usize>,

        /// Only accept MPEG2-TS media packets
        #[arg(long)]
        only_mp2t: bool,

        /// Output file (default: stdout)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Stop after this many seconds (default: run forever)
        #[arg(long)]
        stop_after: Option<u64>,

        /// Print statistics as JSON
        #[arg(long)]
        stats_json: bool,
    },

    /// Decode a datagram given in hexadecimal
    Inspect {
        /// Datagram bytes, whitespace is ignored
        hex: String,
    },

    /// Run generator and receiver over a lossy in-memory channel
    Simulate {
        /// Horizontal size of the FEC matrix (L)
        #[arg(short = 'l', long, default_value_t = DEFAULT_COLUMNS)]
        columns: u8,

        /// Vertical size of the FEC matrix (D)
        #[arg(short = 'd', long, default_value_t = DEFAULT_ROWS)]
        rows: u8,

        /// Number of media packets
        #[arg(long, default_value = "10000")]
        packets: usize,

        /// Probability of losing a packet (media or FEC)
        #[arg(long, default_value = "0.01")]
        loss: f64,

        /// Random seed (default: random)
        #[arg(long)]
        seed: Option<u64>,

        /// Media packets kept buffered by the receiver
        #[arg(long, default_value = "100")]
        delay: usize,
    },
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Generate {
            media,
            col,
            row,
            columns,
            rows,
            stop_after,
        } => cmd_generate(media, col, row, MatrixConfig::new(columns, rows), stop_after),

        Commands::Receive {
            media,
            col,
            row,
            config,
            delay,
            only_mp2t,
            output,
            stop_after,
            stats_json,
        } => {
            let mut config = match config {
                Some(path) => ReceiverConfig::from_json_file(&path)
                    .with_context(|| format!("Failed to load {}", path.display()))?,
                None => ReceiverConfig::default(),
            };
            if let Some(delay) = delay {
                config.delay = delay;
            }
            config.only_mp2t |= only_mp2t;
            cmd_receive(media, col, row, config, output, stop_after, stats_json)
        }

        Commands::Inspect { hex } => cmd_inspect(&hex),

        Commands::Simulate {
            columns,
            rows,
            packets,
            loss,
            seed,
            delay,
        } => cmd_simulate(MatrixConfig::new(columns, rows), packets, loss, seed, delay),
    }
}

fn cmd_generate(
    media: SocketAddr,
    col: SocketAddr,
    row: SocketAddr,
    matrix: MatrixConfig,
    stop_after: Option<u64>,
) -> Result<()> {
    let listener = SocketListener::new(col, row).context("Failed to open FEC socket")?;
    let mut generator = FecGenerator::new(matrix, listener)?;

    println!("Protecting {} with a {}x{} matrix", media, matrix.columns, matrix.rows);
    println!("  Column FEC: {}", col);
    println!("  Row FEC:    {}", row);

    transport::run_generator(media, &mut generator, stop_after.map(Duration::from_secs))?;

    println!("{}", generator);
    println!("FEC packets sent: {}", generator.listener().sent());
    Ok(())
}

fn cmd_receive(
    media: SocketAddr,
    col: Option<SocketAddr>,
    row: Option<SocketAddr>,
    config: ReceiverConfig,
    output: Option<PathBuf>,
    stop_after: Option<u64>,
    stats_json: bool,
) -> Result<()> {
    let (default_col, default_row) = transport::fec_addresses(media)?;
    let addrs = [media, col.unwrap_or(default_col), row.unwrap_or(default_row)];

    let sink: Box<dyn Write> = match &output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout())),
    };
    let mut receiver = FecReceiver::new(sink, config)?;

    transport::run_receiver(&addrs, &mut receiver, stop_after.map(Duration::from_secs))?;

    if stats_json {
        eprintln!("{}", serde_json::to_string_pretty(receiver.stats())?);
    } else {
        eprintln!("{}", receiver);
    }
    Ok(())
}

fn cmd_inspect(hex: &str) -> Result<()> {
    let compact: String = hex.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = hex::decode(&compact).context("Invalid hexadecimal datagram")?;

    let rtp = RtpPacket::parse(&bytes);
    println!("RTP packet ({} bytes)", bytes.len());
    println!("{}", rtp);

    if rtp.is_fec() {
        println!();
        println!("SMPTE 2022-1 FEC packet");
        println!("{}", FecPacket::parse(&rtp));
    }
    Ok(())
}

fn cmd_simulate(
    matrix: MatrixConfig,
    packets: usize,
    loss: f64,
    seed: Option<u64>,
    delay: usize,
) -> Result<()> {
    if !(0.0..=1.0).contains(&loss) {
        bail!("Loss probability must be between 0 and 1, got {}", loss);
    }
    let seed = seed.unwrap_or_else(|| rand::thread_rng().gen());
    let mut rng = StdRng::seed_from_u64(seed);

    let mut generator = FecGenerator::new(matrix, FecCollector::new())?;
    let mut receiver = FecReceiver::new(Vec::new(), ReceiverConfig::with_delay(delay))?;

    let first_sequence: u16 = rng.gen();
    let mut expected = Vec::new();
    let mut dropped = 0usize;

    for i in 0..packets {
        let mut payload = vec![0u8; TS_PACKET_SIZE * rng.gen_range(1..=7)];
        rng.fill_bytes(&mut payload);
        expected.extend_from_slice(&payload);

        let sequence = first_sequence.wrapping_add(i as u16);
        let timestamp = i as u64 * 3003;
        let media = RtpPacket::create(u32::from(sequence), timestamp, MP2T_PT, payload);
        generator.put_media(media.clone())?;

        if rng.gen_bool(loss) {
            dropped += 1;
        } else {
            receiver.put_media(media)?;
        }

        let (cols, rows) = generator.listener_mut().drain();
        for fec in rows.into_iter().chain(cols) {
            if rng.gen_bool(loss) {
                continue;
            }
            receiver.put_fec(fec)?;
        }
    }
    receiver.flush()?;

    println!("Seed: {}", seed);
    println!("Media packets: {} sent, {} lost on the channel", packets, dropped);
    println!("{}", receiver);
    println!("Lost runs (length: count): {:?}", receiver.stats().lost_runs);

    let repaired = receiver.get_ref() == &expected;
    println!("Repaired stream matches original: {}", if repaired { "yes" } else { "no" });
    Ok(())
}
