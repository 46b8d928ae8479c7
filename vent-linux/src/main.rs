//! Ventilator backend host tool: inspect device-link captures and state
//! files, build test frames, and show the effective sync configuration.

mod config;

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use vent_core::device::{DeviceReceiver, DeviceSender};
use vent_core::file::{FileReceiver, StateData, FILE_EXTENSION};
use vent_core::schema::{self, Ping};
use vent_core::{Filter, State, StateKind};

/// Bytes fed to the device receiver per step, like reads from a serial port.
const READ_CHUNK_SIZE: usize = 512;

#[derive(Parser)]
#[command(name = "vent-linux")]
#[command(about = "Ventilator backend protocol tool")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file; default search is ~/.config/ventserver then /etc/ventserver
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the CRC-32C of hex-encoded bytes
    Crc { hex: String },
    /// Decode device-link bytes from a file (or - for stdin) and print each value
    Decode { input: String },
    /// Print device-link frames carrying Ping values, one hex line per frame
    EncodePing {
        id: u32,
        /// Ping time in milliseconds
        #[arg(long, default_value_t = 0)]
        time: u64,
        /// Number of frames; ids and times count up from the first
        #[arg(long, default_value_t = 1)]
        count: u32,
    },
    /// Decode a state file, given as a path or as a state type under state_dir
    DumpState { target: String },
    /// Print the effective sync configuration as TOML
    ShowConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load(cli.config.as_deref())?;
    init_logging(&cfg, cli.verbose);

    match cli.command {
        Commands::Crc { hex } => {
            let bytes = hex::decode(hex.trim()).context("decoding hex")?;
            println!("{:08x}", vent_core::crc::checksum(&bytes));
        }
        Commands::Decode { input } => decode(&read_input(&input)?)?,
        Commands::EncodePing { id, time, count } => encode_ping(id, time, count)?,
        Commands::DumpState { target } => {
            let path = state_path(&cfg.state_dir, &target);
            println!("{:#?}", dump_state(&path)?);
        }
        Commands::ShowConfig => {
            print!("{}", toml::to_string(&cfg.sync).context("serializing config")?);
        }
    }
    Ok(())
}

fn init_logging(cfg: &config::Config, verbosity: u8) {
    let mut builder = env_logger::Builder::new();
    let base_level = match verbosity {
        0 => cfg.log_filter(),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);
    if let Ok(spec) = std::env::var("RUST_LOG") {
        builder.parse_filters(&spec);
    }
    builder.init();
}

fn read_input(input: &str) -> Result<Vec<u8>> {
    if input == "-" {
        let mut bytes = Vec::new();
        std::io::stdin()
            .read_to_end(&mut bytes)
            .context("reading stdin")?;
        Ok(bytes)
    } else {
        std::fs::read(input).with_context(|| format!("reading {input}"))
    }
}

fn decode(bytes: &[u8]) -> Result<()> {
    let mut receiver = DeviceReceiver::<State>::new(Arc::new(schema::device_registry()));
    let mut decoded = 0usize;
    for chunk in bytes.chunks(READ_CHUNK_SIZE) {
        receiver.input(Some(chunk.to_vec()))?;
        // Corrupt frames are logged by the receiver and skipped.
        while let Some(value) = receiver.output()? {
            println!("{value:?}");
            decoded += 1;
        }
    }
    info!("decoded {decoded} values from {} bytes", bytes.len());
    Ok(())
}

fn encode_ping(id: u32, time: u64, count: u32) -> Result<()> {
    let mut sender = DeviceSender::<State>::new(Arc::new(schema::device_registry()));
    for i in 0..count {
        let ping = Ping {
            time: time + u64::from(i),
            id: id.wrapping_add(i),
        };
        sender.input(Some(State::Ping(ping)))?;
        let Some(frame) = sender.output()? else {
            bail!("could not encode ping {}", id.wrapping_add(i));
        };
        println!("{}", hex::encode(frame));
    }
    Ok(())
}

/// A bare state type name refers to its file under `state_dir`.
fn state_path(state_dir: &Path, target: &str) -> PathBuf {
    match StateKind::from_name(target) {
        Some(kind) => state_dir.join(format!("{}.{FILE_EXTENSION}", kind.name())),
        None => PathBuf::from(target),
    }
}

fn dump_state(path: &Path) -> Result<State> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let state_type = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .with_context(|| format!("no state type in file name {}", path.display()))?;
    let mut receiver = FileReceiver::<State>::new(Arc::new(schema::device_registry()));
    receiver.input(Some(StateData::new(state_type, bytes)))?;
    receiver
        .output()?
        .with_context(|| format!("{} holds no decodable state", path.display()))
}
