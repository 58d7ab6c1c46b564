use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use log::LevelFilter;
use std::path::PathBuf;
use std::sync::Arc;
use ultralite_mbus::mbus::device::parse_variable_data;
use ultralite_mbus::{
    decode_hex, decode_long_frame, init_logger, init_logger_with_level, parse_records,
    Availability, MeterConfig, MeterCoordinator, PollOutcome, ReadingSnapshot,
};

#[derive(Parser)]
#[command(name = "ultralite-cli")]
#[command(about = "Read a heat meter through an optical M-Bus head")]
struct Cli {
    /// JSON configuration file; flags override its values
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Serial device of the optical head
    #[arg(short, long, global = true)]
    device: Option<String>,

    /// Primary address (254 = broadcast)
    #[arg(short, long, global = true)]
    address: Option<u8>,

    /// -v debug, -vv trace (raw frames)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the meter once and print the snapshot as JSON
    Read,
    /// Poll on a schedule until Ctrl-C
    Poll {
        /// Seconds between polls (10-3600)
        #[arg(short, long)]
        interval: Option<u64>,
    },
    /// Decode a captured response frame given as hex
    Decode {
        hex: String,
        /// Also list every decoded record
        #[arg(long)]
        records: bool,
    },
}

fn load_config(cli: &Cli) -> Result<MeterConfig> {
    let mut config = match &cli.config {
        Some(path) => MeterConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => MeterConfig::default(),
    };
    if let Some(device) = &cli.device {
        config.device_path = device.clone();
    }
    if let Some(address) = cli.address {
        config.primary_address = address;
    }
    if let Commands::Poll {
        interval: Some(interval),
    } = cli.command
    {
        config.update_interval_seconds = interval;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn print_json(snapshot: &ReadingSnapshot) -> Result<()> {
    let json = serde_json::to_string_pretty(snapshot).context("serialising snapshot")?;
    println!("{json}");
    Ok(())
}

async fn read_once(config: MeterConfig) -> Result<()> {
    let coordinator = MeterCoordinator::with_serial(config)?;
    match coordinator.refresh().await {
        PollOutcome::Success(snapshot) => print_json(&snapshot),
        PollOutcome::Failed(e) => Err(e).context("reading meter"),
    }
}

async fn poll_forever(config: MeterConfig) -> Result<()> {
    let coordinator = Arc::new(MeterCoordinator::with_serial(config)?);
    let Some(poller) = coordinator.spawn() else {
        bail!("update interval is 0; nothing to schedule");
    };

    let mut states = coordinator.subscribe();
    loop {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = states.borrow_and_update().clone();
                if state.polls == 0 {
                    continue;
                }
                match (&state.last_snapshot, state.availability) {
                    (Some(snapshot), Availability::Available)
                        if state.consecutive_failures == 0 =>
                    {
                        print_json(snapshot)?;
                    }
                    _ => {
                        if let Some(e) = &state.last_error {
                            log::info!(
                                "{:?}, {} failures in a row, last error: {e}",
                                state.availability,
                                state.consecutive_failures
                            );
                        }
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("stopping");
                break;
            }
        }
    }

    poller.shutdown().await;
    Ok(())
}

fn decode_offline(hex: &str, list_records: bool) -> Result<()> {
    let bytes = decode_hex(hex).context("parsing hex")?;

    if list_records {
        let frame = decode_long_frame(&bytes).context("validating frame")?;
        let (header, payload) = parse_variable_data(&frame)?;
        println!(
            "{} v{} {} (access {}), status {:?}",
            header.manufacturer,
            header.version,
            header.medium_name(),
            header.access_number,
            header.status
        );
        for record in parse_records(payload)?.iter() {
            println!(
                "  @{:<3} DIF {:02X} storage {} tariff {} {:?}: {:?} {}",
                record.offset,
                record.dib.dif,
                record.dib.storage_number,
                record.dib.tariff,
                record.quantity,
                record.value,
                record.unit
            );
        }
    }

    let snapshot = ReadingSnapshot::from_frame_bytes(&bytes, chrono::Utc::now())?;
    print_json(&snapshot)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.verbose {
        0 => init_logger(),
        1 => init_logger_with_level(LevelFilter::Debug),
        _ => init_logger_with_level(LevelFilter::Trace),
    }

    match &cli.command {
        Commands::Decode { hex, records } => decode_offline(hex, *records),
        Commands::Read => read_once(load_config(&cli)?).await,
        Commands::Poll { .. } => poll_forever(load_config(&cli)?).await,
    }
}
