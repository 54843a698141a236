//! regsim - drive a simulated register device from the terminal
//!
//! Every invocation builds a fresh simulator from the loaded configuration,
//! brings it to Ready, runs one command and releases it again. Writes do not
//! persist between invocations.

mod output;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use tracing::{debug, info};
use voltage_hal::catalog::addr;
use voltage_hal::{
    load_config, ByteOrder, CancellationToken, ChannelSink, Device, NullSink, Scenario,
    SharedEventSink, SimulatedDevice, SimulatorConfig,
};

/// Registers polled once a second by `run`
const SAMPLED: [u32; 2] = [addr::TEMPERATURE, addr::HUMIDITY];

#[derive(Parser)]
#[command(name = "regsim")]
#[command(about = "Simulated register device for VoltageEMS")]
#[command(long_about = "Simulated register device for VoltageEMS

Examples:
  regsim run --seconds 10              # Stream device events for ten seconds
  regsim read 0x1002 2                 # Read the temperature register
  regsim write 0x1030 0x0D             # Write INT_CONFIG
  regsim fields 0x1001                 # Decode STATUS bit fields
  regsim maps                          # Print the register catalog as YAML")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Simulator configuration file (toml, yaml or json)
    #[arg(short, long, global = true, env = "REGSIM_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter, e.g. "info" or "voltage_hal=trace"
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Override the configured scenario
    #[arg(short, long, global = true, value_parser = parse_scenario)]
    scenario: Option<Scenario>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the device and stream its events
    Run {
        /// Stop after this many seconds (Ctrl+C stops earlier)
        #[arg(long, default_value_t = 10)]
        seconds: u64,
    },

    /// Read a byte range
    Read {
        /// Start address (0x hex or decimal)
        #[arg(value_parser = parse_number)]
        address: u32,

        /// Number of bytes
        #[arg(default_value_t = 1)]
        length: usize,
    },

    /// Write bytes starting at an address
    Write {
        /// Start address (0x hex or decimal)
        #[arg(value_parser = parse_number)]
        address: u32,

        /// Bytes to write (0x hex or decimal)
        #[arg(required = true, value_parser = parse_byte)]
        bytes: Vec<u8>,
    },

    /// Decode the bit fields of a register
    Fields {
        /// Register address (0x hex or decimal)
        #[arg(value_parser = parse_number)]
        address: u32,
    },

    /// Print the register catalog as YAML
    Maps,

    /// Show device identity and communication settings
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    tracing_subscriber::fmt()
        .with_env_filter(cli.log_level.as_str())
        .with_target(false)
        .init();

    let mut config = load_config(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(scenario) = cli.scenario {
        config.scenario = scenario;
    }
    debug!("Device {} with scenario {}", config.device_id, config.scenario);

    match cli.command {
        Commands::Run { seconds } => run(config, Duration::from_secs(seconds)).await,
        Commands::Read { address, length } => {
            let device = start(config, Arc::new(NullSink)).await?;
            let cancel = CancellationToken::new();
            let result = device.read_register(address, length, &cancel).await?;
            output::print_result("read", &result);
            device.dispose().await;
            Ok(())
        },
        Commands::Write { address, bytes } => {
            let device = start(config, Arc::new(NullSink)).await?;
            let cancel = CancellationToken::new();
            let result = device.write_register(address, &bytes, &cancel).await?;
            output::print_result("write", &result);
            device.dispose().await;
            Ok(())
        },
        Commands::Fields { address } => fields(config, address).await,
        Commands::Maps => {
            let device = SimulatedDevice::new(config, Arc::new(NullSink))?;
            let yaml = serde_yaml::to_string(device.get_register_maps().as_slice())
                .context("Failed to render register maps")?;
            print!("{}", yaml);
            Ok(())
        },
        Commands::Info => {
            let device = SimulatedDevice::new(config, Arc::new(NullSink))?;
            output::print_info(&device.get_device_info(), &device.get_communication_config());
            Ok(())
        },
    }
}

/// Build the simulator and bring it to Ready
async fn start(config: SimulatorConfig, sink: SharedEventSink) -> Result<SimulatedDevice> {
    let device = SimulatedDevice::new(config, sink)?;
    if !device.initialize(&CancellationToken::new()).await? {
        bail!("Device {} failed to initialize", device.id());
    }
    Ok(device)
}

async fn run(config: SimulatorConfig, duration: Duration) -> Result<()> {
    let (sink, mut events) = ChannelSink::channel();
    let cancel = CancellationToken::new();

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            output::print_event(&event);
        }
    });

    let device = SimulatedDevice::new(config, Arc::new(sink))?;
    if !device.initialize(&cancel).await? {
        println!("{} device did not reach Ready", "warning:".yellow().bold());
    }
    info!("Streaming events for {}s", duration.as_secs());

    let maps = device.get_register_maps();
    let mut poll = tokio::time::interval(Duration::from_secs(1));
    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                println!();
                println!("{}", "Interrupted".yellow());
                cancel.cancel();
                break;
            }
            _ = poll.tick() => {
                for map in maps.iter().filter(|m| SAMPLED.contains(&m.address)) {
                    let value = device
                        .read_u16(map.address, ByteOrder::LittleEndian, &cancel)
                        .await?;
                    output::print_reading(map, &value);
                }
            }
        }
    }

    let stats = device.statistics();
    device.dispose().await;
    // the device owned the only sender
    drop(device);
    let _ = printer.await;

    output::print_statistics(&stats);
    Ok(())
}

async fn fields(config: SimulatorConfig, address: u32) -> Result<()> {
    let device = start(config, Arc::new(NullSink)).await?;
    let maps = device.get_register_maps();
    let Some(map) = maps.iter().find(|m| m.address == address) else {
        bail!("No register starts at 0x{:04X}", address);
    };

    let cancel = CancellationToken::new();
    match device.read_register_fields(map, &cancel).await? {
        Ok(values) => output::print_fields(map, &values),
        Err(failure) => println!("{} {}", "failed:".red().bold(), failure.friendly_message()),
    }
    device.dispose().await;
    Ok(())
}

/// Accepts `0x`-prefixed hex or decimal
fn parse_number(s: &str) -> std::result::Result<u32, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number '{}': {}", s, e))
}

fn parse_byte(s: &str) -> std::result::Result<u8, String> {
    let value = parse_number(s)?;
    u8::try_from(value).map_err(|_| format!("'{}' does not fit in a byte", s))
}

fn parse_scenario(s: &str) -> std::result::Result<Scenario, String> {
    Scenario::parse(s).ok_or_else(|| {
        let known: Vec<&str> = Scenario::ALL.iter().map(|s| s.as_str()).collect();
        format!("unknown scenario '{}', expected one of: {}", s, known.join(", "))
    })
}
