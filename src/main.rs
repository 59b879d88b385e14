mod config;
mod logging;
mod tone;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use config::AppConfig;
use iohal_engine::hw::mask::ChannelMask;
use iohal_engine::hw::sim::SimClock;
use iohal_engine::hw::{
    AudioHardware, AudioIoDevice, DeviceEnumerator, Direction, HwOptions, SimulatedHardware,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tone::ToneCallback;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "iohal")]
#[command(about = "Inspect and exercise audio devices", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List input and output devices
    List {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Play a tone and meter inputs on the configured devices
    Run {
        /// TOML configuration file
        config: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct DeviceListing {
    inputs: Vec<String>,
    outputs: Vec<String>,
    default_input: usize,
    default_output: usize,
}

struct Hardware {
    hw: Arc<dyn AudioHardware>,
    sim: Option<Arc<SimulatedHardware>>,
}

impl Hardware {
    fn select() -> Self {
        if iohal_engine::simulator_selected() {
            info!("using simulated hardware");
            let sim = Arc::new(SimulatedHardware::with_default_devices());
            Self {
                hw: sim.clone(),
                sim: Some(sim),
            }
        } else {
            Self {
                hw: iohal_engine::default_hardware(),
                sim: None,
            }
        }
    }
}

fn list(hardware: &Hardware, json: bool) -> Result<()> {
    let mut enumerator = DeviceEnumerator::new(Arc::clone(&hardware.hw), HwOptions::default());
    let (inputs, outputs) = enumerator.scan()?;
    let listing = DeviceListing {
        default_input: enumerator.default_index(Direction::Input)?,
        default_output: enumerator.default_index(Direction::Output)?,
        inputs,
        outputs,
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }
    for (title, names, default) in [
        ("Inputs", &listing.inputs, listing.default_input),
        ("Outputs", &listing.outputs, listing.default_output),
    ] {
        println!("{title}:");
        for (i, name) in names.iter().enumerate() {
            let marker = if i == default { "*" } else { " " };
            println!(" {marker} {i}: {name}");
        }
    }
    Ok(())
}

fn create_device(enumerator: &mut DeviceEnumerator, config: &AppConfig) -> Result<AudioIoDevice> {
    let (_, outputs) = enumerator.scan()?;
    let output = if config.output_device.is_empty() {
        let index = enumerator.default_index(Direction::Output)?;
        match outputs.get(index) {
            Some(name) => name.clone(),
            None => bail!("no output devices"),
        }
    } else {
        config.output_device.clone()
    };
    let device = if config.input_device.is_empty() && config.pair_related {
        enumerator.create_device_with_related(&output)?
    } else {
        enumerator.create_device(&output, &config.input_device)?
    };
    Ok(device)
}

/// Drives simulated devices from clock threads so callbacks actually run.
fn start_clocks(sim: &Arc<SimulatedHardware>, device: &AudioIoDevice) -> Vec<SimClock> {
    let frames = device.current_buffer_size().max(1) as f64;
    let period = Duration::from_secs_f64(frames / device.current_sample_rate().max(1.0));
    let layout = device.layout();
    let mut ids = vec![layout.primary().id()];
    if let Some(secondary) = layout.secondary() {
        ids.insert(0, secondary.id());
    }
    for &id in &ids {
        sim.set_input_level(id, 0.05);
    }
    ids.into_iter()
        .map(|id| sim.spawn_clock(id, period))
        .collect()
}

async fn run(hardware: &Hardware, config_path: Option<PathBuf>) -> Result<()> {
    let config = AppConfig::load(config_path.as_deref())?;
    let mut enumerator = DeviceEnumerator::new(Arc::clone(&hardware.hw), config.hw);
    let mut device = create_device(&mut enumerator, &config)?;

    let sample_rate = if config.sample_rate > 0.0 {
        config.sample_rate
    } else {
        device.current_sample_rate()
    };
    device
        .open(
            &ChannelMask::first(config.input_channels),
            &ChannelMask::first(config.output_channels),
            sample_rate,
            config.buffer_size,
        )
        .with_context(|| format!("opening {}", device.name()))?;
    info!(
        "{}: inputs {:?}, outputs {:?}, latency {} in / {} out frames",
        device.name(),
        device.input_channel_names(),
        device.output_channel_names(),
        device.input_latency(),
        device.output_latency()
    );

    let tone = Arc::new(ToneCallback::new(config.tone.frequency, config.tone.gain));
    device.start(tone.clone())?;
    let mut clocks = match &hardware.sim {
        Some(sim) => start_clocks(sim, &device),
        None => Vec::new(),
    };

    let deadline = async {
        match config.duration_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);
    let mut meter = tokio::time::interval(Duration::from_millis(500));
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("waiting for Ctrl-C")?;
                info!("interrupted");
                break;
            }
            _ = &mut deadline => break,
            _ = meter.tick() => {
                if !device.is_playing() {
                    warn!("device stopped playing: {}", device.last_error_text());
                    break;
                }
                info!("input peak {:.3}", tone.take_input_peak());
            }
        }
    }

    device.stop();
    for clock in &mut clocks {
        clock.stop();
    }
    device.close();
    info!("stopped after {} stop notification(s)", tone.stop_count());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();
    let hardware = Hardware::select();
    match cli.command {
        Command::List { json } => list(&hardware, json),
        Command::Run { config } => run(&hardware, config).await,
    }
}
