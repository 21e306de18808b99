//! `tether`: drive a tethered camera from the command line.
//!
//! Runs against the simulated camera unless built with `edsdk_hardware` and
//! started with `--hardware`.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use eos_tether::config::EngineConfig;
use eos_tether::engine::Engine;
use eos_tether::events::{EventKind, LoggingListener};
use eos_tether::hardware::mock::MockSdk;
use eos_tether::hardware::{PropertyId, PropertyValue};
use eos_tether::properties::label_for;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tether", version, about = "Tethered Canon camera control")]
struct Cli {
    /// Configuration file (TOML). Missing files are ignored.
    #[arg(short, long, default_value = "tether.toml")]
    config: PathBuf,

    /// Overrides `logging.level` and RUST_LOG
    #[arg(long)]
    log_level: Option<String>,

    /// Use the Canon EDSDK instead of the simulated camera
    #[cfg(feature = "edsdk_hardware")]
    #[arg(long)]
    hardware: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List connected cameras
    List,
    /// Take pictures and save them
    Capture {
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,
        /// Seconds to wait for each transfer
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },
    /// Save live-view frames
    LiveView {
        #[arg(short = 'n', long, default_value_t = 30)]
        frames: u32,
        #[arg(long)]
        fps: Option<f64>,
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },
    /// Read a property (name or hex id, e.g. `iso` or `0x402`)
    GetProp { property: String },
    /// Write a numeric property value
    SetProp { property: String, value: String },
    /// Show exposure settings and the values the camera accepts
    Settings,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = EngineConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("eos_tether={level},tether={level}")))
        .context("invalid log filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let engine = start_engine(&cli, config)?;
    let result = run(&engine, cli.command).await;
    engine.shutdown().await?;
    result
}

fn start_engine(cli: &Cli, config: EngineConfig) -> Result<Engine> {
    #[cfg(feature = "edsdk_hardware")]
    if cli.hardware {
        return Engine::edsdk(config).context("starting EDSDK engine");
    }
    let _ = cli;
    Engine::new(Arc::new(MockSdk::new()), config).context("starting simulated engine")
}

async fn run(engine: &Engine, command: Commands) -> Result<()> {
    if let Commands::List = command {
        let cameras = engine.list_cameras().await?;
        if cameras.is_empty() {
            println!("No cameras connected");
        }
        for (i, camera) in cameras.iter().enumerate() {
            println!("[{i}] {} ({})", camera.description, camera.port_name);
        }
        return Ok(());
    }

    engine.connect(None).await.context("connecting to camera")?;
    engine.subscribe(EventKind::CameraStateChanged, Arc::new(LoggingListener));

    match command {
        Commands::List => {}
        Commands::Capture {
            out,
            count,
            timeout,
        } => {
            tokio::fs::create_dir_all(&out).await?;
            for _ in 0..count {
                let image = engine.capture(Duration::from_secs(timeout)).await?;
                let path = out.join(&image.file_name);
                tokio::fs::write(&path, &image.data)
                    .await
                    .with_context(|| format!("writing {}", path.display()))?;
                println!("Saved {} ({} bytes)", path.display(), image.data.len());
            }
        }
        Commands::LiveView { frames, fps, out } => {
            tokio::fs::create_dir_all(&out).await?;
            let fps = fps.unwrap_or_else(|| 1.0 / engine.live_view().frame_interval.as_secs_f64());
            let (mut rx, guard) = engine.stream_frames(fps).await?;
            let mut saved = 0;
            while saved < frames {
                let Some(frame) = rx.recv().await else {
                    break;
                };
                let path = out.join(format!("frame_{:05}.jpg", frame.sequence));
                tokio::fs::write(&path, &frame.data).await?;
                saved += 1;
            }
            drop(guard);
            engine.stop_live_view().await?;
            println!("Saved {saved} frames to {}", out.display());
        }
        Commands::GetProp { property } => {
            let id = parse_property(&property)?;
            let value = engine.get_property(id).await?;
            match value.as_u32().and_then(|code| label_for(id, code)) {
                Some(label) => println!("{id} = {value} [{label}]"),
                None => println!("{id} = {value}"),
            }
        }
        Commands::SetProp { property, value } => {
            let id = parse_property(&property)?;
            let value = parse_number(&value)?;
            engine.set_property(id, PropertyValue::UInt32(value)).await?;
            println!("{id} set to {value}");
        }
        Commands::Settings => {
            print!("{}", engine.read_exposure_settings().await?);
            for id in [PropertyId::ISO_SPEED, PropertyId::AV, PropertyId::TV] {
                let values = engine.property_desc(id).await?;
                let labels: Vec<String> = values
                    .iter()
                    .filter_map(|v| u32::try_from(*v).ok())
                    .map(|code| label_for(id, code).unwrap_or_else(|| format!("0x{code:X}")))
                    .collect();
                println!("{id} accepts: {}", labels.join(", "));
            }
        }
    }

    engine.disconnect().await?;
    Ok(())
}

fn parse_property(s: &str) -> Result<PropertyId> {
    let id = match s.to_ascii_lowercase().as_str() {
        "iso" => PropertyId::ISO_SPEED,
        "av" | "aperture" => PropertyId::AV,
        "tv" | "shutter" => PropertyId::TV,
        "ae" | "mode" => PropertyId::AE_MODE,
        "metering" => PropertyId::METERING_MODE,
        "ec" | "exposure_comp" => PropertyId::EXPOSURE_COMPENSATION,
        "quality" => PropertyId::IMAGE_QUALITY,
        "battery" => PropertyId::BATTERY_LEVEL,
        "shots" => PropertyId::AVAILABLE_SHOTS,
        "name" => PropertyId::PRODUCT_NAME,
        other => PropertyId(parse_number(other)?),
    };
    Ok(id)
}

fn parse_number(s: &str) -> Result<u32> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    match parsed {
        Ok(n) => Ok(n),
        Err(_) => bail!("not a number or known property: {s}"),
    }
}
