mod console;
mod source;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};

use prism_engine::device::DeviceInit;
use prism_engine::display::SurfaceSlot;
use prism_engine::logging::{init_logging, LoggingConfig};
use prism_engine::pipeline::PipelineResolution;
use prism_engine::time::format_millis;
use prism_engine::{RenderSession, SessionConfig, StrategyKind};

use crate::console::ConsoleDisplay;

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum StrategyArg {
    Single,
    Multi,
    Compute,
    All,
}

impl StrategyArg {
    fn kinds(self) -> &'static [StrategyKind] {
        match self {
            StrategyArg::Single => &[StrategyKind::SinglePassFragment],
            StrategyArg::Multi => &[StrategyKind::MultiPassFragment],
            StrategyArg::Compute => &[StrategyKind::ComputeDispatch],
            StrategyArg::All => &StrategyKind::ALL,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "prism-studio",
    about = "Render with the prism strategy engine on the local GPU and report timings."
)]
struct Args {
    /// Strategy to run
    #[arg(long, value_enum, default_value_t = StrategyArg::All)]
    strategy: StrategyArg,

    /// Destination width in pixels (defaults to the source width, or 1024)
    #[arg(long)]
    width: Option<u32>,

    /// Destination height in pixels (defaults to the source height, or 1024)
    #[arg(long)]
    height: Option<u32>,

    /// Image fed to the multi-pass and compute strategies
    #[arg(long, value_name = "PATH")]
    source: Option<PathBuf>,

    /// Log filter in env_logger syntax (overrides RUST_LOG)
    #[arg(long, value_name = "FILTER")]
    log: Option<String>,

    /// Drop unknown shader names instead of failing session construction
    #[arg(long, action = clap::ArgAction::SetTrue)]
    lenient: bool,

    /// Seconds to wait for each submission before giving up
    #[arg(long, value_name = "SECS", default_value_t = 10)]
    timeout: u64,
}

const DEFAULT_EXTENT: u32 = 1024;

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(LoggingConfig {
        env_filter: args.log.clone(),
        ..LoggingConfig::default()
    });

    let mut config = SessionConfig::default();
    if args.lenient {
        config.resolution = PipelineResolution::Lenient;
    }

    let session = RenderSession::with_wgpu(DeviceInit::default(), &config)
        .context("failed to create render session")?;

    let image = args
        .source
        .as_deref()
        .map(source::load)
        .transpose()?;

    let width = args
        .width
        .or(image.as_ref().map(|i| i.width()))
        .unwrap_or(DEFAULT_EXTENT);
    let height = args
        .height
        .or(image.as_ref().map(|i| i.height()))
        .unwrap_or(DEFAULT_EXTENT);

    let source_texture = image
        .map(|i| source::upload(session.device(), i, width, height))
        .transpose()?;

    let mut slot = SurfaceSlot::new();
    let mut display = ConsoleDisplay::default();
    slot.redraw(&mut display);

    let mut failures = 0usize;
    for &kind in args.strategy.kinds() {
        let source = source_texture.as_ref().filter(|_| kind.accepts_source());

        let submission = match session.submit(kind, width, height, source) {
            Ok(s) => s,
            Err(err) => {
                log::error!("{kind}: submission rejected: {err}");
                failures += 1;
                continue;
            }
        };

        let result = match submission.wait_timeout(Duration::from_secs(args.timeout)) {
            Ok(result) => result,
            Err(pending) => {
                log::error!("{kind}: submission #{} timed out after {}s", pending.id(), args.timeout);
                failures += 1;
                continue;
            }
        };

        match result {
            Ok(output) => {
                println!(
                    "{kind:<12} {width}x{height}  gpu {}  kernel {}",
                    format_millis(output.info.gpu_time),
                    format_millis(output.info.kernel_time)
                );
                slot.present(output);
                slot.redraw(&mut display);
            }
            Err(err) => {
                log::error!("{kind}: {err}");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        bail!("{failures} submission(s) failed");
    }
    Ok(())
}
