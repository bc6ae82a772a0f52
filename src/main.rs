//! laserdot: follow a laser dot in a V4L2 camera feed

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use laserdot::app::{self, LoopControl, RunSummary};
use laserdot::capture::{BufferRing, CaptureDevice, SyntheticDevice, V4l2Device};
use laserdot::display::{Sdl2Display, Sdl2Input};
use laserdot::pipeline::FramePipeline;
use laserdot::snapshot::{spawn_snapshot_worker, FrameExchange, PngEncoder, SnapshotTrigger};
use laserdot::{utils, Config};

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Capture device node, or `auto`
    #[arg(long, global = true)]
    device: Option<String>,
    /// Use the built-in moving dot instead of a camera
    #[arg(long, global = true)]
    synthetic: bool,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Live tracking window (default)
    Run {
        #[arg(long)]
        max_frames: Option<u64>,
    },
    /// Capture, annotate and save a single frame
    Snap {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("laserdot=info")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(device) = cli.device {
        config.capture.device = device;
    }
    config.validate()?;

    info!("laserdot launching...");

    let pipeline = FramePipeline::new(&config.pipeline, config.detector, config.overlay)?;
    let command = cli.command.unwrap_or(Command::Run { max_frames: None });

    if cli.synthetic {
        info!("Using synthetic capture source");
        let ring = BufferRing::open(SyntheticDevice::moving_dot(), &config.ring_spec())?;
        return execute(ring, &pipeline, &config, command).await;
    }

    let path = if config.wants_auto_device() {
        utils::auto_detect_device(config.capture.format)?.path
    } else {
        config.capture.device.clone()
    };
    info!("Using capture device: {}", path);

    let ring = BufferRing::open(V4l2Device::open(&path)?, &config.ring_spec())?;
    execute(ring, &pipeline, &config, command).await
}

async fn execute<D: CaptureDevice>(
    mut ring: BufferRing<D>,
    pipeline: &FramePipeline,
    config: &Config,
    command: Command,
) -> Result<()> {
    match command {
        Command::Snap { output } => {
            let path = output.unwrap_or_else(|| config.snapshot.path.clone());
            let report = app::capture_once(&mut ring, pipeline, &PngEncoder::new(&path))?;
            info!("Snapshot written to {} ({})", path.display(), report.direction);
        }
        Command::Run { max_frames } => {
            let summary = run_live(&mut ring, pipeline, config, max_frames).await?;
            info!(
                "Processed {} frames, {} snapshots requested, last direction {}, avg {:.3} ms",
                summary.frames,
                summary.snapshots_requested,
                summary.last_direction,
                summary.average.as_secs_f64() * 1000.0
            );
        }
    }

    ring.shutdown()?;
    info!("laserdot shutting down");
    Ok(())
}

async fn run_live<D: CaptureDevice>(
    ring: &mut BufferRing<D>,
    pipeline: &FramePipeline,
    config: &Config,
    max_frames: Option<u64>,
) -> Result<RunSummary> {
    let format = *ring.format();
    let exchange = Arc::new(FrameExchange::new(format.width, format.height));
    let (trigger, requests) = SnapshotTrigger::channel();
    let worker = spawn_snapshot_worker(
        Arc::clone(&exchange),
        requests,
        Arc::new(PngEncoder::new(&config.snapshot.path)),
    );

    let control = LoopControl {
        exit: Arc::new(AtomicBool::new(false)),
        max_frames,
    };
    let exit = Arc::clone(&control.exit);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received");
            exit.store(true, Ordering::SeqCst);
        }
    });

    // SDL stays on this thread; the worker runs on the rest of the runtime
    let summary = tokio::task::block_in_place(|| -> Result<RunSummary> {
        let sdl_context = sdl2::init().map_err(|e| eyre!(e))?;
        let mut display = Sdl2Display::new(
            &sdl_context,
            &config.display.title,
            config.display.width,
            config.display.height,
        )?;
        let mut input = Sdl2Input::new(&sdl_context)?;
        app::run_loop(
            ring,
            pipeline,
            &mut display,
            &mut input,
            &exchange,
            &trigger,
            &control,
        )
    });

    // closing the trigger lets the worker finish pending requests and stop
    drop(trigger);
    match worker.await {
        Ok(written) => info!("{} snapshots written", written),
        Err(e) => warn!("Snapshot worker failed: {}", e),
    }
    summary
}
