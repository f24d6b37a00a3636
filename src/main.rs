//! Argus frame acquisition, filtering and DVR

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use argus::capture::{Camera, NoiseCamera};
use argus::dvr::{DvrController, DvrState};
use argus::filters::FilterBank;
use argus::{CameraKind, CaptureConfig, Config, FilterKind, FrameSource};
use clap::{Parser, ValueEnum};
use color_eyre::{eyre::eyre, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CameraArg {
    Noise,
    V4l2,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FilterArg {
    None,
    Normalize,
    Smooth,
    Hold,
}

#[derive(Debug, Parser)]
#[command(name = "argus", version, about = "Camera acquisition with filtering and DVR")]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "ARGUS_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, value_enum)]
    camera: Option<CameraArg>,

    /// Record to this file (.vraw or .vclip)
    #[arg(short, long)]
    record: Option<PathBuf>,

    /// Play this file back
    #[arg(short, long, conflicts_with = "record")]
    play: Option<PathBuf>,

    /// Frames to record
    #[arg(short = 'n', long)]
    frames: Option<u64>,

    /// Record one of every N frames
    #[arg(long)]
    skip: Option<u64>,

    #[arg(long, value_enum)]
    filter: Option<FilterArg>,

    /// Run without a window
    #[arg(long)]
    headless: bool,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(camera) = self.camera {
            config.capture.camera = match camera {
                CameraArg::Noise => CameraKind::Noise,
                CameraArg::V4l2 => CameraKind::V4l2,
            };
        }
        if let Some(path) = &self.record {
            config.dvr.filename = Some(path.clone());
        }
        if let Some(path) = &self.play {
            config.dvr.playname = Some(path.clone());
        }
        if let Some(n) = self.frames {
            config.dvr.nframes = n;
        }
        if let Some(n) = self.skip {
            config.dvr.nskip = n;
        }
        if let Some(filter) = self.filter {
            config.filter.kind = match filter {
                FilterArg::None => FilterKind::None,
                FilterArg::Normalize => FilterKind::Normalize,
                FilterArg::Smooth => FilterKind::SmoothNormalize,
                FilterArg::Hold => FilterKind::SampleHold,
            };
        }
    }
}

fn open_camera(config: &CaptureConfig) -> Result<Box<dyn Camera>> {
    match config.camera {
        CameraKind::Noise => Ok(Box::new(
            NoiseCamera::new(config.width, config.height, config.fps).with_color(config.color),
        )),
        CameraKind::V4l2 => v4l2_camera(config),
    }
}

#[cfg(feature = "v4l2")]
fn v4l2_camera(config: &CaptureConfig) -> Result<Box<dyn Camera>> {
    let mut config = config.clone();
    if config.device.is_empty() {
        let (device, format) = argus::capture::v4l2::auto_detect_device()
            .ok_or_else(|| eyre!("no capture device found"))?;
        config.device = device;
        config.format = format;
    }
    info!("Using capture device: {}", config.device);
    Ok(Box::new(argus::capture::V4l2Camera::new(&config)))
}

#[cfg(not(feature = "v4l2"))]
fn v4l2_camera(_config: &CaptureConfig) -> Result<Box<dyn Camera>> {
    Err(eyre!("argus was built without the v4l2 feature"))
}

/// Drive the DVR and the filter chain without a window until interrupted,
/// or until the requested session ends
fn run_headless(
    source: Arc<FrameSource>,
    mut dvr: DvrController,
    mut filters: FilterBank,
    config: &Config,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let live = match config.pipeline.subscriber_capacity {
        0 => source.subscribe(),
        n => source.subscribe_bounded(n),
    };
    let playback = dvr.playback();
    let session = dvr.state() != DvrState::Idle;
    let interval = Duration::from_secs(config.pipeline.log_interval_secs.max(1));
    let mut last_log = Instant::now();
    let mut filtered = 0u64;

    while !shutdown.load(Ordering::Relaxed) {
        dvr.wait(Duration::from_millis(50));
        for frame in live.drain() {
            filters.apply(&frame);
            filtered += 1;
        }
        playback.drain().for_each(drop);

        if session && dvr.state() == DvrState::Idle {
            info!("Session complete");
            break;
        }
        if last_log.elapsed() >= interval {
            last_log = Instant::now();
            let stats = source.stats();
            info!(
                "{:.1} fps, {} read, {} dropped, {} filtered, dvr {:?} at frame {}",
                source.fps(),
                stats.frames_read,
                stats.frames_dropped,
                filtered,
                dvr.state(),
                dvr.frame_number()
            );
        }
    }
    dvr.stop();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("argus=debug")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    let args = Args::parse();
    let mut config = Config::load(args.config.as_deref())?;
    args.apply(&mut config);
    argus::CONFIG.store(Arc::new(config.clone()));

    info!("Argus launching...");

    let camera = open_camera(&config.capture)?;
    let source = Arc::new(FrameSource::from_boxed(camera).with_core(config.capture.pin_core));
    source.start()?;

    let filters = FilterBank::from_config(&config.filter);
    let mut dvr = DvrController::new(Some(Arc::clone(&source)), &config.dvr);
    if args.record.is_some() {
        dvr.record();
    } else if args.play.is_some() {
        dvr.play();
    }
    if (args.record.is_some() || args.play.is_some()) && dvr.state() == DvrState::Idle {
        warn!("Requested session did not start");
    }

    #[cfg(feature = "display")]
    if !args.headless {
        let mut filters = filters;
        let sdl_context = sdl2::init().map_err(|e| eyre!(e))?;
        let mut app = argus::display::Sdl2Display::new(
            &sdl_context,
            config.display.width,
            config.display.height,
        )?;
        let live = source.subscribe_bounded(config.pipeline.subscriber_capacity.max(1));
        app.run(&sdl_context, live, &mut dvr, &mut filters)?;
        drop(dvr);
        source.stop();
        info!("Argus shutting down");
        return Ok(());
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let mut worker = {
        let source = Arc::clone(&source);
        let shutdown = Arc::clone(&shutdown);
        tokio::task::spawn_blocking(move || run_headless(source, dvr, filters, &config, shutdown))
    };

    tokio::select! {
        result = &mut worker => result??,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Interrupted");
            shutdown.store(true, Ordering::Relaxed);
            worker.await??;
        }
    }

    source.stop();
    info!("Argus shutting down");
    Ok(())
}
