use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};
use log::info;
use serde::Serialize;

use site_align::core::{StageTiming, TagPose};
use site_align::frames::{detect_image, FrameError};
use site_align::pipeline::{PipelineError, TagPipeline};
use site_align::replay::{replay, ReplayLog};
use site_align::tracking::SessionContext;
use site_align::{ConfigError, SiteAlignConfig};

#[derive(Parser, Debug)]
#[command(
    name = "site-align",
    version,
    about = "Detect fiducial tags and align a site model with an AR session"
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Detect tags in an image and print their camera-space poses as JSON.
    Detect {
        image: PathBuf,
        #[arg(long)]
        config: PathBuf,
        /// Vertical field of view in degrees; overrides the config.
        #[arg(long)]
        fov_deg: Option<f64>,
        /// Tag side in metres; overrides the config.
        #[arg(long)]
        tag_size: Option<f64>,
        /// Include per-stage timings in the output.
        #[arg(long)]
        timings: bool,
    },
    /// Feed a recorded detection log through the matcher and print the result.
    Replay {
        log: PathBuf,
        #[arg(long)]
        config: PathBuf,
        #[arg(long, default_value = "replay")]
        patrol_id: String,
    },
    /// Write a config with every default filled in.
    InitConfig { path: PathBuf },
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("failed to encode output: {0}")]
    Output(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct DetectReport {
    tags: Vec<TagPose>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timings: Option<Vec<StageTiming>>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(feature = "tracing")]
fn init_logging(_verbose: u8) {
    site_align::core::init_tracing(false);
}

#[cfg(not(feature = "tracing"))]
fn init_logging(verbose: u8) {
    use log::LevelFilter;

    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    if let Err(e) = site_align::core::init_with_level(level) {
        eprintln!("logger already installed: {e}");
    }
}

fn run(command: Command) -> Result<(), CliError> {
    match command {
        Command::Detect {
            image,
            config,
            fov_deg,
            tag_size,
            timings,
        } => {
            let mut cfg = SiteAlignConfig::load_json(&config)?;
            if let Some(fov) = fov_deg {
                cfg.fov_deg = fov;
            }
            if let Some(size) = tag_size {
                cfg.tag_size = size;
            }
            let mut pipeline = TagPipeline::new(cfg.load_dictionary()?, &cfg.pipeline)?;
            let img = ::image::open(&image).map_err(FrameError::from)?;
            let tags = detect_image(&mut pipeline, &img, cfg.fov(), cfg.tag_size)?;
            info!("{}: {} tags", image.display(), tags.len());

            let report = DetectReport {
                timings: timings.then(|| pipeline.profile_data().to_vec()),
                tags,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Replay {
            log,
            config,
            patrol_id,
        } => {
            let cfg = SiteAlignConfig::load_json(&config)?;
            let context = SessionContext::new(cfg.load_markers()?, cfg.model_origin);
            let frames = ReplayLog::load_json(&log)?;
            let summary = replay(&frames, context, &cfg, &patrol_id);
            info!(
                "replayed {} frames, ready = {}",
                summary.frames, summary.ready
            );
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::InitConfig { path } => {
            SiteAlignConfig::default().write_json(&path)?;
            info!("wrote {}", path.display());
        }
    }
    Ok(())
}
