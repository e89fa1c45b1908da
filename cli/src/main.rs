use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pose3d_core::{
    config::{CameraConfig, DatasetConfig, PipelineConfig},
    dataset::{write_index, DatasetKind},
    detection::OrtDetector,
    export::{binary_to_csv, save_binary, write_csv},
    pipeline::Pipeline,
    pose::OrtPoseNet,
    render::save_visualization,
    root::OrtRootNet,
    runtime::configure_ort_dylib,
    video::{decode_frames, load_image, total_frames},
};

// ── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "pose3d",
    version,
    about = "Multi-person 3D pose estimation from images and video",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Estimate poses in a single image and print them as JSON.
    Image {
        /// Input image path
        #[arg(short, long)]
        input: PathBuf,

        #[command(flatten)]
        models: ModelArgs,

        /// Write the JSON result here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Save a rendering of boxes and skeletons
        #[arg(long)]
        vis: Option<PathBuf>,
    },

    /// Estimate poses for every frame of a video.
    Video {
        /// Input video path
        #[arg(short, long)]
        input: PathBuf,

        #[command(flatten)]
        models: ModelArgs,

        /// Binary results path
        #[arg(short, long, default_value = "poses.bin")]
        output: PathBuf,

        /// CSV export path
        #[arg(long)]
        csv: Option<PathBuf>,
    },

    /// Flatten a saved binary result file into CSV.
    ExportCsv {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long, default_value = "poses.csv")]
        output: PathBuf,
    },

    /// Build a training index from dataset annotations.
    Prepare {
        #[arg(long, value_enum)]
        dataset: DatasetArg,

        /// COCO-style annotation file
        #[arg(long)]
        annotations: PathBuf,

        /// Directory the image file names are relative to
        #[arg(long)]
        images: PathBuf,

        #[arg(short, long, default_value = "index.json")]
        output: PathBuf,

        /// Minimum root separation in mm
        #[arg(long, default_value_t = 500.0)]
        min_separation: f32,
    },
}

#[derive(Args)]
struct ModelArgs {
    /// YOLOv8-style person detector (ONNX)
    #[arg(long, default_value = "yolov8n.onnx")]
    detector: PathBuf,

    /// RootNet (ONNX)
    #[arg(long, default_value = "rootnet.onnx")]
    root_model: PathBuf,

    /// PoseNet (ONNX)
    #[arg(long, default_value = "posenet.onnx")]
    pose_model: PathBuf,

    /// Pipeline configuration (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Focal length fx fy in pixels; enables camera-space output
    #[arg(long, num_args = 2, value_names = ["FX", "FY"])]
    focal: Option<Vec<f32>>,
}

#[derive(Clone, Copy, ValueEnum)]
enum DatasetArg {
    Muco,
    Mpii,
}

impl From<DatasetArg> for DatasetKind {
    fn from(arg: DatasetArg) -> Self {
        match arg {
            DatasetArg::Muco => DatasetKind::Muco,
            DatasetArg::Mpii => DatasetKind::Mpii,
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    // Respect RUST_LOG; default to info
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Image {
            input,
            models,
            output,
            vis,
        } => cmd_image(input, models, output, vis),
        Commands::Video {
            input,
            models,
            output,
            csv,
        } => cmd_video(input, models, output, csv),
        Commands::ExportCsv { input, output } => binary_to_csv(&input, &output)
            .with_context(|| format!("CSV export of {} failed", input.display())),
        Commands::Prepare {
            dataset,
            annotations,
            images,
            output,
            min_separation,
        } => cmd_prepare(dataset.into(), annotations, images, output, min_separation),
    }
}

// ── Image mode ────────────────────────────────────────────────────────────────

fn cmd_image(
    input: PathBuf,
    models: ModelArgs,
    output: Option<PathBuf>,
    vis: Option<PathBuf>,
) -> Result<()> {
    info!(input = %input.display(), "single-image mode");
    let frame = load_image(&input)?;
    let mut pipeline = load_pipeline(&models)?;
    let result = pipeline.process_image(&frame)?;

    let json = serde_json::to_string_pretty(&result).context("failed to serialize result")?;
    match output {
        Some(path) => std::fs::write(&path, json)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => println!("{json}"),
    }

    if let Some(path) = vis {
        save_visualization(&frame, &result, &path)?;
    }
    Ok(())
}

// ── Video mode ────────────────────────────────────────────────────────────────

fn cmd_video(input: PathBuf, models: ModelArgs, output: PathBuf, csv: Option<PathBuf>) -> Result<()> {
    info!(input = %input.display(), output = %output.display(), "video mode");
    let mut pipeline = load_pipeline(&models)?;

    let total = total_frames(&input);
    let pb = if total > 0 {
        progress_bar(total)?
    } else {
        spinner("Estimating poses…")?
    };

    let mut session = pipeline.start_video((total > 0).then_some(total));
    let pb2 = pb.clone();
    decode_frames(&input, |frame| {
        let report = session.push(&frame)?;
        pb2.set_message(format!("{} people", report.persons));
        pb2.inc(1);
        Ok(())
    })
    .context("video run failed")?;
    let run = session.finish();
    pb.finish_with_message("Done.");

    if run.frames.is_empty() {
        warn!("no people found in any frame");
    }
    save_binary(&run.frames, &output)?;
    if let Some(path) = csv {
        write_csv(&run.frames, &path)?;
    }
    info!(
        frames = run.stats.frames,
        skipped = run.stats.skipped,
        persons = run.stats.persons,
        "video results written"
    );
    Ok(())
}

// ── Dataset preparation ───────────────────────────────────────────────────────

fn cmd_prepare(
    kind: DatasetKind,
    annotations: PathBuf,
    images: PathBuf,
    output: PathBuf,
    min_separation: f32,
) -> Result<()> {
    let cfg = DatasetConfig {
        min_separation,
        ..Default::default()
    };
    let samples = kind.load(&annotations, &images, &cfg)?;
    write_index(&samples, &output)
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn load_pipeline(models: &ModelArgs) -> Result<Pipeline<OrtDetector, OrtRootNet, OrtPoseNet>> {
    let mut config = match &models.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(focal) = &models.focal {
        let principal = config.camera.as_ref().and_then(|c| c.principal);
        config.camera = Some(CameraConfig {
            focal: [focal[0], focal[1]],
            principal,
        });
    }

    configure_ort_dylib();
    Pipeline::load(&models.detector, &models.root_model, &models.pose_model, config)
        .context("failed to load models")
}

fn progress_bar(total: u64) -> Result<ProgressBar> {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} frames {msg} [{elapsed_precise}<{eta}]")
            .context("invalid progress template")?,
    );
    Ok(pb)
}

fn spinner(msg: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg} [{elapsed_precise}]")
            .context("invalid progress template")?
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(80));
    Ok(pb)
}
