mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::Config;
use facelook_core::{
    FaceLocator, IdentityClassifier, IdentityModel, OnnxIdentityModel, Recognition, RecognitionPipeline,
};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "facelook", about = "Locate and identify the face in an image")]
struct Cli {
    /// Minimum confidence for a known identity (overrides FACELOOK_CONFIDENCE_THRESHOLD)
    #[arg(long, global = true)]
    threshold: Option<f32>,
    /// Edge of the normalized face crop (overrides FACELOOK_TARGET_SIZE)
    #[arg(long, global = true)]
    target_size: Option<u32>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Identify the most prominent face in an image
    Recognize {
        /// Encoded image file (PNG, JPEG, ...)
        image: PathBuf,
        /// Also write the normalized face crop here
        #[arg(long)]
        debug_crop: Option<PathBuf>,
    },
    /// Write the normalized face crop without classifying it
    Locate {
        image: PathBuf,
        /// Output PNG path
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Report which detectors, model and labels are usable
    Check,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(t) = cli.threshold {
        config.confidence_threshold = t;
    }
    if let Some(s) = cli.target_size {
        config.target_size = s;
    }
    tracing::debug!(?config, "configuration loaded");

    match cli.command {
        Commands::Recognize { image, debug_crop } => recognize(&config, &image, debug_crop),
        Commands::Locate { image, out } => locate(&config, &image, &out),
        Commands::Check => check(&config),
    }
}

fn load_locator(config: &Config) -> Result<FaceLocator> {
    FaceLocator::from_cascade_files(&config.frontal_cascade, &config.fallback_cascade)
        .context("cannot construct face detectors")
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("cannot read {}", path.display()))
}

fn recognize(config: &Config, image_path: &Path, debug_crop: Option<PathBuf>) -> Result<()> {
    let mut locator = load_locator(config)?;
    if let Some(path) = debug_crop {
        locator = locator.with_crop_observer(move |face| {
            if let Err(e) = face.to_image().save_with_format(&path, image::ImageFormat::Png) {
                tracing::warn!(path = %path.display(), error = %e, "failed to write debug crop");
            }
        });
    }

    let classifier = IdentityClassifier::new(config.load_labels()?).with_threshold(config.confidence_threshold);
    let pipeline = RecognitionPipeline::new(locator, classifier, config.locate_options());

    let bytes = read_image(image_path)?;
    let outcome = recognize_bytes(&pipeline, &bytes, || {
        OnnxIdentityModel::load(&config.model_path_str()).context("cannot load identity classifier")
    })
    .with_context(|| format!("cannot recognize {}", image_path.display()))?;

    println!("{}", serde_json::to_string_pretty(&outcome.to_response())?);
    Ok(())
}

/// Locate first and load the model only once a face is found, so a no-face
/// image never depends on the classifier being provisioned.
fn recognize_bytes<M: IdentityModel>(
    pipeline: &RecognitionPipeline,
    bytes: &[u8],
    load_model: impl FnOnce() -> Result<M>,
) -> Result<Recognition> {
    let Some(face) = pipeline.locate(bytes).context("invalid image")? else {
        return Ok(Recognition::NoFace);
    };
    let model = load_model()?;
    Ok(Recognition::Identified(pipeline.identify(&model, &face)))
}

fn locate(config: &Config, image_path: &Path, out: &Path) -> Result<()> {
    let locator = load_locator(config)?;
    let bytes = read_image(image_path)?;
    let face = locator
        .locate(&bytes, &config.locate_options())
        .with_context(|| format!("invalid image {}", image_path.display()))?
        .with_context(|| format!("no face detected in {}", image_path.display()))?;

    face.to_image()
        .save_with_format(out, image::ImageFormat::Png)
        .with_context(|| format!("cannot write {}", out.display()))?;

    let report = serde_json::json!({
        "out": out.display().to_string(),
        "width": face.width(),
        "height": face.height(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn check(config: &Config) -> Result<()> {
    let mut healthy = true;

    let detectors = match load_locator(config) {
        Ok(locator) => serde_json::json!({ "loaded": locator.detector_names() }),
        Err(e) => {
            healthy = false;
            serde_json::json!({ "loaded": [], "error": format!("{e:#}") })
        }
    };

    let model = match OnnxIdentityModel::load(&config.model_path_str()) {
        Ok(m) => {
            let shape = m.input_shape();
            serde_json::json!({
                "path": config.model_path.display().to_string(),
                "height": shape.height,
                "width": shape.width,
                "channels": shape.channels,
                "layout": format!("{:?}", shape.layout),
            })
        }
        Err(e) => {
            healthy = false;
            serde_json::json!({ "path": config.model_path.display().to_string(), "error": e.to_string() })
        }
    };

    let labels = match config.load_labels() {
        Ok(table) => serde_json::json!({ "count": table.len() }),
        Err(e) => {
            healthy = false;
            serde_json::json!({ "error": e.to_string() })
        }
    };

    let report = serde_json::json!({
        "status": if healthy { "ok" } else { "degraded" },
        "detectors": detectors,
        "model": model,
        "labels": labels,
        "confidence_threshold": config.confidence_threshold,
        "target_size": config.target_size,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !healthy {
        anyhow::bail!("facelook is not fully provisioned");
    }
    Ok(())
}
