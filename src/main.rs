//! Gesture classifier - one-shot prediction CLI
//!
//! Loads the engine once, reads a keypoint sequence (JSON or `.npy`) and
//! prints the predicted gesture with its probability distribution.

use clap::Parser;
use gesture_infer::cli::Display;
use gesture_infer::data::{first_sample, load_sample};
use gesture_infer::inference::SequenceCapture;
use gesture_infer::{Architecture, EngineConfig, GestureEngine, RawSequence};
use log::info;
use serde::Deserialize;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "gesture-infer")]
#[command(about = "Classify a hand-keypoint sequence into a gesture label")]
struct Args {
    /// Engine configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Training-artifact root with one directory per label
    #[arg(long)]
    data_root: Option<PathBuf>,

    /// Path to model checkpoint (.pth, .safetensors or .bin)
    #[arg(short = 'm', long)]
    checkpoint: Option<PathBuf>,

    /// Classifier architecture
    #[arg(short, long, value_enum)]
    arch: Option<Architecture>,

    /// Temporal window every sequence is padded/truncated to
    #[arg(short, long)]
    frames: Option<usize>,

    /// Input sequence (.json or .npy); defaults to the first training sample
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Print the prediction as JSON
    #[arg(long)]
    json: bool,

    /// Save the incoming sequence under this directory before predicting
    #[arg(long)]
    save_debug: Option<PathBuf>,

    /// Enable debug mode
    #[arg(short, long)]
    debug: bool,
}

/// Accepted JSON bodies: a bare sequence or `{"sequence": ...}`
#[derive(Deserialize)]
#[serde(untagged)]
enum Request {
    Bare(RawSequence),
    Wrapped { sequence: RawSequence },
}

fn read_input(path: &Path) -> Result<Vec<Vec<f32>>, Box<dyn Error>> {
    if path.extension().is_some_and(|ext| ext == "npy") {
        return Ok(load_sample(path)?);
    }
    let content = fs::read_to_string(path)?;
    let raw = match serde_json::from_str::<Request>(&content)? {
        Request::Bare(sequence) => sequence,
        Request::Wrapped { sequence } => sequence,
    };
    Ok(raw.into_frames())
}

fn build_config(args: &Args) -> Result<EngineConfig, Box<dyn Error>> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    if let Some(root) = &args.data_root {
        config.data_root = root.clone();
    }
    if let Some(checkpoint) = &args.checkpoint {
        config.checkpoint = Some(checkpoint.clone());
    }
    if let Some(arch) = args.arch {
        config.architecture = arch;
    }
    if let Some(frames) = args.frames {
        config.target_frames = frames;
    }
    config.validate()?;
    Ok(config)
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let level = if args.debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config = build_config(&args)?;
    let engine = GestureEngine::load(&config)?;

    let sequence = match &args.input {
        Some(path) => read_input(path)?,
        None => {
            let (path, label) = first_sample(&config.data_root, engine.vocab()).ok_or_else(|| {
                format!(
                    "no --input given and no samples under {}",
                    config.data_root.display()
                )
            })?;
            info!("using sample {} (label '{}')", path.display(), label);
            load_sample(&path)?
        }
    };

    let display = Display::new();

    if let Some(dir) = &args.save_debug {
        let summary = SequenceCapture::new(dir).save(&sequence)?;
        if !args.json {
            display.show_capture(&summary)?;
        }
    }

    let prediction = engine.predict(&sequence)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&prediction)?);
    } else {
        display.show_load_status(engine.load_status())?;
        display.show_prediction(&prediction)?;
    }

    Ok(())
}
