//! Checkpoint inspection tool
//!
//! Lists a checkpoint's parameters, reconciles it against a freshly built
//! model and reports what loaded.
//! Usage: cargo run --bin inspect -- gesture_lstm.pth --arch lstm --export-bundle out.bin

use candle_core::Device;
use clap::Parser;
use gesture_infer::cli::Display;
use gesture_infer::config::ReconcileConfig;
use gesture_infer::data::{infer_feature_dim, Vocab};
use gesture_infer::model::checkpoint::{read_checkpoint, save_bundle};
use gesture_infer::model::reconcile::{parameter_norm, LoadStatus, Reconciler};
use gesture_infer::model::{Architecture, Model, ModelConfig};
use gesture_infer::EngineConfig;
use std::error::Error;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "inspect")]
#[command(about = "List, reconcile and convert gesture classifier checkpoints")]
struct Args {
    /// Checkpoint to inspect (.pth, .safetensors or .bin)
    checkpoint: PathBuf,

    /// Architecture to reconcile against
    #[arg(short, long, value_enum, default_value = "lstm")]
    arch: Architecture,

    /// Training-artifact root used for label and width discovery
    #[arg(long, default_value = "processed/keypoints")]
    data_root: PathBuf,

    /// Hidden dimension
    #[arg(long, default_value = "64")]
    hidden_dim: usize,

    /// Number of recurrent layers
    #[arg(long, default_value = "1")]
    num_layers: usize,

    /// Only accept exact name/shape matches
    #[arg(long)]
    strict: bool,

    /// Write the reconciled parameters as a bincode bundle
    #[arg(long)]
    export_bundle: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let device = Device::Cpu;
    let defaults = EngineConfig::default();

    println!("Checkpoint: {}", args.checkpoint.display());
    let raw = read_checkpoint(&args.checkpoint, &device)?;
    println!(
        "   Layout: {} | {} entries",
        if raw.is_wrapped() { "wrapped (state_dict)" } else { "flat" },
        raw.entries().len()
    );
    for (name, tensor) in raw.entries() {
        println!("   {:<40} {:?}", name, tensor.dims());
    }

    let fallback = Vocab::from_labels(defaults.default_labels.iter().cloned())?;
    let vocab = Vocab::discover(&args.data_root, fallback);
    let input_dim = match args.arch {
        Architecture::Lstm => {
            infer_feature_dim(&args.data_root, &vocab, defaults.default_feature_dim)
        }
        Architecture::Cnn3d => defaults.in_channels,
    };

    let model_config = ModelConfig {
        architecture: args.arch,
        input_dim,
        hidden_dim: args.hidden_dim,
        num_layers: args.num_layers,
        num_classes: vocab.size(),
        dropout: defaults.dropout,
    };
    let mut model = Model::new(model_config.clone(), &device)?;
    println!(
        "\nModel: {} | input {} | hidden {} | layers {} | {} classes ({} parameters)",
        model_config.architecture,
        model_config.input_dim,
        model_config.hidden_dim,
        model_config.num_layers,
        model_config.num_classes,
        model.parameter_count()
    );

    let reconcile_config = ReconcileConfig {
        permissive: !args.strict,
        head_renames: if args.strict {
            vec![]
        } else {
            ReconcileConfig::default().head_renames
        },
        ..ReconcileConfig::default()
    };
    let reconciler = Reconciler::from_config(&reconcile_config);
    println!(
        "Strategies: {}",
        reconciler
            .strategies()
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(" -> ")
    );

    let status = match reconciler.reconcile(&mut model, raw)? {
        Some(report) => LoadStatus::Loaded(report),
        None => LoadStatus::RandomInit {
            reason: "no strategy accepted the checkpoint".to_string(),
        },
    };
    println!();
    Display::new().show_load_status(&status)?;

    let head = model.classifier().head_weight_name();
    if let Some(norm) = parameter_norm(&model, head) {
        println!("Head '{}' norm: {:.6}", head, norm);
    }

    if let Some(path) = &args.export_bundle {
        if let LoadStatus::RandomInit { .. } = status {
            return Err("refusing to export random weights".into());
        }
        save_bundle(path, &model.state_dict()?, Some(&model_config))?;
        println!("Exported bundle to {}", path.display());
    }

    Ok(())
}
