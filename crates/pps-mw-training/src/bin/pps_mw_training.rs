use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use pps_mw_core::Activation;
use pps_mw_training::pipelines::settings::{self, QrnnPipelineSettings, TrainingSettings, UNetPipelineSettings};
use pps_mw_training::pipelines::{RunSummary, cloud_base, iwp_ici, pr_nordic};
use std::path::PathBuf;

// ---------------- CLI ----------------

#[derive(Parser, Debug)]
#[command(name = "pps-mw-training", about = "Run the pps-mw-training app", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train a UNet retrieving ground radar reflectivity from microwave sounder data
    #[command(name = "pr_nordic")]
    PrNordic(GridArgs),
    /// Train a UNet retrieving cloud base heights from VGAC data
    #[command(name = "cloud_base")]
    CloudBase(CloudBaseArgs),
    /// Train a QRNN retrieving ice water path and related parameters from ICI data
    #[command(name = "iwp_ici")]
    IwpIci(IwpIciArgs),
}

/// Options shared by every pipeline; unset options keep the pipeline defaults
#[derive(Args, Debug, Clone)]
struct CommonArgs {
    /// Training batch size
    #[arg(short = 'b', long = "batchsize", value_name = "N")]
    batch_size: Option<usize>,
    /// Number of training epochs
    #[arg(short = 'e', long = "epochs", value_name = "N")]
    epochs: Option<usize>,
    /// Number of hidden layers
    #[arg(short = 'f', long = "layers", value_name = "N")]
    layers: Option<usize>,
    /// Number of neurons per hidden layer
    #[arg(short = 'n', long = "neurons", value_name = "N")]
    neurons: Option<usize>,
    /// Only evaluate a pretrained model
    #[arg(short = 'o', long = "only-evaluate", action = ArgAction::SetTrue)]
    only_evaluate: bool,
    /// Fraction of the dataset used as training data
    #[arg(short = 't', long = "train-fraction", value_name = "F")]
    train_fraction: Option<f32>,
    /// Fraction of the dataset used as validation data
    #[arg(short = 'v', long = "validation-fraction", value_name = "F")]
    validation_fraction: Option<f32>,
    /// Fraction of the dataset used as test data
    #[arg(short = 'u', long = "test-fraction", value_name = "F")]
    test_fraction: Option<f32>,
    /// Directory for the trained model config, or to read it from when evaluating
    #[arg(short = 'w', long = "write", value_name = "DIR")]
    model_config_path: Option<PathBuf>,
    /// Seed for splitting, shuffling and augmentation
    #[arg(long, value_name = "N")]
    seed: Option<u64>,
}

#[derive(Args, Debug, Clone)]
struct GridArgs {
    #[command(flatten)]
    common: CommonArgs,
    /// Directory holding the training data files
    #[arg(short = 'p', long = "training-datapath", value_name = "DIR")]
    training_data_path: Option<PathBuf>,
    /// Channels of the first UNet block
    #[arg(long = "unet-base", value_name = "N")]
    unet_base: Option<usize>,
}

#[derive(Args, Debug, Clone)]
struct CloudBaseArgs {
    #[command(flatten)]
    grid: GridArgs,
    /// Number of training data files to process
    #[arg(short = 'c', long = "file-limit", value_name = "N")]
    file_limit: Option<usize>,
}

#[derive(Args, Debug, Clone)]
struct IwpIciArgs {
    #[command(flatten)]
    common: CommonArgs,
    /// Activation of the hidden layers (relu, leaky_relu, gelu, tanh, sigmoid)
    #[arg(short = 'a', long = "activation", value_name = "NAME")]
    activation: Option<Activation>,
    /// Fraction of observations set to the fill value during training
    #[arg(short = 'm', long = "missing-fraction", value_name = "F")]
    missing_fraction: Option<f32>,
    /// ICI retrieval database file
    #[arg(short = 'd', long = "db-file", value_name = "FILE")]
    db_file: Option<PathBuf>,
}

// ---------------- Overrides ----------------

fn apply_common(args: &CommonArgs, training: &mut TrainingSettings) {
    if let Some(v) = args.batch_size {
        training.batch_size = v;
    }
    if let Some(v) = args.epochs {
        training.epochs = v;
    }
    if let Some(v) = args.train_fraction {
        training.fractions.train = v;
    }
    if let Some(v) = args.validation_fraction {
        training.fractions.validation = v;
    }
    if let Some(v) = args.test_fraction {
        training.fractions.test = v;
    }
    if let Some(v) = &args.model_config_path {
        training.model_config_path = v.clone();
    }
    if let Some(v) = args.seed {
        training.seed = v;
    }
    training.only_evaluate = args.only_evaluate;
}

fn grid_settings(args: &GridArgs, mut settings: UNetPipelineSettings) -> UNetPipelineSettings {
    apply_common(&args.common, &mut settings.training);
    if let Some(v) = args.common.layers {
        settings.n_layers = v;
    }
    if let Some(v) = args.common.neurons {
        settings.n_features = v;
    }
    if let Some(v) = &args.training_data_path {
        settings.training_data_path = v.clone();
    }
    if let Some(v) = args.unet_base {
        settings.n_unet_base = v;
    }
    settings
}

fn iwp_ici_settings(args: &IwpIciArgs) -> QrnnPipelineSettings {
    let mut settings = settings::iwp_ici();
    apply_common(&args.common, &mut settings.training);
    if let Some(v) = args.common.layers {
        settings.n_hidden_layers = v;
    }
    if let Some(v) = args.common.neurons {
        settings.n_neurons = v;
    }
    if let Some(v) = args.activation {
        settings.activation = v;
    }
    if let Some(v) = args.missing_fraction {
        settings.missing_fraction = v;
    }
    if let Some(v) = &args.db_file {
        settings.db_file = v.clone();
    }
    settings
}

fn report(summary: &RunSummary) {
    log::info!(
        "{} finished, artifacts in {}",
        summary.pipeline,
        summary.output_dir.display()
    );
    for (name, stats) in &summary.stats {
        log::info!("  {name}: n_valid={}", stats.n_valid);
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();
    let summary = match &cli.command {
        Commands::PrNordic(args) => {
            let settings = grid_settings(args, settings::pr_nordic());
            log::debug!("settings: {settings:?}");
            pr_nordic::run(&settings).context("pr_nordic pipeline failed")?
        }
        Commands::CloudBase(args) => {
            let mut settings = grid_settings(&args.grid, settings::cloud_base());
            settings.file_limit = args.file_limit;
            log::debug!("settings: {settings:?}");
            cloud_base::run(&settings).context("cloud_base pipeline failed")?
        }
        Commands::IwpIci(args) => {
            let settings = iwp_ici_settings(args);
            log::debug!("settings: {settings:?}");
            iwp_ici::run(&settings).context("iwp_ici pipeline failed")?
        }
    };
    report(&summary);
    Ok(())
}
