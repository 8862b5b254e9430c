use std::path::PathBuf;
use std::time::Instant;

use clap::{Args, Parser, Subcommand, ValueEnum, ValueHint};
use log::info;

use gpx_trip_metrics::altitude_filters::FilterKind;
use gpx_trip_metrics::baseline::BaselineSource;
use gpx_trip_metrics::config::PipelineConfig;
use gpx_trip_metrics::final_training::train_final_model;
use gpx_trip_metrics::inference::{save_result, InferenceEngine};
use gpx_trip_metrics::lofo::{LofoOptions, LofoRunner};
use gpx_trip_metrics::lofo_report::{print_summary, save_results};
use gpx_trip_metrics::regressor::{default_factory, RegressorFactory};
use gpx_trip_metrics::track_preprocessor::TrackPreprocessor;

#[derive(Parser, Debug)]
#[command(author, version, about = "GPS track trip-metrics pipeline", long_about = None)]
struct Cli {
    /// JSON pipeline configuration; flags override its values
    #[arg(long, global = true, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Worker threads (defaults to every core)
    #[arg(long, global = true)]
    workers: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Turn family directories of GPX files into features, labels and the scaler
    Preprocess(PreprocessArgs),
    /// Leave-one-family-out cross-validation against the baseline
    Lofo(LofoArgs),
    /// Train the final model on every family
    Train(TrainArgs),
    /// Predict trip metrics for one GPX file
    Infer(InferArgs),
}

#[derive(Args, Debug)]
struct FilterArgs {
    /// Resampling step in meters
    #[arg(long)]
    step: Option<f64>,

    /// Altitude filter applied before resampling
    #[arg(long, value_enum)]
    filter: Option<FilterOpt>,
}

#[derive(Args, Debug)]
struct TrainingArgs {
    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    learning_rate: Option<f64>,

    /// Stop once the training MAE reaches this value (0 disables)
    #[arg(long)]
    early_stop_mae: Option<f64>,
}

#[derive(Args, Debug)]
struct PreprocessArgs {
    /// Directory with one subdirectory per family
    #[arg(long, value_hint = ValueHint::DirPath)]
    input: PathBuf,

    /// Output root for features/, labels/, lengths/ and mu_sigma.json
    #[arg(long, value_hint = ValueHint::DirPath)]
    output: PathBuf,

    #[command(flatten)]
    filter: FilterArgs,
}

#[derive(Args, Debug)]
struct LofoArgs {
    /// Preprocessed data root
    #[arg(long, value_hint = ValueHint::DirPath)]
    data: PathBuf,

    #[arg(long, value_hint = ValueHint::DirPath)]
    output: Option<PathBuf>,

    /// Run folds in parallel
    #[arg(long)]
    parallel: bool,

    /// Feature copy the baseline reads
    #[arg(long, value_enum)]
    baseline: Option<BaselineOpt>,

    #[command(flatten)]
    training: TrainingArgs,
}

#[derive(Args, Debug)]
struct TrainArgs {
    #[arg(long, value_hint = ValueHint::DirPath)]
    data: PathBuf,

    #[arg(long, value_hint = ValueHint::DirPath)]
    output: PathBuf,

    #[command(flatten)]
    training: TrainingArgs,
}

#[derive(Args, Debug)]
struct InferArgs {
    #[arg(long, value_hint = ValueHint::FilePath)]
    gpx: PathBuf,

    /// Saved model; repeat for an ensemble
    #[arg(long = "model", required = true, value_hint = ValueHint::FilePath)]
    models: Vec<PathBuf>,

    #[arg(long, value_hint = ValueHint::FilePath)]
    scaler: PathBuf,

    /// Fixed padded width (defaults to the track length)
    #[arg(long)]
    max_len: Option<usize>,

    /// Where to write the JSON result (defaults to <track>_inference.json)
    #[arg(long, value_hint = ValueHint::FilePath)]
    output: Option<PathBuf>,

    #[command(flatten)]
    filter: FilterArgs,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum FilterOpt {
    None,
    Median,
    Sgolay,
    Butterworth,
}

impl FilterOpt {
    fn to_kind(self) -> FilterKind {
        match self {
            FilterOpt::None => FilterKind::None,
            FilterOpt::Median => FilterKind::Median { window: 5 },
            FilterOpt::Sgolay => FilterKind::SavitzkyGolay { window: 5, order: 2 },
            FilterOpt::Butterworth => FilterKind::Butterworth { cutoff: 0.1 },
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum BaselineOpt {
    Raw,
    Normalized,
}

impl From<BaselineOpt> for BaselineSource {
    fn from(opt: BaselineOpt) -> Self {
        match opt {
            BaselineOpt::Raw => BaselineSource::Raw,
            BaselineOpt::Normalized => BaselineSource::Normalized,
        }
    }
}

impl FilterArgs {
    fn apply(&self, config: &mut PipelineConfig) {
        if let Some(step) = self.step {
            config.preprocess.step_meters = step;
        }
        if let Some(filter) = self.filter {
            config.preprocess.filter = filter.to_kind();
        }
    }
}

impl TrainingArgs {
    fn apply(&self, config: &mut PipelineConfig) {
        if let Some(epochs) = self.epochs {
            config.training.epochs = epochs;
        }
        if let Some(lr) = self.learning_rate {
            config.training.learning_rate = lr;
        }
        if let Some(mae) = self.early_stop_mae {
            config.training.early_stop_mae = mae;
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = PipelineConfig::load_or_default(cli.config.as_deref())?;
    if cli.workers.is_some() {
        config.workers = cli.workers;
    }

    let start = Instant::now();
    match cli.command {
        Command::Preprocess(args) => {
            args.filter.apply(&mut config);
            config.validate()?;
            run_preprocess(&args, &config)?;
        }
        Command::Lofo(args) => {
            args.training.apply(&mut config);
            if let Some(output) = &args.output {
                config.lofo.output_dir = output.clone();
            }
            if let Some(baseline) = args.baseline {
                config.lofo.baseline_source = baseline.into();
            }
            config.lofo.parallel_folds |= args.parallel;
            config.validate()?;
            run_lofo(&args, &config)?;
        }
        Command::Train(args) => {
            args.training.apply(&mut config);
            config.validate()?;
            run_train(&args, &config)?;
        }
        Command::Infer(args) => {
            args.filter.apply(&mut config);
            if args.max_len.is_some() {
                config.inference.max_len = args.max_len;
            }
            config.validate()?;
            run_infer(&args, &config)?;
        }
    }

    info!("finished in {:.1}s", start.elapsed().as_secs_f64());
    Ok(())
}

fn run_preprocess(args: &PreprocessArgs, config: &PipelineConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("\n🗺️  GPS TRACKS PREPROCESSING");
    println!("===========================");
    println!("Input directory:  {}", args.input.display());
    println!("Output directory: {}", args.output.display());
    println!("Step size:        {:.1} m", config.preprocess.step_meters);
    println!("Altitude filter:  {}", config.preprocess.filter.label());

    let report = TrackPreprocessor::new(
        &args.input,
        &args.output,
        config.preprocess.clone(),
        config.worker_count(),
    )
    .run()?;

    println!("\n📊 Processed {} families:", report.families.len());
    for family in &report.families {
        println!(
            "   {}: {} tracks, pattern {} steps, labels [{:.1}, {:.1}, {:.1}]",
            family.family,
            family.track_count(),
            family.pattern.features.len(),
            family.labels.distance,
            family.labels.elevation_gain,
            family.labels.elevation_loss
        );
    }
    println!("\n✅ Scaler fit on {} noisy features", report.noisy_feature_count);
    Ok(())
}

fn run_lofo(args: &LofoArgs, config: &PipelineConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("\n🔁 LOFO CROSS-VALIDATION");
    println!("=======================");
    println!("Data directory:   {}", args.data.display());
    println!("Output directory: {}", config.lofo.output_dir.display());
    println!(
        "Epochs: {}, learning rate: {}, parallel folds: {}",
        config.training.epochs, config.training.learning_rate, config.lofo.parallel_folds
    );

    let options = LofoOptions {
        training: config.training.clone(),
        baseline_source: config.lofo.baseline_source,
        parallel: config.lofo.parallel_folds,
        workers: config.worker_count(),
    };
    let factory: &RegressorFactory = &default_factory;
    let outcome = LofoRunner::new(&args.data, options, factory).run()?;

    print_summary(&outcome.statistics);
    save_results(&config.lofo.output_dir, &outcome)?;
    println!("\n✅ Results saved to: {}", config.lofo.output_dir.display());
    Ok(())
}

fn run_train(args: &TrainArgs, config: &PipelineConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("\n🏋️  FINAL MODEL TRAINING");
    println!("=======================");
    println!("Data directory:   {}", args.data.display());
    println!("Output directory: {}", args.output.display());

    let factory: &RegressorFactory = &default_factory;
    let outcome = train_final_model(&args.data, &args.output, &config.training, factory)?;

    println!(
        "\nTrained on {} tracks (max length {}) for {} epochs, MAE {:.3} -> {:.3}",
        outcome.track_count,
        outcome.max_len,
        outcome.training.epochs_run,
        outcome.training.initial_mae,
        outcome.training.final_mae
    );
    println!("✅ Model saved to: {}", outcome.model_path.display());
    println!("✅ Scaler copied to: {}", outcome.scaler_path.display());
    Ok(())
}

fn run_infer(args: &InferArgs, config: &PipelineConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("\n🔮 GPS TRACK INFERENCE");
    println!("=====================");
    println!("GPX file: {}", args.gpx.display());
    println!("Models:   {}", args.models.len());

    let engine = InferenceEngine::from_files(
        &args.scaler,
        &args.models,
        config.preprocess.clone(),
        config.inference.max_len,
    )?;
    let result = engine.infer(&args.gpx)?;

    for (i, p) in result.member_predictions.iter().enumerate() {
        println!(
            "Model {} prediction: [{:.1}, {:.1}, {:.1}]",
            i + 1,
            p.distance,
            p.elevation_gain,
            p.elevation_loss
        );
    }

    println!("\n=== INFERENCE RESULTS ===");
    println!("dist_total_m:   {:.1}", result.prediction.distance);
    println!("desnivel_pos_m: {:.1}", result.prediction.elevation_gain);
    println!("desnivel_neg_m: {:.1}", result.prediction.elevation_loss);
    if let Some(u) = &result.uncertainty {
        println!(
            "uncertainty_sigma: dist {:.1}, up {:.1}, down {:.1}",
            u.distance, u.elevation_gain, u.elevation_loss
        );
    }
    println!(
        "baseline:       [{:.1}, {:.1}, {:.1}]",
        result.baseline.distance, result.baseline.elevation_gain, result.baseline.elevation_loss
    );

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("{}_inference.json", result.track)));
    save_result(&output, &result)?;
    println!("\n✅ Results saved to: {}", output.display());
    Ok(())
}
