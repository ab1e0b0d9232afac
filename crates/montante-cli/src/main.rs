//! CLI entry point for montante training and prediction.

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use dotenv::dotenv;
use montante::{
    CsvSource, Montante, MontanteConfig, ModelSummary, RuntimeHandle, SchemaComposer,
    TrainingOutcome, ValidationError,
};
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Statistical runtime to train and predict with
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliRuntime {
    /// In-process decision trees
    Native,
    /// R and caret through rpy2 (needs the `rpy2` feature)
    Rpy2,
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Schema-validated model training and prediction",
    long_about = "Trains classification models from a CSV dataset and a JSON payload, \
                  stores them, and predicts with them.\n\n\
                  ENVIRONMENT VARIABLES:\n  \
                  MONTANTE_MODEL_DIR               Model storage directory\n  \
                  MONTANTE_TRAINING_TIMEOUT_SECS   Training timeout in seconds\n  \
                  MONTANTE_SEED                    Random seed for resampling\n  \
                  MONTANTE_STRICT_COLUMNS          Check prediction columns up front\n\n\
                  EXAMPLES:\n  \
                  # Print the training schema for caret C5.0\n  \
                  montante schema --engine caret --method C5.0\n\n  \
                  # Train and store a model\n  \
                  montante train -i iris.csv -p payload.json\n\n  \
                  # Predict with a stored model\n  \
                  montante predict -m <uuid> -d '{\"petal_width_cm\": [0.2, 1.8]}'"
)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Model storage directory (overrides MONTANTE_MODEL_DIR)
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    /// Statistical runtime
    #[arg(long, value_enum, default_value = "native", global = true)]
    runtime: CliRuntime,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Suppress progress output (only show errors and final result)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Output JSON to stdout instead of a human-readable summary
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a training schema
    ///
    /// Without --engine, prints the base schema shared by every engine.
    Schema {
        /// Engine id
        #[arg(short, long)]
        engine: Option<String>,

        /// Engine method
        #[arg(short, long)]
        method: Option<String>,
    },

    /// Validate a training payload without training
    Validate {
        /// Path to the JSON payload
        #[arg(short, long)]
        payload: PathBuf,
    },

    /// Train a model and store it
    Train {
        /// Path to the CSV dataset
        #[arg(short, long)]
        input: PathBuf,

        /// Path to the JSON payload
        #[arg(short, long)]
        payload: PathBuf,

        /// CSV field separator
        #[arg(long, default_value = ",")]
        separator: char,
    },

    /// Predict with a stored model
    Predict {
        /// Id of the stored model
        #[arg(short, long)]
        model: Uuid,

        /// Prediction data as `{column: [values...]}`, inline or `@path`
        #[arg(short, long)]
        data: String,
    },
}

/// Initialize the tracing subscriber for logging.
///
/// When `json_output` is true, logging is disabled so stdout only carries JSON.
fn init_logging(level: &str, quiet: bool, json_output: bool) {
    if json_output {
        return;
    }

    use tracing_subscriber::EnvFilter;

    let effective_level = if quiet { "warn" } else { level };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(effective_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level, args.quiet, args.json);

    // Load environment variables from .env file
    dotenv().ok();

    let mut config = MontanteConfig::from_env()?;
    if let Some(dir) = &args.model_dir {
        config.model_dir = dir.clone();
    }
    debug!("Configuration: {:?}", config);

    match &args.command {
        Command::Schema { engine, method } => run_schema(engine.as_deref(), method.as_deref()),
        Command::Validate { payload } => {
            let montante = build(&args, config)?;
            run_validate(&montante, payload, args.json)
        }
        Command::Train {
            input,
            payload,
            separator,
        } => {
            let montante = build(&args, config)?;
            run_train(&montante, input, payload, *separator, args.json)
        }
        Command::Predict { model, data } => {
            let montante = build(&args, config)?;
            run_predict(&montante, model, data, args.json)
        }
    }
}

fn build(args: &Args, config: MontanteConfig) -> Result<Montante> {
    let runtime = match args.runtime {
        CliRuntime::Native => RuntimeHandle::native(config.random_seed),
        CliRuntime::Rpy2 => rpy2_runtime(config.random_seed)?,
    };
    info!("Using runtime: {}", runtime.name());
    Ok(Montante::builder().config(config).runtime(runtime).build()?)
}

#[cfg(feature = "rpy2")]
fn rpy2_runtime(seed: u64) -> Result<RuntimeHandle> {
    let runtime = montante::runtime::rpy2::Rpy2Runtime::new(seed)?;
    Ok(RuntimeHandle::new(runtime))
}

#[cfg(not(feature = "rpy2"))]
fn rpy2_runtime(_seed: u64) -> Result<RuntimeHandle> {
    Err(anyhow!(
        "this build has no rpy2 support, rebuild with `--features rpy2`"
    ))
}

fn read_json(path: &Path) -> Result<Value> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("{} is not valid JSON", path.display()))
}

fn run_schema(engine: Option<&str>, method: Option<&str>) -> Result<()> {
    let composer = SchemaComposer::with_default_engines();
    let schema = match engine {
        Some(engine) => composer.compose_training_schema(engine, method)?,
        None => composer.base_training_schema(),
    };
    println!("{schema:#}");
    Ok(())
}

fn run_validate(montante: &Montante, payload: &Path, json_output: bool) -> Result<()> {
    let errors = montante.validate(&read_json(payload)?)?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&errors)?);
    } else if errors.is_empty() {
        println!("✓ {} is a valid training payload", payload.display());
    } else {
        print_errors(&errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(anyhow!("payload has {} validation error(s)", errors.len()))
    }
}

fn run_train(
    montante: &Montante,
    input: &Path,
    payload: &Path,
    separator: char,
    json_output: bool,
) -> Result<()> {
    let separator = u8::try_from(separator)
        .map_err(|_| anyhow!("separator must be a single-byte character"))?;
    let source = CsvSource::new(input).with_separator(separator);
    info!("Training from: {}", input.display());

    let model = match montante.train_source(&source, &read_json(payload)?)? {
        TrainingOutcome::Trained(model) => model,
        TrainingOutcome::Rejected(errors) => {
            if json_output {
                println!("{}", serde_json::to_string_pretty(&errors)?);
            } else {
                print_errors(&errors);
            }
            return Err(anyhow!("training payload rejected"));
        }
    };

    let id = montante.save_model(&model)?;
    let summary = model.summary();

    if json_output {
        let out = json!({"model_uuid": id, "summary": summary});
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        print_summary(&id, &summary);
    }
    Ok(())
}

fn run_predict(montante: &Montante, id: &Uuid, data: &str, json_output: bool) -> Result<()> {
    let request: Value = match data.strip_prefix('@') {
        Some(path) => read_json(Path::new(path))?,
        None => serde_json::from_str(data).context("prediction data is not valid JSON")?,
    };

    let model = montante.load_model(id)?;
    let pairs = montante.predict(&model, &request)?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&pairs)?);
    } else {
        for (row, pair) in pairs.iter().enumerate() {
            println!("{row:>4}  {:>3}  {}", pair.code, pair.label);
        }
    }
    Ok(())
}

fn print_errors(errors: &[ValidationError]) {
    warn!("{} validation error(s)", errors.len());
    for error in errors {
        println!("  ✗ {error}");
    }
}

fn print_summary(id: &Uuid, summary: &ModelSummary) {
    println!("\n=== Model Stored ===");
    println!("Model UUID: {id}");
    println!("Engine: {} {} ({})", summary.engine, summary.method, summary.runtime);
    println!("Target: {} {:?}", summary.target, summary.levels);
    println!(
        "Predictors: {}",
        summary
            .predictors
            .iter()
            .map(|c| format!("{} ({})", c.name, c.kind))
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("Resampling: {}", summary.resampling);
    println!("Training rows: {}", summary.training_rows);

    if !summary.tuning.is_empty() {
        println!("\nTuning ({}):", summary.metric);
        for result in &summary.tuning {
            let marker = if summary.selected_trials == Some(result.trials) {
                "*"
            } else {
                " "
            };
            println!(
                "  {marker} trials {:>3}  accuracy {:.4}  kappa {:.4}",
                result.trials, result.accuracy, result.kappa
            );
        }
    }
}
