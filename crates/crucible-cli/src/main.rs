use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::LevelFilter;

use crucible_core::config::CrucibleConfig;
use crucible_core::{
    load_config, Dataset, Evaluator, LocalSandbox, LocalSandboxConfig, Sandbox, TaskStore,
};

#[derive(Parser, Debug)]
#[clap(
    name = "crucible",
    version = "0.1.0",
    about = "Evaluate untrusted code submissions against test suites"
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,

    #[clap(long, short, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check one code/test pair in the local sandbox and print the result
    /// as JSON
    Check {
        /// File containing the code to evaluate
        code_file: PathBuf,

        /// File containing the tests to run against it
        test_file: PathBuf,

        #[clap(
            long,
            default_value_t = 10.0,
            help = "Timeout for execution in seconds"
        )]
        timeout: f64,

        #[clap(long, help = "Also time the tests and report the minimum trial")]
        time: bool,

        #[clap(long, default_value = "python3", help = "Guest interpreter command")]
        interpreter: String,
    },

    /// Evaluate one submission against one task and print the record
    Evaluate {
        #[clap(long, short, help = "Configuration file (YAML); defaults apply if omitted")]
        config: Option<PathBuf>,

        #[clap(long, help = "JSON task file for the dataset split")]
        tasks: PathBuf,

        #[clap(long, help = "Dataset name: mbpp or openai_humaneval")]
        dataset: String,

        #[clap(long, default_value = "test")]
        split: String,

        #[clap(long)]
        task_id: usize,

        #[clap(long, help = "File containing the submission code")]
        code_file: PathBuf,
    },

    /// Evaluate one submission per task of a split and print all records
    Bulk {
        #[clap(long, short, help = "Configuration file (YAML); defaults apply if omitted")]
        config: Option<PathBuf>,

        #[clap(long, help = "JSON task file for the dataset split")]
        tasks: PathBuf,

        #[clap(long, help = "Dataset name: mbpp or openai_humaneval")]
        dataset: String,

        #[clap(long, default_value = "test")]
        split: String,

        #[clap(long, help = "JSON array of submissions, one per task")]
        submissions: PathBuf,

        #[clap(long, help = "Worker-pool width; defaults to host parallelism")]
        concurrency: Option<usize>,

        #[clap(long, short, help = "Write records to this file instead of stdout")]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = LevelFilter::from_str(&cli.log_level)
        .with_context(|| format!("invalid log level '{}'", cli.log_level))?;
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    match cli.command {
        Commands::Check {
            code_file,
            test_file,
            timeout,
            time,
            interpreter,
        } => check(code_file, test_file, timeout, time, interpreter).await,
        Commands::Evaluate {
            config,
            tasks,
            dataset,
            split,
            task_id,
            code_file,
        } => evaluate(config, tasks, dataset, split, task_id, code_file).await,
        Commands::Bulk {
            config,
            tasks,
            dataset,
            split,
            submissions,
            concurrency,
            output,
        } => bulk(config, tasks, dataset, split, submissions, concurrency, output).await,
    }
}

async fn check(
    code_file: PathBuf,
    test_file: PathBuf,
    timeout: f64,
    time: bool,
    interpreter: String,
) -> Result<()> {
    let code = tokio::fs::read_to_string(&code_file)
        .await
        .with_context(|| format!("failed to read {}", code_file.display()))?;
    let test_code = tokio::fs::read_to_string(&test_file)
        .await
        .with_context(|| format!("failed to read {}", test_file.display()))?;

    let sandbox = LocalSandbox::new(LocalSandboxConfig {
        interpreter,
        timeout_secs: timeout,
        evaluate_run_time: time,
        ..LocalSandboxConfig::default()
    });
    let result = sandbox.check_correctness(&code, &test_code).await?;
    println!("{}", serde_json::to_string(&result)?);
    Ok(())
}

async fn load_config_or_default(path: Option<PathBuf>) -> Result<CrucibleConfig> {
    match path {
        Some(path) => Ok(load_config(&path).await?),
        None => Ok(CrucibleConfig::default()),
    }
}

async fn build_evaluator(
    config: Option<PathBuf>,
    tasks: PathBuf,
    dataset: Dataset,
    split: &str,
) -> Result<Evaluator> {
    let config = load_config_or_default(config).await?;
    let mut store = TaskStore::new();
    store.load_split_file(dataset, split, &tasks).await?;
    Ok(Evaluator::from_config(&config, Arc::new(store))?)
}

async fn evaluate(
    config: Option<PathBuf>,
    tasks: PathBuf,
    dataset: String,
    split: String,
    task_id: usize,
    code_file: PathBuf,
) -> Result<()> {
    let dataset = Dataset::from_str(&dataset)?;
    let code = tokio::fs::read_to_string(&code_file)
        .await
        .with_context(|| format!("failed to read {}", code_file.display()))?;

    let evaluator = build_evaluator(config, tasks, dataset, &split).await?;
    let record = evaluator.evaluate(dataset, &split, task_id, &code).await?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

async fn bulk(
    config: Option<PathBuf>,
    tasks: PathBuf,
    dataset: String,
    split: String,
    submissions: PathBuf,
    concurrency: Option<usize>,
    output: Option<PathBuf>,
) -> Result<()> {
    let dataset = Dataset::from_str(&dataset)?;
    let raw = tokio::fs::read_to_string(&submissions)
        .await
        .with_context(|| format!("failed to read {}", submissions.display()))?;
    let code: Vec<String> = serde_json::from_str(&raw)
        .context("submissions file must be a JSON array of strings")?;

    let evaluator = build_evaluator(config, tasks, dataset, &split).await?;
    let records = evaluator
        .bulk_evaluate(dataset, &split, code, concurrency)
        .await?;

    let failures = records.iter().filter(|r| r.is_failure_sentinel()).count();
    if failures > 0 {
        log::warn!("{} of {} tasks ended in a failure sentinel", failures, records.len());
    }

    let rendered = serde_json::to_string_pretty(&records)?;
    match output {
        Some(path) => {
            tokio::fs::write(&path, rendered)
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
            log::info!("wrote {} records to {}", records.len(), path.display());
        }
        None => println!("{}", rendered),
    }
    Ok(())
}
