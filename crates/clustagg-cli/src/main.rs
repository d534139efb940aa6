use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use clustagg_engine::{
    aggregate_roots, discover_run_directories, score_files, write_tables, AggregatorConfig,
    Aggregation, AggregationSummary, OutputFormat,
};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "clustagg",
    version = "0.3.0",
    about = "Aggregate clustbench run trees into method and metric tables"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FormatArg {
    #[value(name = "csv")]
    Csv,
    #[value(name = "json")]
    Json,
    #[value(name = "both")]
    Both,
}

impl From<FormatArg> for OutputFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Csv => OutputFormat::Csv,
            FormatArg::Json => OutputFormat::Json,
            FormatArg::Both => OutputFormat::Both,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Parse every score file under the roots and write the two tables.
    Aggregate {
        #[arg(required = true)]
        roots: Vec<PathBuf>,
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
        #[arg(long, value_enum, default_value_t = FormatArg::Csv)]
        format: FormatArg,
        /// Worker threads; defaults to the number of CPUs.
        #[arg(long)]
        cores: Option<usize>,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        debug: bool,
        #[arg(long)]
        json: bool,
    },
    /// List run directories without parsing score files.
    Discover {
        #[arg(required = true)]
        roots: Vec<PathBuf>,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        debug: bool,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(command_debug(&cli.command));
    let json_mode = command_json_mode(&cli.command);
    let result = run_command(cli.command);
    match result {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                emit_json(&json_error("command_failed", format!("{:#}", err), json!({})));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<AggregatorConfig> {
    match path {
        Some(p) => AggregatorConfig::load(p),
        None => Ok(AggregatorConfig::default()),
    }
}

fn run_command(command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Aggregate {
            roots,
            out_dir,
            format,
            cores,
            config,
            debug,
            json,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(cores) = cores {
                config = config.with_workers(cores);
            }
            let format = OutputFormat::from(format);
            let aggregation = aggregate_roots(&roots, &config)?;

            let outputs = if aggregation.metric_records.is_empty() {
                Vec::new()
            } else {
                write_tables(&aggregation, &out_dir, format)?.files
            };
            for path in &outputs {
                info!(path = %path.display(), "wrote");
            }

            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "aggregate",
                    "summary": summary_to_json(&aggregation),
                    "outputs": outputs.iter().map(|p| p.display().to_string()).collect::<Vec<_>>(),
                    "anomaly_files": aggregation
                        .anomaly_files
                        .iter()
                        .map(|p| p.display().to_string())
                        .collect::<Vec<_>>(),
                    "format": format.as_str(),
                    "workers": config.workers,
                })));
            }
            if aggregation.metric_records.is_empty() {
                println!("no matching score files found");
                return Ok(None);
            }
            print_summary(&aggregation);
            for path in &outputs {
                println!("output: {}", path.display());
            }
            if debug && !aggregation.anomaly_files.is_empty() {
                println!("duplicate_k_anomaly_files:");
                for path in &aggregation.anomaly_files {
                    println!("  {}", path.display());
                }
            }
        }
        Commands::Discover {
            roots,
            config,
            json,
            ..
        } => {
            let config = load_config(config.as_deref())?;
            let mut listed = Vec::new();
            for root in &roots {
                for run in discover_run_directories(root) {
                    let files = score_files(&run.path, &config).len();
                    listed.push((root.clone(), run, files));
                }
            }
            if json {
                let runs: Vec<Value> = listed
                    .iter()
                    .map(|(root, run, files)| {
                        json!({
                            "root": root.display().to_string(),
                            "run_dir": run.path.display().to_string(),
                            "source_dir": run.source_dir,
                            "backend": run.backend,
                            "timestamp": run.timestamp,
                            "score_files": files,
                        })
                    })
                    .collect();
                return Ok(Some(json!({
                    "ok": true,
                    "command": "discover",
                    "runs": runs,
                })));
            }
            if listed.is_empty() {
                println!("no run directories found");
            }
            for (_, run, files) in &listed {
                println!(
                    "{}\tbackend={}\ttimestamp={}\tscore_files={}",
                    run.path.display(),
                    run.backend.as_deref().unwrap_or("unknown"),
                    run.timestamp.as_deref().unwrap_or("unknown"),
                    files
                );
            }
        }
    }
    Ok(None)
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Aggregate { json, .. } | Commands::Discover { json, .. } => *json,
    }
}

fn command_debug(command: &Commands) -> bool {
    match command {
        Commands::Aggregate { debug, .. } | Commands::Discover { debug, .. } => *debug,
    }
}

fn counts_to_json(summary: &AggregationSummary) -> Value {
    json!({
        "run_directories": summary.run_directories,
        "score_files": summary.score_files,
        "failed_files": summary.failed_files,
        "empty_files": summary.empty_files,
        "missing_true_k_scores": summary.missing_true_k_scores,
        "duplicate_k_anomalies": summary.duplicate_k_anomalies,
        "method_records": summary.method_records,
        "metric_records": summary.metric_records,
    })
}

fn summary_to_json(aggregation: &Aggregation) -> Value {
    json!({
        "counts": counts_to_json(&aggregation.summary),
        "source_dirs": aggregation.source_dirs,
        "backend": aggregation.backend,
        "timestamp": aggregation.timestamp,
        "backends": aggregation.backends,
        "datasets": aggregation.distinct_datasets(),
        "methods": aggregation.distinct_methods(),
        "metrics": aggregation.distinct_metrics(),
    })
}

fn print_summary(aggregation: &Aggregation) {
    let s = &aggregation.summary;
    println!("source_dirs: {}", aggregation.source_dirs.join(", "));
    if let Some(backend) = &aggregation.backend {
        println!("backend: {}", backend);
    } else if !aggregation.backends.is_empty() {
        println!("backends: {}", aggregation.backends.join(", "));
    }
    if let Some(ts) = &aggregation.timestamp {
        println!("timestamp: {}", ts);
    }
    println!("run_directories: {}", s.run_directories);
    println!("score_files: {}", s.score_files);
    println!("failed_files: {}", s.failed_files);
    println!("method_records: {}", s.method_records);
    println!("metric_records: {}", s.metric_records);
    println!("datasets: {}", aggregation.distinct_datasets());
    println!("methods: {}", aggregation.distinct_methods());
    println!("metrics: {}", aggregation.distinct_metrics());
    println!("empty_files: {}", s.empty_files);
    println!("missing_true_k_scores: {}", s.missing_true_k_scores);
    println!("duplicate_k_anomalies: {}", s.duplicate_k_anomalies);
}
