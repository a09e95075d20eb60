use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use qbench_analysis::{ConsistencyError, ValidationReport};
use qbench_core::{Family, MatrixError, ResultStore};
use qbench_runner::{BenchmarkSource, MatrixConfig, ScratchDir};
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "qbench",
    version = "0.3.0",
    about = "Cross-tool quantum circuit verification and simulation benchmarks"
)]
struct Cli {
    /// YAML configuration; defaults to ./qbench.yaml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FamilyArg {
    #[value(name = "eqcheck")]
    Eqcheck,
    #[value(name = "simulation")]
    Simulation,
}

impl From<FamilyArg> for Family {
    fn from(value: FamilyArg) -> Self {
        match value {
            FamilyArg::Eqcheck => Family::Equivalence,
            FamilyArg::Simulation => Family::Simulation,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Fill in every missing cell of the matrix, then check and report.
    Run {
        #[arg(value_enum)]
        family: FamilyArg,
        /// Use every circuit under <benchmark_folder>/origin instead of the list file.
        #[arg(long)]
        discover: bool,
        #[arg(long)]
        skip_check: bool,
        #[arg(long)]
        json: bool,
    },
    Check {
        #[arg(value_enum)]
        family: FamilyArg,
        #[arg(long)]
        json: bool,
    },
    Report {
        #[arg(value_enum)]
        family: FamilyArg,
        #[arg(long)]
        json: bool,
    },
    Sort {
        #[arg(value_enum)]
        family: FamilyArg,
        #[arg(long)]
        json: bool,
    },
    Status {
        #[arg(value_enum)]
        family: Option<FamilyArg>,
        #[arg(long)]
        json: bool,
    },
    CleanScratch {
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let json_mode = command_json_mode(&cli.command);
    let result = run_command(cli.command, cli.config);
    match result {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                emit_json(&json_error(error_code(&err), format!("{:#}", err), json!({})));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_command(command: Commands, config_path: Option<PathBuf>) -> Result<Option<Value>> {
    let config = MatrixConfig::load(config_path.as_deref())?;
    match command {
        Commands::Run {
            family,
            discover,
            skip_check,
            json,
        } => {
            let family = Family::from(family);
            let source = if discover {
                BenchmarkSource::Discover
            } else {
                BenchmarkSource::List
            };
            let benchmarks = qbench_runner::load_benchmarks(&config, family, source)?;
            let run = qbench_runner::run(&config, family, &benchmarks)?;
            let validation = if skip_check {
                None
            } else {
                Some(check_store(&config, &run.store)?)
            };
            let reports = qbench_analysis::write_reports(&run.store, config.variants(family))?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "run",
                    "family": family.as_str(),
                    "results": run.store.path().display().to_string(),
                    "summary": serde_json::to_value(&run.summary)?,
                    "validation": validation.as_ref().map(serde_json::to_value).transpose()?,
                    "reports": paths_to_json(&reports)
                })));
            }
            println!("family: {}", family);
            println!("results: {}", run.store.path().display());
            println!("benchmarks: {}", run.summary.benchmarks);
            println!("invoked: {}", run.summary.invoked);
            println!("skipped: {}", run.summary.skipped);
            println!("timeouts: {}", run.summary.timeouts);
            match validation {
                Some(report) => print_validation(&report),
                None => println!("check: skipped"),
            }
            print_paths("report", &reports);
        }
        Commands::Check { family, json } => {
            let store = open_store(&config, family.into())?;
            let report = check_store(&config, &store)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "check",
                    "validation": serde_json::to_value(&report)?
                })));
            }
            print_validation(&report);
        }
        Commands::Report { family, json } => {
            let family = Family::from(family);
            let store = open_store(&config, family)?;
            let reports = qbench_analysis::write_reports(&store, config.variants(family))?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "report",
                    "family": family.as_str(),
                    "reports": paths_to_json(&reports)
                })));
            }
            print_paths("report", &reports);
        }
        Commands::Sort { family, json } => {
            let family = Family::from(family);
            let mut store = open_store(&config, family)?;
            store.sort_by(family.default_sort());
            store.flush()?;
            info!(path = %store.path().display(), rows = store.len(), "sorted results");
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "sort",
                    "results": store.path().display().to_string(),
                    "rows": store.len()
                })));
            }
            println!("sorted: {} ({} rows)", store.path().display(), store.len());
        }
        Commands::Status { family, json } => {
            let families = match family {
                Some(family) => vec![Family::from(family)],
                None => vec![Family::Equivalence, Family::Simulation],
            };
            let mut summaries = Vec::new();
            for family in families {
                let store = open_store(&config, family)?;
                summaries.push((store.path().to_path_buf(), qbench_analysis::summarize(&store)));
            }
            if json {
                let entries = summaries
                    .iter()
                    .map(|(path, summary)| {
                        Ok(json!({
                            "results": path.display().to_string(),
                            "summary": serde_json::to_value(summary)?
                        }))
                    })
                    .collect::<Result<Vec<Value>>>()?;
                return Ok(Some(json!({
                    "ok": true,
                    "command": "status",
                    "stores": entries
                })));
            }
            for (path, summary) in &summaries {
                println!("{}: {}", summary.family, path.display());
                println!("  rows: {}", summary.rows);
                println!("  timeouts: {}", summary.timeouts);
                for (tool, count) in &summary.per_tool {
                    println!("  {}: {}", tool, count);
                }
            }
        }
        Commands::CleanScratch { json } => {
            let scratch = ScratchDir::new(&config.scratch_dir);
            let existed = scratch.root().exists();
            scratch.purge()?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "clean-scratch",
                    "scratch_dir": scratch.root().display().to_string(),
                    "removed": existed
                })));
            }
            if existed {
                println!("removed: {}", scratch.root().display());
            } else {
                println!("nothing to remove: {}", scratch.root().display());
            }
        }
    }
    Ok(None)
}

fn open_store(config: &MatrixConfig, family: Family) -> Result<ResultStore> {
    ResultStore::open(&config.results_path(family), family)
}

fn check_store(config: &MatrixConfig, store: &ResultStore) -> Result<ValidationReport> {
    let family = store.family();
    let report = match family {
        Family::Equivalence => qbench_analysis::validate_equivalence(store, config.variants(family))?,
        Family::Simulation => qbench_analysis::validate_simulation(
            store,
            &config.tool_names(family),
            config.timeout_secs,
            &config.tolerances,
        )?,
    };
    Ok(report)
}

fn print_validation(report: &ValidationReport) {
    println!("check: ok");
    println!("  family: {}", report.family);
    println!("  rows_checked: {}", report.rows_checked);
    println!("  groups_checked: {}", report.groups_checked);
    println!("  timeouts: {}", report.timeouts);
}

fn print_paths(label: &str, paths: &[PathBuf]) {
    for path in paths {
        println!("{}: {}", label, path.display());
    }
}

fn paths_to_json(paths: &[PathBuf]) -> Value {
    json!(paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<String>>())
}

fn error_code(err: &anyhow::Error) -> &'static str {
    if err.downcast_ref::<ConsistencyError>().is_some() {
        return "consistency_failed";
    }
    match err.downcast_ref::<MatrixError>() {
        Some(MatrixError::DuplicateKey(_)) | Some(MatrixError::KeyShape { .. }) => "store_conflict",
        Some(MatrixError::MalformedOutput { .. }) => "malformed_output",
        Some(MatrixError::BackendFailed { .. }) => "backend_failed",
        Some(MatrixError::StoreFormat { .. }) => "store_format",
        Some(MatrixError::Config(_)) => "config_invalid",
        Some(MatrixError::Benchmark(_)) => "benchmark_invalid",
        None => "command_failed",
    }
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
        Commands::Run { json, .. }
        | Commands::Check { json, .. }
        | Commands::Report { json, .. }
        | Commands::Sort { json, .. }
        | Commands::Status { json, .. }
        | Commands::CleanScratch { json } => *json,
    }
}
