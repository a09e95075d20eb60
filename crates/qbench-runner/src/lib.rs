use anyhow::Result;
use qbench_core::{Family, ResultStore};
use tracing::info;

pub mod backend;
pub mod benchmark;
pub mod config;
pub mod driver;
pub mod scratch;

pub use backend::{build_backends, Backend, CommandBackend, Experiment, Invocation};
pub use benchmark::BenchmarkDescriptor;
pub use config::{MatrixConfig, ToolSpec};
pub use driver::{LatexReports, MatrixDriver, ReportHook, RunSummary};
pub use scratch::ScratchDir;

pub struct MatrixRun {
    pub store: ResultStore,
    pub summary: RunSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BenchmarkSource {
    List,
    Discover,
}

pub fn load_benchmarks(
    config: &MatrixConfig,
    family: Family,
    source: BenchmarkSource,
) -> Result<Vec<BenchmarkDescriptor>> {
    let names = match source {
        BenchmarkSource::List => benchmark::load_list(config.benchmark_list(family))?,
        BenchmarkSource::Discover => benchmark::discover(&config.benchmark_folder)?,
    };
    benchmark::resolve_all(&config.benchmark_folder, &names)
}

/// Runs every missing cell of `family` for `benchmarks`, then purges scratch
/// files and leaves the results file sorted.
pub fn run(
    config: &MatrixConfig,
    family: Family,
    benchmarks: &[BenchmarkDescriptor],
) -> Result<MatrixRun> {
    let store = ResultStore::open(&config.results_path(family), family)?;
    let scratch = ScratchDir::new(&config.scratch_dir);
    let backends = build_backends(config, family, &scratch)?;
    let mut reports = LatexReports::new(config.variants(family));
    run_with(config, family, store, backends, benchmarks, &mut reports, &scratch)
}

/// [`run`] with the store, backends and report hook supplied by the caller.
pub fn run_with(
    config: &MatrixConfig,
    family: Family,
    store: ResultStore,
    backends: Vec<Box<dyn Backend>>,
    benchmarks: &[BenchmarkDescriptor],
    reports: &mut dyn ReportHook,
    scratch: &ScratchDir,
) -> Result<MatrixRun> {
    let mut driver = MatrixDriver::new(config.clone(), family, store, backends);
    let summary = driver.run(benchmarks, reports)?;
    scratch.purge()?;

    let mut store = driver.into_store();
    store.reload()?;
    store.sort_by(family.default_sort());
    store.flush()?;
    info!(
        family = %family,
        invoked = summary.invoked,
        skipped = summary.skipped,
        timeouts = summary.timeouts,
        rows = store.len(),
        "matrix pass complete"
    );
    Ok(MatrixRun { store, summary })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use qbench_core::{ExperimentKey, Outcome};
    use std::fs;
    use std::path::PathBuf;
    use std::time::Duration;

    struct Constant {
        tool: &'static str,
        value: f64,
    }

    impl Backend for Constant {
        fn tool(&self) -> &str {
            self.tool
        }

        fn family(&self) -> Family {
            Family::Simulation
        }

        fn invoke(&self, _experiment: &Experiment, _budget: Duration) -> Result<Invocation> {
            Ok(Invocation {
                outcome: Outcome::Numeric(self.value),
                elapsed_secs: 0.5,
            })
        }
    }

    fn temp_dir(label: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "qbench_run_test_{}_{}_{}",
            label,
            std::process::id(),
            Utc::now().timestamp_micros()
        ))
    }

    #[test]
    fn run_with_sorts_store_and_purges_scratch() {
        let dir = temp_dir("run_with");
        let mut config = MatrixConfig::default();
        config.results_dir = dir.join("results");
        config.scratch_dir = dir.join("temp");
        fs::create_dir_all(&config.scratch_dir).expect("scratch");

        let store = ResultStore::open(&config.results_path(Family::Simulation), Family::Simulation)
            .expect("open");
        let backends: Vec<Box<dyn Backend>> = vec![
            Box::new(Constant { tool: "Z", value: 0.25 }),
            Box::new(Constant { tool: "A", value: 0.25 }),
        ];
        let benchmarks = vec![
            BenchmarkDescriptor {
                file_name: "qft_5.qasm".to_string(),
                algo: "qft".to_string(),
                qubits: 5,
            },
            BenchmarkDescriptor {
                file_name: "ghz_3.qasm".to_string(),
                algo: "ghz".to_string(),
                qubits: 3,
            },
        ];
        let scratch = ScratchDir::new(&config.scratch_dir);
        let mut reports = LatexReports::new(&[]);
        let result = run_with(
            &config,
            Family::Simulation,
            store,
            backends,
            &benchmarks,
            &mut reports,
            &scratch,
        )
        .expect("run");

        assert_eq!(result.summary.invoked, 4);
        assert!(!config.scratch_dir.exists());
        let keys: Vec<&ExperimentKey> = result.store.rows().iter().map(|r| &r.key).collect();
        assert_eq!(keys[0], &ExperimentKey::simulation("ghz", 3, "A"));
        assert_eq!(keys[3], &ExperimentKey::simulation("qft", 5, "Z"));
        assert!(dir.join("results").join("compare_simulations.tex").exists());

        let text = fs::read_to_string(config.results_path(Family::Simulation)).expect("csv");
        assert!(text.starts_with("qubits,algo,tool,result,time\n3,ghz,A,0.25,0.5\n"));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn benchmarks_load_from_list_or_discovery() {
        let dir = temp_dir("load");
        let mut config = MatrixConfig::default();
        config.benchmark_folder = dir.join("algorithm");
        config.simulation.benchmark_list = dir.join("list.txt");
        fs::create_dir_all(config.benchmark_folder.join("origin")).expect("origin");
        fs::write(config.benchmark_folder.join("origin").join("qft_3.qasm"), "").expect("qft");
        fs::write(
            config.benchmark_folder.join("origin").join("grover.qasm"),
            "qreg q[7];\n",
        )
        .expect("grover");
        fs::write(&config.simulation.benchmark_list, "qft_3.qasm\n").expect("list");

        let listed = load_benchmarks(&config, Family::Simulation, BenchmarkSource::List)
            .expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].qubits, 3);

        let found = load_benchmarks(&config, Family::Simulation, BenchmarkSource::Discover)
            .expect("discover");
        let names: Vec<(&str, u32)> = found.iter().map(|b| (b.algo.as_str(), b.qubits)).collect();
        assert_eq!(names, vec![("grover", 7), ("qft", 3)]);
        let _ = fs::remove_dir_all(dir);
    }
}
