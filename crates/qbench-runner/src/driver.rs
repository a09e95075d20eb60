use anyhow::Result;
use qbench_analysis::write_reports;
use qbench_core::{ExperimentKey, Family, ResultStore, VariantSpec};
use serde::Serialize;
use tracing::{debug, info};

use crate::backend::{Backend, Experiment};
use crate::benchmark::{circuit_path, BenchmarkDescriptor, ORIGIN_VARIANT};
use crate::config::MatrixConfig;

/// Called after a benchmark file produced at least one new row.
pub trait ReportHook {
    fn refresh(&mut self, store: &ResultStore) -> Result<()>;
}

impl<F: FnMut(&ResultStore) -> Result<()>> ReportHook for F {
    fn refresh(&mut self, store: &ResultStore) -> Result<()> {
        self(store)
    }
}

pub struct LatexReports {
    variants: Vec<VariantSpec>,
}

impl LatexReports {
    pub fn new(variants: &[VariantSpec]) -> Self {
        Self {
            variants: variants.to_vec(),
        }
    }
}

impl ReportHook for LatexReports {
    fn refresh(&mut self, store: &ResultStore) -> Result<()> {
        write_reports(store, &self.variants)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub benchmarks: usize,
    pub invoked: usize,
    pub skipped: usize,
    pub timeouts: usize,
    pub report_refreshes: usize,
}

/// Walks benchmarks x variants x backends and fills in missing cells.
///
/// The driver is the only writer of its store. Each new row is flushed before
/// the next backend starts, so an interrupted run loses at most the cell that
/// was in flight.
pub struct MatrixDriver {
    config: MatrixConfig,
    family: Family,
    store: ResultStore,
    backends: Vec<Box<dyn Backend>>,
}

impl MatrixDriver {
    pub fn new(
        config: MatrixConfig,
        family: Family,
        store: ResultStore,
        backends: Vec<Box<dyn Backend>>,
    ) -> Self {
        Self {
            config,
            family,
            store,
            backends,
        }
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    pub fn into_store(self) -> ResultStore {
        self.store
    }

    pub fn run(
        &mut self,
        benchmarks: &[BenchmarkDescriptor],
        reports: &mut dyn ReportHook,
    ) -> Result<RunSummary> {
        let mut summary = RunSummary {
            benchmarks: benchmarks.len(),
            ..RunSummary::default()
        };
        for (idx, benchmark) in benchmarks.iter().enumerate() {
            info!(
                family = %self.family,
                progress = %format!("{}/{}", idx + 1, benchmarks.len()),
                file = %benchmark.file_name,
                "processing benchmark"
            );
            self.store.reload()?;
            if self.run_benchmark(benchmark, &mut summary)? {
                reports.refresh(&self.store)?;
                summary.report_refreshes += 1;
            }
        }
        Ok(summary)
    }

    fn run_benchmark(
        &mut self,
        benchmark: &BenchmarkDescriptor,
        summary: &mut RunSummary,
    ) -> Result<bool> {
        let folder = &self.config.benchmark_folder;
        let origin = circuit_path(folder, ORIGIN_VARIANT, &benchmark.file_name);
        let variants: Vec<Option<String>> = match self.family {
            Family::Equivalence => self
                .config
                .equivalence
                .variants
                .iter()
                .map(|v| Some(v.name.clone()))
                .collect(),
            Family::Simulation => vec![None],
        };

        let mut produced = false;
        for variant in variants {
            let modified = variant
                .as_deref()
                .map(|v| circuit_path(folder, v, &benchmark.file_name));
            for backend in &self.backends {
                let key = ExperimentKey {
                    variant: variant.clone(),
                    algo: benchmark.algo.clone(),
                    qubits: benchmark.qubits,
                    tool: backend.tool().to_string(),
                };
                if self.store.exists(&key) {
                    debug!(key = %key, "cached, skipping");
                    summary.skipped += 1;
                    continue;
                }
                let experiment = Experiment {
                    key,
                    origin: origin.clone(),
                    modified: modified.clone(),
                };
                let invocation = backend.invoke(&experiment, self.config.budget())?;
                info!(
                    key = %experiment.key,
                    result = %invocation.outcome,
                    elapsed_secs = invocation.elapsed_secs,
                    "recorded result"
                );
                if invocation.outcome.is_timeout() {
                    summary.timeouts += 1;
                }
                self.store
                    .append(experiment.key, invocation.outcome, invocation.elapsed_secs)?;
                self.store.flush()?;
                summary.invoked += 1;
                produced = true;
            }
        }
        Ok(produced)
    }
}
