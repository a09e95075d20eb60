//! Run configuration.
//!
//! Loaded once at start-up and handed to the driver and the backend adapters by
//! value; nothing reads configuration from ambient state afterwards. Sources,
//! later overriding earlier:
//!
//! 1. Built-in defaults
//! 2. `qbench.yaml` (or the path given on the command line)
//! 3. Environment variables (`QBENCH_*`)

use anyhow::{anyhow, Result};
use qbench_analysis::Tolerances;
use qbench_core::{Expectation, Family, MatrixError, VariantSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "qbench.yaml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatrixConfig {
    /// Budget for every single backend invocation.
    pub timeout_secs: f64,
    /// Holds one sub-directory per variant, plus `origin`.
    pub benchmark_folder: PathBuf,
    pub results_dir: PathBuf,
    pub scratch_dir: PathBuf,
    pub tolerances: Tolerances,
    pub equivalence: EquivalenceConfig,
    pub simulation: SimulationConfig,
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300.0,
            benchmark_folder: PathBuf::from("algorithm"),
            results_dir: PathBuf::from("results"),
            scratch_dir: PathBuf::from("temp"),
            tolerances: Tolerances::default(),
            equivalence: EquivalenceConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EquivalenceConfig {
    pub results_file: String,
    pub benchmark_list: PathBuf,
    pub variants: Vec<VariantSpec>,
    pub tools: Vec<ToolSpec>,
}

impl Default for EquivalenceConfig {
    fn default() -> Self {
        Self {
            results_file: "compare_eqcheck.csv".to_string(),
            benchmark_list: PathBuf::from("compare_benchmarks_list.txt"),
            variants: vec![
                VariantSpec::new("opt", Expectation::Equivalent),
                VariantSpec::new("gm", Expectation::NonEquivalent),
            ],
            tools: vec![
                ToolSpec::quokka("comp", "cyclic", 1),
                ToolSpec::quokka("pauli", "linear", 16),
                ToolSpec::Sliqec {
                    program: PathBuf::from("../../SliQEC/SliQEC"),
                },
                ToolSpec::Qcec {
                    program: PathBuf::from("qcec-verify"),
                },
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub results_file: String,
    pub benchmark_list: PathBuf,
    pub tools: Vec<ToolSpec>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            results_file: "compare_simulations.csv".to_string(),
            benchmark_list: PathBuf::from("compare_simulation_benchmarks_list.txt"),
            tools: vec![
                ToolSpec::quokka("comp", "cyclic", 1),
                ToolSpec::quokka("pauli", "linear", 16),
                ToolSpec::Sliqsim {
                    program: PathBuf::from("../../SliQSim/SliQSim"),
                },
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolSpec {
    QuokkaSharp {
        #[serde(default = "default_quokka_program")]
        program: PathBuf,
        basis: String,
        /// Equivalence only.
        #[serde(default = "default_quokka_check")]
        check: String,
        /// Equivalence only.
        #[serde(default = "default_quokka_threads")]
        threads: u32,
        /// Simulation only.
        #[serde(default = "default_quokka_measurement")]
        measurement: String,
    },
    Qcec {
        program: PathBuf,
    },
    Sliqec {
        program: PathBuf,
    },
    Sliqsim {
        program: PathBuf,
    },
}

fn default_quokka_program() -> PathBuf {
    PathBuf::from("quokka-sharp")
}

fn default_quokka_check() -> String {
    "cyclic".to_string()
}

fn default_quokka_threads() -> u32 {
    1
}

fn default_quokka_measurement() -> String {
    "allzero".to_string()
}

impl ToolSpec {
    pub fn quokka(basis: &str, check: &str, threads: u32) -> Self {
        ToolSpec::QuokkaSharp {
            program: default_quokka_program(),
            basis: basis.to_string(),
            check: check.to_string(),
            threads,
            measurement: default_quokka_measurement(),
        }
    }

    pub fn tool_name(&self) -> String {
        match self {
            ToolSpec::QuokkaSharp { basis, .. } => format!("quokka-sharp-{}", basis),
            ToolSpec::Qcec { .. } => "QCEC".to_string(),
            ToolSpec::Sliqec { .. } => "SliQEC".to_string(),
            ToolSpec::Sliqsim { .. } => "SliQSim".to_string(),
        }
    }

    pub fn supports(&self, family: Family) -> bool {
        match self {
            ToolSpec::QuokkaSharp { .. } => true,
            ToolSpec::Qcec { .. } | ToolSpec::Sliqec { .. } => family == Family::Equivalence,
            ToolSpec::Sliqsim { .. } => family == Family::Simulation,
        }
    }
}

impl MatrixConfig {
    /// Reads `path`, or `qbench.yaml` in the working directory when no path is
    /// given and that file exists, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read config {}: {}", path.display(), e))?;
        let config: MatrixConfig = serde_yaml::from_str(&raw)
            .map_err(|e| MatrixError::Config(format!("{}: {}", path.display(), e)))?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(val) = env::var("QBENCH_TIMEOUT_SECS") {
            self.timeout_secs = val.parse().map_err(|_| {
                MatrixError::Config(format!("QBENCH_TIMEOUT_SECS is not a number: {}", val))
            })?;
        }
        if let Ok(val) = env::var("QBENCH_RESULTS_DIR") {
            self.results_dir = PathBuf::from(val);
        }
        if let Ok(val) = env::var("QBENCH_SCRATCH_DIR") {
            self.scratch_dir = PathBuf::from(val);
        }
        if let Ok(val) = env::var("QBENCH_BENCHMARK_FOLDER") {
            self.benchmark_folder = PathBuf::from(val);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !self.timeout_secs.is_finite() || self.timeout_secs <= 0.0 {
            return Err(config_err(format!(
                "timeout_secs must be positive, got {}",
                self.timeout_secs
            )));
        }
        if Duration::try_from_secs_f64(self.timeout_secs).is_err() {
            return Err(config_err(format!(
                "timeout_secs is too large, got {}",
                self.timeout_secs
            )));
        }
        for (name, value) in [
            ("timeout_slack_secs", self.tolerances.timeout_slack_secs),
            ("result_accuracy", self.tolerances.result_accuracy),
        ] {
            if value.is_nan() || value < 0.0 {
                return Err(config_err(format!("tolerances.{} must be >= 0", name)));
            }
        }

        if self.equivalence.variants.is_empty() {
            return Err(config_err("equivalence.variants must not be empty"));
        }
        let mut seen = BTreeSet::new();
        for variant in &self.equivalence.variants {
            if variant.name.is_empty() || variant.name == crate::benchmark::ORIGIN_VARIANT {
                return Err(config_err(format!(
                    "invalid variant name '{}'",
                    variant.name
                )));
            }
            if !seen.insert(variant.name.as_str()) {
                return Err(config_err(format!("duplicate variant '{}'", variant.name)));
            }
        }

        for family in [Family::Equivalence, Family::Simulation] {
            let tools = self.tools(family);
            if tools.is_empty() {
                return Err(config_err(format!("{} has no tools configured", family)));
            }
            let mut names = BTreeSet::new();
            for tool in tools {
                let name = tool.tool_name();
                if !tool.supports(family) {
                    return Err(config_err(format!(
                        "tool {} cannot run {} experiments",
                        name, family
                    )));
                }
                if !names.insert(name.clone()) {
                    return Err(config_err(format!(
                        "duplicate tool {} in {}",
                        name, family
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn budget(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_secs).unwrap_or(Duration::MAX)
    }

    pub fn tools(&self, family: Family) -> &[ToolSpec] {
        match family {
            Family::Equivalence => &self.equivalence.tools,
            Family::Simulation => &self.simulation.tools,
        }
    }

    pub fn tool_names(&self, family: Family) -> Vec<String> {
        self.tools(family).iter().map(ToolSpec::tool_name).collect()
    }

    pub fn variants(&self, family: Family) -> &[VariantSpec] {
        match family {
            Family::Equivalence => &self.equivalence.variants,
            Family::Simulation => &[],
        }
    }

    pub fn results_path(&self, family: Family) -> PathBuf {
        let file = match family {
            Family::Equivalence => &self.equivalence.results_file,
            Family::Simulation => &self.simulation.results_file,
        };
        self.results_dir.join(file)
    }

    pub fn benchmark_list(&self, family: Family) -> &Path {
        match family {
            Family::Equivalence => &self.equivalence.benchmark_list,
            Family::Simulation => &self.simulation.benchmark_list,
        }
    }
}

fn config_err(msg: impl Into<String>) -> anyhow::Error {
    MatrixError::Config(msg.into()).into()
}
