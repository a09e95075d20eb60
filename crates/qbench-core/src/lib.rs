use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;

mod error;
mod store;

pub use error::MatrixError;
pub use store::{field_problem, ResultStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Family {
    Equivalence,
    Simulation,
}

impl Family {
    pub fn as_str(&self) -> &'static str {
        match self {
            Family::Equivalence => "eqcheck",
            Family::Simulation => "simulation",
        }
    }

    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            Family::Equivalence => &["modification", "qubits", "algo", "tool", "result", "time"],
            Family::Simulation => &["qubits", "algo", "tool", "result", "time"],
        }
    }

    pub fn default_sort(&self) -> &'static [SortField] {
        match self {
            Family::Equivalence => &[
                SortField::Variant,
                SortField::Algo,
                SortField::Qubits,
                SortField::Tool,
            ],
            Family::Simulation => &[SortField::Algo, SortField::Qubits, SortField::Tool],
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ground-truth class a variant is expected to land in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expectation {
    Equivalent,
    NonEquivalent,
}

impl Expectation {
    pub fn admits(&self, outcome: &Outcome) -> bool {
        match (self, outcome) {
            (_, Outcome::Timeout) => true,
            (Expectation::Equivalent, Outcome::Boolean(v)) => *v,
            (Expectation::NonEquivalent, Outcome::Boolean(v)) => !*v,
            (_, Outcome::Numeric(_)) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantSpec {
    pub name: String,
    pub expect: Expectation,
}

impl VariantSpec {
    pub fn new(name: &str, expect: Expectation) -> Self {
        Self {
            name: name.to_string(),
            expect,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExperimentKey {
    /// Set for equivalence experiments only.
    pub variant: Option<String>,
    pub algo: String,
    pub qubits: u32,
    pub tool: String,
}

impl ExperimentKey {
    pub fn equivalence(variant: &str, algo: &str, qubits: u32, tool: &str) -> Self {
        Self {
            variant: Some(variant.to_string()),
            algo: algo.to_string(),
            qubits,
            tool: tool.to_string(),
        }
    }

    pub fn simulation(algo: &str, qubits: u32, tool: &str) -> Self {
        Self {
            variant: None,
            algo: algo.to_string(),
            qubits,
            tool: tool.to_string(),
        }
    }

    pub fn family(&self) -> Family {
        if self.variant.is_some() {
            Family::Equivalence
        } else {
            Family::Simulation
        }
    }
}

impl fmt::Display for ExperimentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.variant {
            Some(variant) => write!(
                f,
                "(variant={}, algo={}, qubits={}, tool={})",
                variant, self.algo, self.qubits, self.tool
            ),
            None => write!(
                f,
                "(algo={}, qubits={}, tool={})",
                self.algo, self.qubits, self.tool
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome {
    Timeout,
    Boolean(bool),
    Numeric(f64),
}

impl Outcome {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Outcome::Timeout)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Outcome::Numeric(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Timeout => f.write_str("TIMEOUT"),
            Outcome::Boolean(true) => f.write_str("True"),
            Outcome::Boolean(false) => f.write_str("False"),
            Outcome::Numeric(v) => write!(f, "{}", v),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub key: ExperimentKey,
    pub outcome: Outcome,
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Variant,
    Algo,
    Qubits,
    Tool,
}

pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)?;
    Ok(())
}

/// Writes `bytes` to a sibling temp file, syncs it and renames it over `path`,
/// so readers never observe a half-written file.
pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            ensure_dir(parent)?;
        }
    }
    let ts = Utc::now().timestamp_micros();
    let pid = std::process::id();
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("tmpfile");
    let tmp = path.with_file_name(format!(".{}.tmp.{}.{}", name, pid, ts));
    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    if let Some(parent) = path.parent() {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expectation_admits_timeouts_and_matching_verdicts() {
        assert!(Expectation::Equivalent.admits(&Outcome::Timeout));
        assert!(Expectation::Equivalent.admits(&Outcome::Boolean(true)));
        assert!(!Expectation::Equivalent.admits(&Outcome::Boolean(false)));
        assert!(Expectation::NonEquivalent.admits(&Outcome::Boolean(false)));
        assert!(!Expectation::NonEquivalent.admits(&Outcome::Boolean(true)));
        assert!(!Expectation::NonEquivalent.admits(&Outcome::Numeric(0.0)));
    }

    #[test]
    fn key_family_follows_variant_presence() {
        let eq = ExperimentKey::equivalence("opt", "qft", 4, "QCEC");
        let sim = ExperimentKey::simulation("qft", 4, "SliQSim");
        assert_eq!(eq.family(), Family::Equivalence);
        assert_eq!(sim.family(), Family::Simulation);
        assert_eq!(
            eq.to_string(),
            "(variant=opt, algo=qft, qubits=4, tool=QCEC)"
        );
    }

    #[test]
    fn outcome_tokens_match_persisted_layout() {
        assert_eq!(Outcome::Timeout.to_string(), "TIMEOUT");
        assert_eq!(Outcome::Boolean(true).to_string(), "True");
        assert_eq!(Outcome::Boolean(false).to_string(), "False");
        assert_eq!(Outcome::Numeric(0.25).to_string(), "0.25");
    }

    #[test]
    fn atomic_write_replaces_file_contents() {
        let dir = std::env::temp_dir().join(format!(
            "qbench_atomic_test_{}_{}",
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        let path = dir.join("nested").join("out.txt");
        atomic_write_bytes(&path, b"first").expect("first write");
        atomic_write_bytes(&path, b"second").expect("second write");
        assert_eq!(fs::read(&path).expect("read back"), b"second");
        let leftovers = fs::read_dir(path.parent().expect("parent"))
            .expect("list")
            .count();
        assert_eq!(leftovers, 1, "temp files must be renamed away");
        let _ = fs::remove_dir_all(dir);
    }
}
