use anyhow::Result;
use qbench_core::{Family, MatrixError, Outcome};
use std::path::{Path, PathBuf};
use std::process::Command;

use super::{last_line, CommandBackend, Experiment};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuokkaMode {
    Equivalence { check: String, threads: u32 },
    Simulation { measurement: String },
}

#[derive(Debug, Clone)]
pub struct QuokkaBackend {
    program: PathBuf,
    basis: String,
    mode: QuokkaMode,
    tool: String,
}

impl QuokkaBackend {
    pub fn new(program: &Path, basis: &str, mode: QuokkaMode) -> Self {
        Self {
            program: program.to_path_buf(),
            basis: basis.to_string(),
            mode,
            tool: format!("quokka-sharp-{}", basis),
        }
    }
}

impl CommandBackend for QuokkaBackend {
    fn tool(&self) -> &str {
        &self.tool
    }

    fn family(&self) -> Family {
        match self.mode {
            QuokkaMode::Equivalence { .. } => Family::Equivalence,
            QuokkaMode::Simulation { .. } => Family::Simulation,
        }
    }

    fn command(&self, experiment: &Experiment) -> Result<Command> {
        let mut cmd = Command::new(&self.program);
        match &self.mode {
            QuokkaMode::Equivalence { check, threads } => {
                let modified = experiment.modified_circuit(&self.tool)?;
                cmd.arg("eq")
                    .arg(&experiment.origin)
                    .arg(modified)
                    .arg("--basis")
                    .arg(&self.basis)
                    .arg("--check")
                    .arg(check)
                    .arg("--threads")
                    .arg(threads.to_string());
            }
            QuokkaMode::Simulation { measurement } => {
                cmd.arg("sim")
                    .arg(&experiment.origin)
                    .arg("--basis")
                    .arg(&self.basis)
                    .arg("--measurement")
                    .arg(measurement);
            }
        }
        Ok(cmd)
    }

    fn parse_output(&self, stdout: &str) -> Result<Outcome, MatrixError> {
        match self.mode {
            QuokkaMode::Equivalence { .. } => parse_quokka_verdict(&self.tool, stdout),
            QuokkaMode::Simulation { .. } => parse_quokka_probability(&self.tool, stdout),
        }
    }
}

/// The wrapper prints the verdict on its last line.
pub fn parse_quokka_verdict(tool: &str, stdout: &str) -> Result<Outcome, MatrixError> {
    match last_line(stdout) {
        Some("True") | Some("true") => Ok(Outcome::Boolean(true)),
        Some("False") | Some("false") => Ok(Outcome::Boolean(false)),
        _ => Err(MatrixError::malformed(
            tool,
            "expected True or False on the last line",
            stdout,
        )),
    }
}

/// The wrapper prints the measured probability on its last line.
pub fn parse_quokka_probability(tool: &str, stdout: &str) -> Result<Outcome, MatrixError> {
    last_line(stdout)
        .and_then(|line| line.parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .map(Outcome::Numeric)
        .ok_or_else(|| MatrixError::malformed(tool, "expected a probability on the last line", stdout))
}
