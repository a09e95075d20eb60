use anyhow::Result;
use qbench_core::{Family, MatrixError, Outcome};
use std::path::{Path, PathBuf};
use std::process::Command;

use super::{CommandBackend, Experiment};
use crate::scratch::ScratchDir;

const SLIQEC_TOOL: &str = "SliQEC";
const SLIQSIM_TOOL: &str = "SliQSim";
const SLIQEC_MARKER: &str = "Is equivalent?";

#[derive(Debug, Clone)]
pub struct SliqecBackend {
    program: PathBuf,
}

impl SliqecBackend {
    pub fn new(program: &Path) -> Self {
        Self {
            program: program.to_path_buf(),
        }
    }
}

impl CommandBackend for SliqecBackend {
    fn tool(&self) -> &str {
        SLIQEC_TOOL
    }

    fn family(&self) -> Family {
        Family::Equivalence
    }

    fn command(&self, experiment: &Experiment) -> Result<Command> {
        let modified = experiment.modified_circuit(SLIQEC_TOOL)?;
        let mut cmd = Command::new(&self.program);
        cmd.arg("--circuit1")
            .arg(&experiment.origin)
            .arg("--circuit2")
            .arg(modified);
        Ok(cmd)
    }

    fn parse_output(&self, stdout: &str) -> Result<Outcome, MatrixError> {
        parse_sliqec_verdict(stdout)
    }
}

pub fn parse_sliqec_verdict(stdout: &str) -> Result<Outcome, MatrixError> {
    let start = stdout.find(SLIQEC_MARKER).ok_or_else(|| {
        MatrixError::malformed(SLIQEC_TOOL, "missing 'Is equivalent?' line", stdout)
    })?;
    let answer = stdout[start + SLIQEC_MARKER.len()..]
        .split_whitespace()
        .next()
        .unwrap_or("");
    match answer {
        "Yes" => Ok(Outcome::Boolean(true)),
        "No" => Ok(Outcome::Boolean(false)),
        other => Err(MatrixError::malformed(
            SLIQEC_TOOL,
            format!("expected Yes or No after 'Is equivalent?', found '{}'", other),
            stdout,
        )),
    }
}

/// SliQSim asked for the amplitude of |0...0>; the outcome is its square.
#[derive(Debug, Clone)]
pub struct SliqsimBackend {
    program: PathBuf,
    scratch: ScratchDir,
}

impl SliqsimBackend {
    pub fn new(program: &Path, scratch: ScratchDir) -> Self {
        Self {
            program: program.to_path_buf(),
            scratch,
        }
    }

    /// Observable file for `qubits`, shared by every circuit of that width.
    pub fn observable_file(&self, qubits: u32) -> Result<PathBuf> {
        self.scratch
            .file_once(&format!("SliQSim_{}_obs.obs", qubits), || {
                format!("amp {};\n", "0".repeat(qubits as usize))
            })
    }
}

impl CommandBackend for SliqsimBackend {
    fn tool(&self) -> &str {
        SLIQSIM_TOOL
    }

    fn family(&self) -> Family {
        Family::Simulation
    }

    fn command(&self, experiment: &Experiment) -> Result<Command> {
        let obs = self.observable_file(experiment.key.qubits)?;
        let mut cmd = Command::new(&self.program);
        cmd.arg("--sim_qasm")
            .arg(&experiment.origin)
            .arg("--obs_file")
            .arg(obs)
            .arg("--type")
            .arg("2");
        Ok(cmd)
    }

    fn parse_output(&self, stdout: &str) -> Result<Outcome, MatrixError> {
        parse_sliqsim_amplitude(stdout)
    }
}

pub fn parse_sliqsim_amplitude(stdout: &str) -> Result<Outcome, MatrixError> {
    stdout
        .split_whitespace()
        .filter(|token| {
            token
                .chars()
                .all(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E'))
        })
        .find_map(|token| token.parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .map(|amplitude| Outcome::Numeric(amplitude * amplitude))
        .ok_or_else(|| MatrixError::malformed(SLIQSIM_TOOL, "no numeric amplitude in output", stdout))
}
