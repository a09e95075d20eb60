use anyhow::Result;
use qbench_core::{Family, MatrixError, Outcome};
use std::path::{Path, PathBuf};
use std::process::Command;

use super::{last_line, CommandBackend, Experiment};

const QCEC_TOOL: &str = "QCEC";

#[derive(Debug, Clone)]
pub struct QcecBackend {
    program: PathBuf,
}

impl QcecBackend {
    pub fn new(program: &Path) -> Self {
        Self {
            program: program.to_path_buf(),
        }
    }
}

impl CommandBackend for QcecBackend {
    fn tool(&self) -> &str {
        QCEC_TOOL
    }

    fn family(&self) -> Family {
        Family::Equivalence
    }

    fn command(&self, experiment: &Experiment) -> Result<Command> {
        let modified = experiment.modified_circuit(QCEC_TOOL)?;
        let mut cmd = Command::new(&self.program);
        cmd.arg(&experiment.origin).arg(modified);
        Ok(cmd)
    }

    fn parse_output(&self, stdout: &str) -> Result<Outcome, MatrixError> {
        parse_qcec_criterion(stdout)
    }
}

/// Maps the criterion on the last line, with or without the
/// `EquivalenceCriterion.` prefix. Inconclusive criteria are rejected.
pub fn parse_qcec_criterion(stdout: &str) -> Result<Outcome, MatrixError> {
    let line = last_line(stdout).unwrap_or("");
    let criterion = line.strip_prefix("EquivalenceCriterion.").unwrap_or(line);
    match criterion {
        "equivalent" | "equivalent_up_to_global_phase" | "equivalent_up_to_phase" => {
            Ok(Outcome::Boolean(true))
        }
        "not_equivalent" | "probably_not_equivalent" => Ok(Outcome::Boolean(false)),
        "no_information" | "probably_equivalent" => Err(MatrixError::malformed(
            QCEC_TOOL,
            format!("inconclusive criterion '{}'", criterion),
            stdout,
        )),
        _ => Err(MatrixError::malformed(
            QCEC_TOOL,
            "expected an equivalence criterion on the last line",
            stdout,
        )),
    }
}
