//! Backend adapters: one per external verification or simulation engine.
//!
//! Every engine runs as a subprocess, so the global budget is enforced with a
//! hard kill. Engines that are only available as libraries are expected to be
//! reached through a thin wrapper program that prints the result.

use anyhow::Result;
use qbench_core::{ExperimentKey, Family, MatrixError, Outcome};
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;
use tracing::warn;

use crate::config::{MatrixConfig, ToolSpec};
use crate::scratch::ScratchDir;

mod process;
mod qcec;
mod quokka;
mod sliq;

pub use process::{run_with_timeout, CompletedProcess, ProcessOutcome};
pub use qcec::{parse_qcec_criterion, QcecBackend};
pub use quokka::{parse_quokka_probability, parse_quokka_verdict, QuokkaBackend, QuokkaMode};
pub use sliq::{parse_sliqec_verdict, parse_sliqsim_amplitude, SliqecBackend, SliqsimBackend};

#[derive(Debug, Clone)]
pub struct Experiment {
    pub key: ExperimentKey,
    /// The unmodified circuit (simulation target for the simulation family).
    pub origin: PathBuf,
    /// The modified circuit; equivalence experiments only.
    pub modified: Option<PathBuf>,
}

impl Experiment {
    pub fn modified_circuit(&self, tool: &str) -> Result<&PathBuf> {
        self.modified.as_ref().ok_or_else(|| {
            MatrixError::Config(format!(
                "{} needs a modified circuit for {}",
                tool, self.key
            ))
            .into()
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Invocation {
    pub outcome: Outcome,
    /// Wall-clock time; equal to the budget when `outcome` is a timeout.
    pub elapsed_secs: f64,
}

pub trait Backend {
    fn tool(&self) -> &str;

    fn family(&self) -> Family;

    fn invoke(&self, experiment: &Experiment, budget: Duration) -> Result<Invocation>;
}

/// A backend driven through a command line whose stdout carries the result.
pub trait CommandBackend {
    fn tool(&self) -> &str;

    fn family(&self) -> Family;

    fn command(&self, experiment: &Experiment) -> Result<Command>;

    /// Pure mapping from captured stdout to an outcome. Text that does not
    /// match the tool's result pattern is an error, never a default value.
    fn parse_output(&self, stdout: &str) -> Result<Outcome, MatrixError>;
}

impl<T: CommandBackend> Backend for T {
    fn tool(&self) -> &str {
        CommandBackend::tool(self)
    }

    fn family(&self) -> Family {
        CommandBackend::family(self)
    }

    fn invoke(&self, experiment: &Experiment, budget: Duration) -> Result<Invocation> {
        let command = self.command(experiment)?;
        match run_with_timeout(command, budget)? {
            ProcessOutcome::TimedOut { elapsed } => {
                warn!(
                    tool = CommandBackend::tool(self),
                    key = %experiment.key,
                    killed_after_secs = elapsed.as_secs_f64(),
                    "backend timed out"
                );
                Ok(Invocation {
                    outcome: Outcome::Timeout,
                    elapsed_secs: budget.as_secs_f64(),
                })
            }
            ProcessOutcome::Completed(done) => {
                if !done.status.success() {
                    return Err(MatrixError::BackendFailed {
                        tool: CommandBackend::tool(self).to_string(),
                        status: done
                            .status
                            .code()
                            .map(|c| c.to_string())
                            .unwrap_or_else(|| "signal".to_string()),
                        stderr: done.stderr,
                    }
                    .into());
                }
                let outcome = self.parse_output(&done.stdout)?;
                Ok(Invocation {
                    outcome,
                    elapsed_secs: done.elapsed.as_secs_f64(),
                })
            }
        }
    }
}

pub fn build_backends(
    config: &MatrixConfig,
    family: Family,
    scratch: &ScratchDir,
) -> Result<Vec<Box<dyn Backend>>> {
    let mut backends: Vec<Box<dyn Backend>> = Vec::new();
    for spec in config.tools(family) {
        let backend: Box<dyn Backend> = match spec {
            ToolSpec::QuokkaSharp {
                program,
                basis,
                check,
                threads,
                measurement,
            } => {
                let mode = match family {
                    Family::Equivalence => QuokkaMode::Equivalence {
                        check: check.clone(),
                        threads: *threads,
                    },
                    Family::Simulation => QuokkaMode::Simulation {
                        measurement: measurement.clone(),
                    },
                };
                Box::new(QuokkaBackend::new(program, basis, mode))
            }
            ToolSpec::Qcec { program } if family == Family::Equivalence => {
                Box::new(QcecBackend::new(program))
            }
            ToolSpec::Sliqec { program } if family == Family::Equivalence => {
                Box::new(SliqecBackend::new(program))
            }
            ToolSpec::Sliqsim { program } if family == Family::Simulation => {
                Box::new(SliqsimBackend::new(program, scratch.clone()))
            }
            other => {
                return Err(MatrixError::Config(format!(
                    "tool {} cannot run {} experiments",
                    other.tool_name(),
                    family
                ))
                .into())
            }
        };
        backends.push(backend);
    }
    Ok(backends)
}

pub(crate) fn last_line(stdout: &str) -> Option<&str> {
    stdout.lines().map(str::trim).rev().find(|l| !l.is_empty())
}
