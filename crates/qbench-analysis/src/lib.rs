//! Cross-tool consistency checks and report rendering over a [`ResultStore`].
//!
//! Everything here only reads the store. A failed check is the primary signal
//! that a circuit modification, a backend, or a tolerance setting is wrong, so
//! the error carries every offending row rather than the first one.

use qbench_core::{Expectation, Family, Outcome, ResultRow, ResultStore, VariantSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::info;

mod report;

pub use report::{render_pivot, report_path, write_reports};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tolerances {
    /// Allowed distance between a timeout row's elapsed time and the budget.
    pub timeout_slack_secs: f64,
    /// Allowed spread between the largest and smallest simulation result.
    pub result_accuracy: f64,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            timeout_slack_secs: 0.0,
            result_accuracy: 1e-6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub family: String,
    pub rows_checked: usize,
    pub groups_checked: usize,
    pub timeouts: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Violation {
    UnknownVariant {
        variant: String,
        rows: Vec<ResultRow>,
    },
    WrongClass {
        variant: String,
        expected: Expectation,
        rows: Vec<ResultRow>,
    },
    IncompleteGroup {
        algo: String,
        qubits: u32,
        expected: Vec<String>,
        found: Vec<String>,
    },
    TimeoutDrift {
        algo: String,
        qubits: u32,
        tool: String,
        elapsed_secs: f64,
        budget_secs: f64,
    },
    NonNumeric {
        algo: String,
        qubits: u32,
        tool: String,
        outcome: Outcome,
    },
    Disagreement {
        algo: String,
        qubits: u32,
        spread: f64,
        values: Vec<(String, f64)>,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::UnknownVariant { variant, rows } => {
                writeln!(f, "variant '{}' is not configured ({} rows)", variant, rows.len())?;
                write_rows(f, rows)
            }
            Violation::WrongClass {
                variant,
                expected,
                rows,
            } => {
                let allowed = match expected {
                    Expectation::Equivalent => "{TIMEOUT, True}",
                    Expectation::NonEquivalent => "{TIMEOUT, False}",
                };
                writeln!(
                    f,
                    "variant '{}' results are not valid: expected outcome in {}",
                    variant, allowed
                )?;
                write_rows(f, rows)
            }
            Violation::IncompleteGroup {
                algo,
                qubits,
                expected,
                found,
            } => write!(
                f,
                "expected one result per tool for ({}, {}): expected [{}], found [{}]",
                algo,
                qubits,
                expected.join(", "),
                found.join(", ")
            ),
            Violation::TimeoutDrift {
                algo,
                qubits,
                tool,
                elapsed_secs,
                budget_secs,
            } => write!(
                f,
                "timeout result for ({}, {}) from {} is not close to the budget: {} vs {}",
                algo, qubits, tool, elapsed_secs, budget_secs
            ),
            Violation::NonNumeric {
                algo,
                qubits,
                tool,
                outcome,
            } => write!(
                f,
                "simulation result for ({}, {}) from {} is not numeric: {}",
                algo, qubits, tool, outcome
            ),
            Violation::Disagreement {
                algo,
                qubits,
                spread,
                values,
            } => {
                let listed: Vec<String> = values
                    .iter()
                    .map(|(tool, value)| format!("{}={}", tool, value))
                    .collect();
                write!(
                    f,
                    "non-timeout results for ({}, {}) are not similar (spread {}): {}",
                    algo,
                    qubits,
                    spread,
                    listed.join(", ")
                )
            }
        }
    }
}

fn write_rows(f: &mut fmt::Formatter<'_>, rows: &[ResultRow]) -> fmt::Result {
    for row in rows {
        writeln!(
            f,
            "  {} result={} time={}",
            row.key, row.outcome, row.elapsed_secs
        )?;
    }
    Ok(())
}

#[derive(Debug, Error)]
#[error("consistency check failed for {family} results ({} violations):\n{}", .violations.len(), render_violations(.violations))]
pub struct ConsistencyError {
    pub family: String,
    pub violations: Vec<Violation>,
}

fn render_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| format!("- {}", v))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Every row of an equivalence-preserving variant must be `TIMEOUT` or `True`,
/// every row of an equivalence-breaking variant `TIMEOUT` or `False`.
pub fn validate_equivalence(
    store: &ResultStore,
    variants: &[VariantSpec],
) -> Result<ValidationReport, ConsistencyError> {
    let mut by_variant: BTreeMap<&str, Vec<&ResultRow>> = BTreeMap::new();
    for row in store.rows() {
        let variant = row.key.variant.as_deref().unwrap_or("");
        by_variant.entry(variant).or_default().push(row);
    }

    let mut violations = Vec::new();
    for (variant, rows) in &by_variant {
        let Some(spec) = variants.iter().find(|v| v.name == *variant) else {
            violations.push(Violation::UnknownVariant {
                variant: variant.to_string(),
                rows: rows.iter().map(|r| (*r).clone()).collect(),
            });
            continue;
        };
        let offending: Vec<ResultRow> = rows
            .iter()
            .filter(|row| !spec.expect.admits(&row.outcome))
            .map(|row| (*row).clone())
            .collect();
        if !offending.is_empty() {
            violations.push(Violation::WrongClass {
                variant: spec.name.clone(),
                expected: spec.expect,
                rows: offending,
            });
        }
    }

    if !violations.is_empty() {
        return Err(ConsistencyError {
            family: Family::Equivalence.to_string(),
            violations,
        });
    }
    let report = ValidationReport {
        family: Family::Equivalence.to_string(),
        rows_checked: store.len(),
        groups_checked: by_variant.len(),
        timeouts: count_timeouts(store),
    };
    info!(rows = report.rows_checked, variants = report.groups_checked, "equivalence results validated");
    Ok(report)
}

/// Groups rows by `(algo, qubits)` and requires, per group, one row per
/// configured tool, timeouts recorded at the budget, and numeric results
/// within `result_accuracy` of each other.
pub fn validate_simulation(
    store: &ResultStore,
    tools: &[String],
    budget_secs: f64,
    tolerances: &Tolerances,
) -> Result<ValidationReport, ConsistencyError> {
    let mut groups: BTreeMap<(&str, u32), Vec<&ResultRow>> = BTreeMap::new();
    for row in store.rows() {
        groups
            .entry((row.key.algo.as_str(), row.key.qubits))
            .or_default()
            .push(row);
    }

    let mut expected_tools: Vec<String> = tools.to_vec();
    expected_tools.sort();

    let mut violations = Vec::new();
    for ((algo, qubits), rows) in &groups {
        let mut found: Vec<String> = rows.iter().map(|r| r.key.tool.clone()).collect();
        found.sort();
        if found != expected_tools {
            violations.push(Violation::IncompleteGroup {
                algo: algo.to_string(),
                qubits: *qubits,
                expected: expected_tools.clone(),
                found,
            });
        }

        let mut values = Vec::new();
        for row in rows {
            match row.outcome {
                Outcome::Timeout => {
                    if (row.elapsed_secs - budget_secs).abs() > tolerances.timeout_slack_secs {
                        violations.push(Violation::TimeoutDrift {
                            algo: algo.to_string(),
                            qubits: *qubits,
                            tool: row.key.tool.clone(),
                            elapsed_secs: row.elapsed_secs,
                            budget_secs,
                        });
                    }
                }
                Outcome::Numeric(value) => values.push((row.key.tool.clone(), value)),
                Outcome::Boolean(_) => violations.push(Violation::NonNumeric {
                    algo: algo.to_string(),
                    qubits: *qubits,
                    tool: row.key.tool.clone(),
                    outcome: row.outcome,
                }),
            }
        }

        if let Some(spread) = spread(&values) {
            if spread > tolerances.result_accuracy {
                violations.push(Violation::Disagreement {
                    algo: algo.to_string(),
                    qubits: *qubits,
                    spread,
                    values,
                });
            }
        }
    }

    if !violations.is_empty() {
        return Err(ConsistencyError {
            family: Family::Simulation.to_string(),
            violations,
        });
    }
    let report = ValidationReport {
        family: Family::Simulation.to_string(),
        rows_checked: store.len(),
        groups_checked: groups.len(),
        timeouts: count_timeouts(store),
    };
    info!(rows = report.rows_checked, groups = report.groups_checked, "simulation results validated");
    Ok(report)
}

fn spread(values: &[(String, f64)]) -> Option<f64> {
    let mut iter = values.iter().map(|(_, v)| *v);
    let first = iter.next()?;
    let (min, max) = iter.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v)));
    Some(max - min)
}

fn count_timeouts(store: &ResultStore) -> usize {
    store.rows().iter().filter(|r| r.outcome.is_timeout()).count()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreSummary {
    pub family: String,
    pub rows: usize,
    pub timeouts: usize,
    pub per_tool: BTreeMap<String, usize>,
}

pub fn summarize(store: &ResultStore) -> StoreSummary {
    let mut per_tool = BTreeMap::new();
    for row in store.rows() {
        *per_tool.entry(row.key.tool.clone()).or_insert(0) += 1;
    }
    StoreSummary {
        family: store.family().to_string(),
        rows: store.len(),
        timeouts: count_timeouts(store),
        per_tool,
    }
}
