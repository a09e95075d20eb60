use anyhow::Result;
use qbench_core::{atomic_write_bytes, Expectation, Family, Outcome, ResultRow, ResultStore, VariantSpec};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Renders rows as a LaTeX `tabular` pivoted to `(algo, qubits)` x tool.
///
/// Cells show `TIMEOUT`, `wrong` when an equivalence verdict contradicts
/// `expectation`, or the run time with three decimals.
pub fn render_pivot(rows: &[&ResultRow], expectation: Option<Expectation>) -> String {
    let tools: BTreeSet<&str> = rows.iter().map(|r| r.key.tool.as_str()).collect();
    let mut cells: BTreeMap<&str, BTreeMap<u32, BTreeMap<&str, String>>> = BTreeMap::new();
    for row in rows {
        cells
            .entry(row.key.algo.as_str())
            .or_default()
            .entry(row.key.qubits)
            .or_default()
            .insert(row.key.tool.as_str(), cell_text(row, expectation));
    }

    let width = tools.len() + 2;
    let mut out = String::new();
    out.push_str(&format!("\\begin{{tabular}}{{ll{}}}\n", "l".repeat(tools.len())));
    out.push_str("\\toprule\n");
    out.push_str(&format!(
        " &  & \\multicolumn{{{}}}{{r}}{{Run Time (sec)}} \\\\\n",
        tools.len()
    ));
    let mut header = vec!["algo".to_string(), "qubits".to_string()];
    header.extend(tools.iter().map(|t| escape_latex(t)));
    out.push_str(&header.join(" & "));
    out.push_str(" \\\\\n\\midrule\n");

    let algo_count = cells.len();
    for (algo_idx, (algo, by_qubits)) in cells.iter().enumerate() {
        for (row_idx, (qubits, by_tool)) in by_qubits.iter().enumerate() {
            let lead = if row_idx == 0 {
                format!(
                    "\\multirow[t]{{{}}}{{*}}{{{}}}",
                    by_qubits.len(),
                    escape_latex(algo)
                )
            } else {
                String::new()
            };
            let mut line = vec![lead, qubits.to_string()];
            for tool in &tools {
                line.push(by_tool.get(tool).cloned().unwrap_or_default());
            }
            out.push_str(&line.join(" & "));
            out.push_str(" \\\\\n");
        }
        if algo_idx + 1 < algo_count {
            out.push_str(&format!("\\cline{{1-{}}}\n", width));
        }
    }
    out.push_str("\\bottomrule\n\\end{tabular}\n");
    out
}

fn cell_text(row: &ResultRow, expectation: Option<Expectation>) -> String {
    match (row.outcome, expectation) {
        (Outcome::Timeout, _) => "TIMEOUT".to_string(),
        (outcome, Some(expect)) if !expect.admits(&outcome) => "wrong".to_string(),
        _ => format!("{:.3}", row.elapsed_secs),
    }
}

fn escape_latex(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\textbackslash{}"),
            '&' | '%' | '$' | '#' | '_' | '{' | '}' => {
                out.push('\\');
                out.push(c);
            }
            '~' => out.push_str("\\textasciitilde{}"),
            '^' => out.push_str("\\textasciicircum{}"),
            _ => out.push(c),
        }
    }
    out
}

/// `results/compare_eqcheck.csv` + `opt` -> `results/compare_eqcheck_opt.tex`.
pub fn report_path(results_path: &Path, suffix: Option<&str>) -> PathBuf {
    let stem = results_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("results");
    let name = match suffix {
        Some(suffix) => format!("{}_{}.tex", stem, suffix),
        None => format!("{}.tex", stem),
    };
    results_path.with_file_name(name)
}

pub fn write_reports(store: &ResultStore, variants: &[VariantSpec]) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    match store.family() {
        Family::Equivalence => {
            for variant in variants {
                let rows: Vec<&ResultRow> = store
                    .rows()
                    .iter()
                    .filter(|r| r.key.variant.as_deref() == Some(variant.name.as_str()))
                    .collect();
                let path = report_path(store.path(), Some(&variant.name));
                atomic_write_bytes(&path, render_pivot(&rows, Some(variant.expect)).as_bytes())?;
                written.push(path);
            }
        }
        Family::Simulation => {
            let rows: Vec<&ResultRow> = store.rows().iter().collect();
            let path = report_path(store.path(), None);
            atomic_write_bytes(&path, render_pivot(&rows, None).as_bytes())?;
            written.push(path);
        }
    }
    debug!(reports = written.len(), "rendered reports");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use qbench_core::ExperimentKey;

    fn row(variant: &str, algo: &str, qubits: u32, tool: &str, outcome: Outcome, elapsed: f64) -> ResultRow {
        ResultRow {
            key: ExperimentKey::equivalence(variant, algo, qubits, tool),
            outcome,
            elapsed_secs: elapsed,
        }
    }

    #[test]
    fn pivot_marks_timeouts_and_wrong_verdicts() {
        let rows = [
            row("opt", "qft_indep", 4, "QCEC", Outcome::Boolean(true), 0.12345),
            row("opt", "qft_indep", 4, "SliQEC", Outcome::Timeout, 300.0),
            row("opt", "qft_indep", 5, "QCEC", Outcome::Boolean(false), 1.0),
            row("opt", "ghz", 3, "SliQEC", Outcome::Boolean(true), 2.0),
        ];
        let refs: Vec<&ResultRow> = rows.iter().collect();
        let table = render_pivot(&refs, Some(Expectation::Equivalent));

        assert!(table.starts_with("\\begin{tabular}{llll}\n"));
        assert!(table.contains("algo & qubits & QCEC & SliQEC \\\\"));
        assert!(table.contains("\\multirow[t]{1}{*}{ghz} & 3 &  & 2.000 \\\\"));
        assert!(table.contains("\\multirow[t]{2}{*}{qft\\_indep} & 4 & 0.123 & TIMEOUT \\\\"));
        assert!(table.contains(" & 5 & wrong &  \\\\"));
        assert!(table.contains("\\cline{1-4}"));
        assert!(table.ends_with("\\end{tabular}\n"));
    }

    #[test]
    fn report_path_derives_from_results_file() {
        let path = Path::new("results/compare_eqcheck.csv");
        assert_eq!(
            report_path(path, Some("gm")),
            PathBuf::from("results/compare_eqcheck_gm.tex")
        );
        assert_eq!(
            report_path(Path::new("results/compare_simulations.csv"), None),
            PathBuf::from("results/compare_simulations.tex")
        );
    }

    #[test]
    fn write_reports_emits_one_table_per_variant() {
        let dir = std::env::temp_dir().join(format!(
            "qbench_report_test_{}_{}",
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        let mut store = ResultStore::empty(&dir.join("compare_eqcheck.csv"), Family::Equivalence);
        store
            .append(ExperimentKey::equivalence("opt", "qft", 3, "QCEC"), Outcome::Boolean(true), 0.5)
            .expect("append");
        let variants = vec![
            VariantSpec::new("opt", Expectation::Equivalent),
            VariantSpec::new("gm", Expectation::NonEquivalent),
        ];
        let written = write_reports(&store, &variants).expect("write");
        assert_eq!(written.len(), 2);
        assert!(written.iter().all(|p| p.exists()));
        let opt = std::fs::read_to_string(&written[0]).expect("read opt");
        assert!(opt.contains("0.500"));
        let _ = std::fs::remove_dir_all(dir);
    }
}
