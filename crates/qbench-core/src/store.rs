use anyhow::Result;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::{atomic_write_bytes, ExperimentKey, Family, MatrixError, Outcome, ResultRow, SortField};

/// Durable, append-only table of computed matrix cells.
///
/// The table is persisted as a flat CSV file whose columns depend on the
/// [`Family`]. `exists` is answered from an in-memory key index that is rebuilt
/// on every load.
#[derive(Debug)]
pub struct ResultStore {
    path: PathBuf,
    family: Family,
    rows: Vec<ResultRow>,
    index: HashSet<ExperimentKey>,
}

impl ResultStore {
    pub fn open(path: &Path, family: Family) -> Result<Self> {
        let mut store = Self {
            path: path.to_path_buf(),
            family,
            rows: Vec::new(),
            index: HashSet::new(),
        };
        store.reload()?;
        Ok(store)
    }

    pub fn empty(path: &Path, family: Family) -> Self {
        Self {
            path: path.to_path_buf(),
            family,
            rows: Vec::new(),
            index: HashSet::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn family(&self) -> Family {
        self.family
    }

    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn exists(&self, key: &ExperimentKey) -> bool {
        self.index.contains(key)
    }

    pub fn get(&self, key: &ExperimentKey) -> Option<&ResultRow> {
        if !self.exists(key) {
            return None;
        }
        self.rows.iter().find(|row| &row.key == key)
    }

    /// Adds one row. The caller is expected to have checked [`Self::exists`];
    /// an existing key is an invariant violation and is rejected.
    pub fn append(&mut self, key: ExperimentKey, outcome: Outcome, elapsed_secs: f64) -> Result<()> {
        if key.family() != self.family {
            let detail = format!("does not fit a {} result store", self.family);
            return Err(MatrixError::KeyShape { key, detail }.into());
        }
        let bad_field = key
            .variant
            .iter()
            .chain([&key.algo, &key.tool])
            .find_map(|field| {
                field_problem(field)
                    .map(|problem| format!("field '{}' {}", field.escape_debug(), problem))
            });
        if let Some(detail) = bad_field {
            return Err(MatrixError::KeyShape { key, detail }.into());
        }
        if self.index.contains(&key) {
            return Err(MatrixError::DuplicateKey(key).into());
        }
        self.index.insert(key.clone());
        self.rows.push(ResultRow {
            key,
            outcome,
            elapsed_secs,
        });
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        let text = encode_rows(self.family, &self.rows);
        atomic_write_bytes(&self.path, text.as_bytes())?;
        debug!(path = %self.path.display(), rows = self.rows.len(), "flushed result store");
        Ok(())
    }

    pub fn reload(&mut self) -> Result<()> {
        let rows = if self.path.exists() {
            let text = fs::read_to_string(&self.path)?;
            decode_rows(&self.path, self.family, &text)?
        } else {
            Vec::new()
        };
        let mut index = HashSet::with_capacity(rows.len());
        for row in &rows {
            if !index.insert(row.key.clone()) {
                return Err(MatrixError::DuplicateKey(row.key.clone()).into());
            }
        }
        self.rows = rows;
        self.index = index;
        Ok(())
    }

    pub fn sort_by(&mut self, fields: &[SortField]) {
        self.rows.sort_by(|a, b| {
            fields
                .iter()
                .map(|field| compare_field(*field, &a.key, &b.key))
                .find(|ord| *ord != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
    }
}

fn compare_field(field: SortField, a: &ExperimentKey, b: &ExperimentKey) -> Ordering {
    match field {
        SortField::Variant => a.variant.cmp(&b.variant),
        SortField::Algo => a.algo.cmp(&b.algo),
        SortField::Qubits => a.qubits.cmp(&b.qubits),
        SortField::Tool => a.tool.cmp(&b.tool),
    }
}

fn encode_rows(family: Family, rows: &[ResultRow]) -> String {
    let mut out = family.columns().join(",");
    out.push('\n');
    for row in rows {
        let key = &row.key;
        let mut fields = Vec::with_capacity(6);
        if let Some(variant) = &key.variant {
            fields.push(variant.clone());
        }
        fields.push(key.qubits.to_string());
        fields.push(key.algo.clone());
        fields.push(key.tool.clone());
        fields.push(row.outcome.to_string());
        fields.push(row.elapsed_secs.to_string());
        out.push_str(&fields.join(","));
        out.push('\n');
    }
    out
}

fn decode_rows(path: &Path, family: Family, text: &str) -> Result<Vec<ResultRow>> {
    let format_err = |line: usize, detail: String| MatrixError::StoreFormat {
        path: path.to_path_buf(),
        line,
        detail,
    };
    let mut lines = text.lines().enumerate();
    let expected_header = family.columns().join(",");
    match lines.next() {
        Some((_, header)) if header.trim() == expected_header => {}
        Some((_, header)) => {
            return Err(format_err(
                1,
                format!("expected header '{}', found '{}'", expected_header, header.trim()),
            )
            .into())
        }
        None => return Ok(Vec::new()),
    }

    let mut rows = Vec::new();
    for (idx, line) in lines {
        let line_no = idx + 1;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() != family.columns().len() {
            return Err(format_err(
                line_no,
                format!(
                    "expected {} fields, found {}",
                    family.columns().len(),
                    fields.len()
                ),
            )
            .into());
        }
        let (variant, rest) = match family {
            Family::Equivalence => (Some(fields[0].to_string()), &fields[1..]),
            Family::Simulation => (None, &fields[..]),
        };
        let qubits = rest[0]
            .parse::<u32>()
            .map_err(|_| format_err(line_no, format!("invalid qubit count '{}'", rest[0])))?;
        let outcome = parse_outcome_token(rest[3])
            .ok_or_else(|| format_err(line_no, format!("invalid result token '{}'", rest[3])))?;
        let elapsed_secs = rest[4]
            .parse::<f64>()
            .map_err(|_| format_err(line_no, format!("invalid time '{}'", rest[4])))?;
        rows.push(ResultRow {
            key: ExperimentKey {
                variant,
                algo: rest[1].to_string(),
                qubits,
                tool: rest[2].to_string(),
            },
            outcome,
            elapsed_secs,
        });
    }
    Ok(rows)
}

/// Why `value` cannot be stored as a bare CSV field, if it cannot.
pub fn field_problem(value: &str) -> Option<&'static str> {
    if value.is_empty() {
        Some("is empty")
    } else if value.contains([',', '\r', '\n']) {
        Some("contains a comma or line break")
    } else if value.trim() != value {
        Some("has leading or trailing whitespace")
    } else {
        None
    }
}

pub(crate) fn parse_outcome_token(token: &str) -> Option<Outcome> {
    match token {
        "TIMEOUT" => Some(Outcome::Timeout),
        "True" => Some(Outcome::Boolean(true)),
        "False" => Some(Outcome::Boolean(false)),
        other => other
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(Outcome::Numeric),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn temp_store_path(label: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!(
                "qbench_store_test_{}_{}_{}",
                label,
                std::process::id(),
                Utc::now().timestamp_micros()
            ))
            .join("results.csv")
    }

    fn cleanup(path: &Path) {
        if let Some(dir) = path.parent() {
            let _ = fs::remove_dir_all(dir);
        }
    }

    #[test]
    fn open_missing_file_yields_empty_store() {
        let path = temp_store_path("missing");
        let store = ResultStore::open(&path, Family::Simulation).expect("open");
        assert!(store.is_empty());
        assert!(!path.exists(), "opening must not create the file");
    }

    #[test]
    fn append_flush_reload_preserves_every_token() {
        let path = temp_store_path("roundtrip");
        let mut store = ResultStore::open(&path, Family::Equivalence).expect("open");
        store
            .append(ExperimentKey::equivalence("opt", "qft", 5, "QCEC"), Outcome::Boolean(true), 0.125)
            .expect("append true");
        store
            .append(ExperimentKey::equivalence("gm", "qft", 5, "QCEC"), Outcome::Boolean(false), 1.5)
            .expect("append false");
        store
            .append(ExperimentKey::equivalence("gm", "qft", 5, "SliQEC"), Outcome::Timeout, 300.0)
            .expect("append timeout");
        store.flush().expect("flush");

        let reopened = ResultStore::open(&path, Family::Equivalence).expect("reopen");
        assert_eq!(reopened.rows(), store.rows());
        assert!(reopened.exists(&ExperimentKey::equivalence("gm", "qft", 5, "SliQEC")));

        let text = fs::read_to_string(&path).expect("read csv");
        assert!(text.starts_with("modification,qubits,algo,tool,result,time\n"));
        assert!(text.contains("gm,5,qft,SliQEC,TIMEOUT,300\n"));
        cleanup(&path);
    }

    #[test]
    fn numeric_outcomes_reload_losslessly() {
        let path = temp_store_path("numeric");
        let mut store = ResultStore::open(&path, Family::Simulation).expect("open");
        let value = 0.499_999_950_000_000_1_f64;
        store
            .append(ExperimentKey::simulation("ghz", 3, "SliQSim"), Outcome::Numeric(value), 0.01)
            .expect("append");
        store.flush().expect("flush");
        let reopened = ResultStore::open(&path, Family::Simulation).expect("reopen");
        assert_eq!(reopened.rows()[0].outcome, Outcome::Numeric(value));
        cleanup(&path);
    }

    #[test]
    fn duplicate_append_is_rejected() {
        let path = temp_store_path("dup");
        let mut store = ResultStore::empty(&path, Family::Simulation);
        let key = ExperimentKey::simulation("ghz", 3, "SliQSim");
        store.append(key.clone(), Outcome::Numeric(0.5), 0.1).expect("first");
        let err = store
            .append(key, Outcome::Numeric(0.5), 0.1)
            .expect_err("second append must fail");
        assert!(matches!(
            err.downcast_ref::<MatrixError>(),
            Some(MatrixError::DuplicateKey(_))
        ));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn key_of_other_family_is_rejected() {
        let path = temp_store_path("shape");
        let mut store = ResultStore::empty(&path, Family::Simulation);
        let err = store
            .append(ExperimentKey::equivalence("opt", "qft", 2, "QCEC"), Outcome::Boolean(true), 0.1)
            .expect_err("variant key in simulation store");
        assert!(matches!(
            err.downcast_ref::<MatrixError>(),
            Some(MatrixError::KeyShape { .. })
        ));
    }

    #[test]
    fn fields_that_would_break_the_csv_are_rejected() {
        let path = temp_store_path("fields");
        let mut store = ResultStore::open(&path, Family::Simulation).expect("open");
        for key in [
            ExperimentKey::simulation("adder,v2", 3, "SliQSim"),
            ExperimentKey::simulation("adder", 3, "Sli\nQSim"),
            ExperimentKey::simulation(" adder", 3, "SliQSim"),
            ExperimentKey::simulation("", 3, "SliQSim"),
        ] {
            let err = store
                .append(key.clone(), Outcome::Numeric(0.5), 0.1)
                .expect_err("unstorable field");
            assert!(
                matches!(err.downcast_ref::<MatrixError>(), Some(MatrixError::KeyShape { .. })),
                "{}",
                key
            );
        }
        assert!(store.is_empty());

        store
            .append(ExperimentKey::simulation("adder_v2", 3, "SliQSim"), Outcome::Numeric(0.5), 0.1)
            .expect("plain fields");
        store.flush().expect("flush");
        let reopened = ResultStore::open(&path, Family::Simulation).expect("reopen");
        assert_eq!(reopened.rows(), store.rows());
        if let Some(dir) = path.parent() {
            let _ = fs::remove_dir_all(dir);
        }
    }

    #[test]
    fn reload_sees_rows_written_by_another_handle() {
        let path = temp_store_path("reload");
        let mut first = ResultStore::open(&path, Family::Simulation).expect("open first");
        let mut second = ResultStore::open(&path, Family::Simulation).expect("open second");
        first
            .append(ExperimentKey::simulation("qft", 4, "SliQSim"), Outcome::Numeric(1.0), 0.2)
            .expect("append");
        first.flush().expect("flush");
        assert!(second.is_empty());
        second.reload().expect("reload");
        assert!(second.exists(&ExperimentKey::simulation("qft", 4, "SliQSim")));
        cleanup(&path);
    }

    #[test]
    fn sort_orders_qubits_numerically_and_is_stable() {
        let path = temp_store_path("sort");
        let mut store = ResultStore::empty(&path, Family::Simulation);
        for (algo, qubits, tool) in [
            ("qft", 10, "b"),
            ("ghz", 2, "b"),
            ("qft", 9, "a"),
            ("ghz", 2, "a"),
        ] {
            store
                .append(ExperimentKey::simulation(algo, qubits, tool), Outcome::Timeout, 1.0)
                .expect("append");
        }
        store.sort_by(Family::Simulation.default_sort());
        let order: Vec<(String, u32, String)> = store
            .rows()
            .iter()
            .map(|r| (r.key.algo.clone(), r.key.qubits, r.key.tool.clone()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("ghz".to_string(), 2, "a".to_string()),
                ("ghz".to_string(), 2, "b".to_string()),
                ("qft".to_string(), 9, "a".to_string()),
                ("qft".to_string(), 10, "b".to_string()),
            ]
        );
    }

    #[test]
    fn wrong_header_is_a_format_error() {
        let path = temp_store_path("header");
        atomic_write_bytes(&path, b"qubits,algo,tool,result,time\n3,ghz,SliQSim,0.5,0.1\n")
            .expect("seed");
        let err = ResultStore::open(&path, Family::Equivalence).expect_err("header mismatch");
        assert!(matches!(
            err.downcast_ref::<MatrixError>(),
            Some(MatrixError::StoreFormat { line: 1, .. })
        ));
        cleanup(&path);
    }

    #[test]
    fn unknown_result_token_is_a_format_error() {
        let path = temp_store_path("token");
        atomic_write_bytes(&path, b"qubits,algo,tool,result,time\n3,ghz,SliQSim,maybe,0.1\n")
            .expect("seed");
        let err = ResultStore::open(&path, Family::Simulation).expect_err("bad token");
        assert!(err.to_string().contains("invalid result token 'maybe'"));
        cleanup(&path);
    }

    #[test]
    fn outcome_token_parser_rejects_non_finite_numbers() {
        assert_eq!(parse_outcome_token("1e-3"), Some(Outcome::Numeric(0.001)));
        assert_eq!(parse_outcome_token("NaN"), None);
        assert_eq!(parse_outcome_token("true"), None);
    }
}
