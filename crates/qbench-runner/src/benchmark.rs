use anyhow::{anyhow, Result};
use qbench_core::{field_problem, MatrixError};
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

pub const ORIGIN_VARIANT: &str = "origin";

const CIRCUIT_EXTENSION: &str = "qasm";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchmarkDescriptor {
    pub file_name: String,
    pub algo: String,
    pub qubits: u32,
}

pub fn circuit_path(benchmark_folder: &Path, variant: &str, file_name: &str) -> PathBuf {
    benchmark_folder.join(variant).join(file_name)
}

/// `qft_indep_7.qasm` -> (`qft_indep`, Some(7)); `grover.qasm` -> (`grover`, None).
pub fn parse_file_name(file_name: &str) -> (String, Option<u32>) {
    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name);
    if let Some((algo, tail)) = stem.rsplit_once('_') {
        if !algo.is_empty() && !tail.is_empty() && tail.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(qubits) = tail.parse::<u32>() {
                return (algo.to_string(), Some(qubits));
            }
        }
    }
    (stem.to_string(), None)
}

pub fn scan_qubits(path: &Path) -> Result<Option<u32>> {
    let file = fs::File::open(path)
        .map_err(|e| anyhow!("failed to open circuit {}: {}", path.display(), e))?;
    for line in BufReader::new(file).lines() {
        if let Some(qubits) = qreg_size(&line?) {
            return Ok(Some(qubits));
        }
    }
    Ok(None)
}

fn qreg_size(line: &str) -> Option<u32> {
    let start = line.find("qreg q[")? + "qreg q[".len();
    let rest = &line[start..];
    let end = rest.find("];")?;
    rest[..end].parse().ok()
}

pub fn resolve(benchmark_folder: &Path, file_name: &str) -> Result<BenchmarkDescriptor> {
    let (algo, qubits) = parse_file_name(file_name);
    if let Some(problem) = field_problem(&algo) {
        return Err(MatrixError::Benchmark(format!(
            "algorithm name '{}' taken from {} {}",
            algo.escape_debug(),
            file_name,
            problem
        ))
        .into());
    }
    let qubits = match qubits {
        Some(qubits) => qubits,
        None => {
            let origin = circuit_path(benchmark_folder, ORIGIN_VARIANT, file_name);
            scan_qubits(&origin)?.ok_or_else(|| {
                MatrixError::Benchmark(format!(
                    "cannot determine qubit count of {}: no count in the name and no qreg declaration",
                    origin.display()
                ))
            })?
        }
    };
    Ok(BenchmarkDescriptor {
        file_name: file_name.to_string(),
        algo,
        qubits,
    })
}

pub fn resolve_all(benchmark_folder: &Path, file_names: &[String]) -> Result<Vec<BenchmarkDescriptor>> {
    file_names
        .iter()
        .map(|name| resolve(benchmark_folder, name))
        .collect()
}

/// One file name per line; blank lines and `#` comments are skipped.
pub fn load_list(path: &Path) -> Result<Vec<String>> {
    let raw = fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read benchmark list {}: {}", path.display(), e))?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

pub fn discover(benchmark_folder: &Path) -> Result<Vec<String>> {
    let origin = benchmark_folder.join(ORIGIN_VARIANT);
    let mut names = Vec::new();
    for entry in walkdir::WalkDir::new(&origin).min_depth(1).max_depth(1) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(CIRCUIT_EXTENSION) {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn temp_folder(label: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "qbench_benchmark_test_{}_{}_{}",
            label,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        fs::create_dir_all(dir.join(ORIGIN_VARIANT)).expect("create origin");
        dir
    }

    #[test]
    fn file_name_convention_splits_trailing_qubit_count() {
        assert_eq!(
            parse_file_name("qft_indep_qiskit_7.qasm"),
            ("qft_indep_qiskit".to_string(), Some(7))
        );
        assert_eq!(parse_file_name("grover.qasm"), ("grover".to_string(), None));
        assert_eq!(parse_file_name("ghz_v2.qasm"), ("ghz_v2".to_string(), None));
        assert_eq!(parse_file_name("_12.qasm"), ("_12".to_string(), None));
    }

    #[test]
    fn qreg_line_is_parsed() {
        assert_eq!(qreg_size("qreg q[16];"), Some(16));
        assert_eq!(qreg_size("  qreg q[3]; // data"), Some(3));
        assert_eq!(qreg_size("creg c[3];"), None);
        assert_eq!(qreg_size("qreg q[n];"), None);
    }

    #[test]
    fn resolve_falls_back_to_register_scan() {
        let dir = temp_folder("resolve");
        fs::write(
            dir.join(ORIGIN_VARIANT).join("grover.qasm"),
            "OPENQASM 2.0;\ninclude \"qelib1.inc\";\nqreg q[5];\ncreg c[5];\nh q[0];\n",
        )
        .expect("write circuit");
        fs::write(dir.join(ORIGIN_VARIANT).join("empty.qasm"), "OPENQASM 2.0;\n")
            .expect("write empty");

        let grover = resolve(&dir, "grover.qasm").expect("resolve grover");
        assert_eq!(grover.algo, "grover");
        assert_eq!(grover.qubits, 5);

        let named = resolve(&dir, "qft_9.qasm").expect("name carries the count");
        assert_eq!(named.qubits, 9);

        let err = resolve(&dir, "empty.qasm").expect_err("no qreg");
        assert!(matches!(
            err.downcast_ref::<MatrixError>(),
            Some(MatrixError::Benchmark(_))
        ));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn algorithm_names_that_cannot_be_stored_are_rejected_up_front() {
        let dir = temp_folder("names");
        let err = resolve(&dir, "adder,v2_3.qasm").expect_err("comma in name");
        assert!(matches!(
            err.downcast_ref::<MatrixError>(),
            Some(MatrixError::Benchmark(msg)) if msg.contains("adder,v2")
        ));
        assert!(resolve(&dir, " adder_3.qasm").is_err());
        assert_eq!(resolve(&dir, "adder_v2_3.qasm").expect("plain").algo, "adder_v2");
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn list_skips_comments_and_discover_finds_circuits() {
        let dir = temp_folder("list");
        let list = dir.join("list.txt");
        fs::write(&list, "# header\nqft_3.qasm\n\n  ghz_4.qasm  \n").expect("write list");
        assert_eq!(
            load_list(&list).expect("load"),
            vec!["qft_3.qasm".to_string(), "ghz_4.qasm".to_string()]
        );

        for name in ["b_2.qasm", "a_3.qasm", "notes.txt"] {
            fs::write(dir.join(ORIGIN_VARIANT).join(name), "").expect("seed");
        }
        assert_eq!(
            discover(&dir).expect("discover"),
            vec!["a_3.qasm".to_string(), "b_2.qasm".to_string()]
        );
        let _ = fs::remove_dir_all(dir);
    }
}
