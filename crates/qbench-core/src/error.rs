use std::path::PathBuf;

use thiserror::Error;

use crate::ExperimentKey;

/// Fatal conditions of a matrix run. Backend timeouts are not errors: they are
/// recorded as [`crate::Outcome::Timeout`].
#[derive(Debug, Error)]
pub enum MatrixError {
    #[error("duplicate_key: {0} is already present in the result store")]
    DuplicateKey(ExperimentKey),

    #[error("key_shape: {key} {detail}")]
    KeyShape { key: ExperimentKey, detail: String },

    #[error("malformed_output: {tool} produced output that does not match its result pattern: {detail}\n{output}")]
    MalformedOutput {
        tool: String,
        detail: String,
        output: String,
    },

    #[error("backend_failed: {tool} exited with status {status}\n{stderr}")]
    BackendFailed {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("store_format: {path}:{line}: {detail}")]
    StoreFormat {
        path: PathBuf,
        line: usize,
        detail: String,
    },

    #[error("config: {0}")]
    Config(String),

    #[error("benchmark: {0}")]
    Benchmark(String),
}

impl MatrixError {
    pub fn malformed(tool: &str, detail: impl Into<String>, output: &str) -> Self {
        MatrixError::MalformedOutput {
            tool: tool.to_string(),
            detail: detail.into(),
            output: output.to_string(),
        }
    }
}
