use anyhow::Result;
use qbench_core::{atomic_write_bytes, ensure_dir};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ScratchDir {
    root: PathBuf,
}

impl ScratchDir {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn file_once(&self, name: &str, contents: impl FnOnce() -> String) -> Result<PathBuf> {
        let path = self.root.join(name);
        if !path.exists() {
            ensure_dir(&self.root)?;
            atomic_write_bytes(&path, contents().as_bytes())?;
            debug!(path = %path.display(), "created scratch file");
        }
        Ok(path)
    }

    pub fn purge(&self) -> Result<()> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root)?;
            debug!(path = %self.root.display(), "removed scratch directory");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::cell::Cell;

    #[test]
    fn file_is_created_once_and_purged() {
        let root = std::env::temp_dir().join(format!(
            "qbench_scratch_test_{}_{}",
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        let scratch = ScratchDir::new(&root);
        let writes = Cell::new(0);
        let make = || {
            writes.set(writes.get() + 1);
            "amp 000;\n".to_string()
        };
        let first = scratch.file_once("obs_3.obs", make).expect("first");
        let second = scratch
            .file_once("obs_3.obs", || {
                writes.set(writes.get() + 1);
                String::new()
            })
            .expect("second");
        assert_eq!(first, second);
        assert_eq!(writes.get(), 1);
        assert_eq!(fs::read_to_string(&first).expect("read"), "amp 000;\n");

        scratch.purge().expect("purge");
        assert!(!root.exists());
        scratch.purge().expect("purging twice is fine");
    }
}
