use crate::{Result, StoreError};
use recall_sampling::SamplingLimits;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const SUMMARY_FILE_NAME: &str = "summary.md";
pub const VERSIONS_FILE_NAME: &str = "versions.json";
/// Backing file of the reserved user category. Kept out of version control.
pub const USER_FILE_NAME: &str = "user.local.md";
pub const GITIGNORE_FILE_NAME: &str = ".gitignore";

/// Resolved locations of everything the store reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryConfig {
    pub memory_dir: PathBuf,
    pub context_file: Option<PathBuf>,
    pub summary_file: PathBuf,
    pub versions_file: PathBuf,
    pub user_file: PathBuf,
}

impl MemoryConfig {
    /// Creates the memory directory if needed and resolves all derived paths.
    ///
    /// A relative `context_file` is resolved against the memory directory and must exist.
    pub async fn new(memory_dir: impl AsRef<Path>, context_file: Option<&Path>) -> Result<Self> {
        let memory_dir = memory_dir.as_ref();
        if memory_dir.as_os_str().is_empty() {
            return Err(StoreError::Config(
                "memory directory must be non-empty".to_string(),
            ));
        }

        let memory_dir = if memory_dir.is_absolute() {
            memory_dir.to_path_buf()
        } else {
            std::env::current_dir()?.join(memory_dir)
        };
        tokio::fs::create_dir_all(&memory_dir).await?;
        // Watcher events are reported against the canonical path.
        let memory_dir = tokio::fs::canonicalize(&memory_dir).await?;

        let context_file = match context_file {
            Some(path) => {
                let resolved = memory_dir.join(path);
                if !tokio::fs::try_exists(&resolved).await.unwrap_or(false) {
                    return Err(StoreError::Config(format!(
                        "context file does not exist: {}",
                        resolved.display()
                    )));
                }
                Some(resolved)
            }
            None => None,
        };

        Ok(Self {
            summary_file: memory_dir.join(SUMMARY_FILE_NAME),
            versions_file: memory_dir.join(VERSIONS_FILE_NAME),
            user_file: memory_dir.join(USER_FILE_NAME),
            context_file,
            memory_dir,
        })
    }

    pub fn gitignore_file(&self) -> PathBuf {
        self.memory_dir.join(GITIGNORE_FILE_NAME)
    }
}

/// Optional knobs, read from a TOML file. Missing keys keep their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Tuning {
    pub debounce_ms: u64,
    pub max_concurrent_samples: usize,
    pub min_sample_spacing_ms: u64,
    pub lock_warn_ms: u64,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            debounce_ms: 250,
            max_concurrent_samples: 4,
            min_sample_spacing_ms: 100,
            lock_warn_ms: 1_000,
        }
    }
}

impl Tuning {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|err| StoreError::Config(format!("invalid tuning file: {err}")))
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|err| {
            StoreError::Config(format!("read tuning file {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn lock_warn(&self) -> Duration {
        Duration::from_millis(self.lock_warn_ms)
    }

    pub fn sampling_limits(&self) -> SamplingLimits {
        SamplingLimits {
            max_in_flight: self.max_concurrent_samples.max(1),
            min_spacing: Duration::from_millis(self.min_sample_spacing_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_paths_and_creates_directory() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("memory");

        let config = MemoryConfig::new(&root, None).await.unwrap();

        assert!(root.is_dir());
        assert_eq!(config.summary_file, config.memory_dir.join("summary.md"));
        assert_eq!(config.versions_file, config.memory_dir.join("versions.json"));
        assert_eq!(config.user_file, config.memory_dir.join("user.local.md"));
        assert!(config.context_file.is_none());
    }

    #[tokio::test]
    async fn missing_context_file_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let err = MemoryConfig::new(temp.path(), Some(Path::new("nope.md")))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }

    #[tokio::test]
    async fn empty_directory_is_rejected() {
        let err = MemoryConfig::new("", None).await.unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }

    #[test]
    fn tuning_fills_missing_keys_with_defaults() {
        let tuning = Tuning::from_toml_str("debounce_ms = 500\n").unwrap();
        assert_eq!(tuning.debounce(), Duration::from_millis(500));
        assert_eq!(tuning.max_concurrent_samples, 4);
        assert_eq!(tuning.lock_warn(), Duration::from_secs(1));
    }

    #[test]
    fn tuning_rejects_unknown_keys() {
        assert!(Tuning::from_toml_str("debounce = 1\n").is_err());
    }
}
