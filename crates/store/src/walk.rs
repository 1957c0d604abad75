use crate::{category_name_from_path, MemoryConfig, SUMMARY_FILE_NAME};
use ignore::{Walk, WalkBuilder};
use std::path::{Path, PathBuf};

/// A category document found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryNode {
    pub category_name: String,
    pub path: PathBuf,
}

/// Lazily walks the memory root and yields every category document.
///
/// Hidden directories and files are skipped, as are `summary.md` and anything that does not
/// map to a valid category name. Ignore files are not honoured: `user.local.md` is listed in
/// the root `.gitignore` but is still a category.
pub struct MemoryWalk {
    config: MemoryConfig,
    inner: Walk,
}

impl MemoryWalk {
    pub fn new(config: MemoryConfig) -> Self {
        let root = config.memory_dir.clone();
        Self::under(config, &root)
    }

    /// Walks only the subtree rooted at `dir`, which must lie inside the memory root.
    pub fn under(config: MemoryConfig, dir: &Path) -> Self {
        let mut builder = WalkBuilder::new(dir);
        builder
            .hidden(true)
            .ignore(false)
            .parents(false)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .sort_by_file_name(|a, b| a.cmp(b));
        let inner = builder.build();
        Self { config, inner }
    }
}

impl Iterator for MemoryWalk {
    type Item = MemoryNode;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.inner.next()? {
                Ok(entry) => entry,
                Err(err) => {
                    log::warn!("Failed to read memory entry: {err}");
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|kind| kind.is_file()) {
                continue;
            }

            let path = entry.path();
            if path == self.config.memory_dir.join(SUMMARY_FILE_NAME) {
                continue;
            }
            if path.extension().and_then(|ext| ext.to_str()) != Some("md") {
                continue;
            }

            match category_name_from_path(&self.config, path) {
                Ok(category_name) => {
                    return Some(MemoryNode {
                        category_name,
                        path: path.to_path_buf(),
                    })
                }
                Err(err) => log::debug!("Skipping {}: {err}", path.display()),
            }
        }
    }
}
