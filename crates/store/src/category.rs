use crate::{MemoryConfig, Result, StoreError, USER_FILE_NAME};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Component, Path, PathBuf};

/// Reserved key for the user-preferences category. Always present in the version map.
pub const USER_CATEGORY_NAME: &str = "user";
/// Name of the summary artifact; never a valid category key.
pub const SUMMARY_CATEGORY_NAME: &str = "summary";

static CATEGORY_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([\w-]+/)*[\w-]+$").expect("static regex"));

/// One or more `/`-separated segments of word characters, `-` and `_`.
pub fn is_valid_category_name(name: &str) -> bool {
    name != SUMMARY_CATEGORY_NAME && CATEGORY_NAME_RE.is_match(name)
}

pub fn validate_category_name(name: &str) -> Result<()> {
    if is_valid_category_name(name) {
        Ok(())
    } else {
        Err(StoreError::InvalidCategoryName(name.to_string()))
    }
}

/// Maps a category name to its markdown file under the memory root.
pub fn category_file_path(config: &MemoryConfig, name: &str) -> Result<PathBuf> {
    validate_category_name(name)?;
    if name == USER_CATEGORY_NAME {
        return Ok(config.user_file.clone());
    }

    let mut path = config.memory_dir.clone();
    let mut segments = name.split('/').peekable();
    while let Some(segment) = segments.next() {
        if segments.peek().is_some() {
            path.push(segment);
        } else {
            path.push(format!("{segment}.md"));
        }
    }

    if !path.starts_with(&config.memory_dir) {
        return Err(StoreError::OutsideRoot(path));
    }
    Ok(path)
}

/// Maps a markdown file under the memory root back to its category name.
pub fn category_name_from_path(config: &MemoryConfig, path: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(&config.memory_dir)
        .map_err(|_| StoreError::OutsideRoot(path.to_path_buf()))?;

    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(
                part.to_str()
                    .ok_or_else(|| StoreError::InvalidCategoryName(part.to_string_lossy().into()))?,
            ),
            _ => return Err(StoreError::OutsideRoot(path.to_path_buf())),
        }
    }

    if parts.len() == 1 && parts[0] == USER_FILE_NAME {
        return Ok(USER_CATEGORY_NAME.to_string());
    }

    let Some(last) = parts.pop() else {
        return Err(StoreError::InvalidExtension(path.to_path_buf()));
    };
    let Some(stem) = last.strip_suffix(".md") else {
        return Err(StoreError::InvalidExtension(path.to_path_buf()));
    };
    parts.push(stem);

    let name = parts.join("/");
    validate_category_name(&name)?;
    Ok(name)
}

/// Whether the category's backing file exists. The user category always exists.
pub async fn category_exists(config: &MemoryConfig, name: &str) -> bool {
    if name == USER_CATEGORY_NAME {
        return true;
    }
    match category_file_path(config, name) {
        Ok(path) => tokio::fs::try_exists(path).await.unwrap_or(false),
        Err(_) => false,
    }
}
