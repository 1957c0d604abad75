use crate::{MemoryConfig, Result, USER_FILE_NAME};
use tokio::io::AsyncWriteExt;

/// Makes sure the memory root's `.gitignore` lists the user category file.
pub async fn ensure_gitignore(config: &MemoryConfig) -> Result<()> {
    let path = config.gitignore_file();
    let existing = match tokio::fs::read_to_string(&path).await {
        Ok(raw) => Some(raw),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
        Err(err) => return Err(err.into()),
    };

    match existing {
        None => {
            tokio::fs::write(&path, format!("{USER_FILE_NAME}\n")).await?;
            log::info!("Created {}", path.display());
        }
        Some(raw) if raw.lines().any(|line| line.trim() == USER_FILE_NAME) => {}
        Some(raw) => {
            let mut entry = String::new();
            if !raw.is_empty() && !raw.ends_with('\n') {
                entry.push('\n');
            }
            entry.push_str(USER_FILE_NAME);
            entry.push('\n');

            let mut file = tokio::fs::OpenOptions::new()
                .append(true)
                .open(&path)
                .await?;
            file.write_all(entry.as_bytes()).await?;
            file.flush().await?;
            log::info!("Added {USER_FILE_NAME} to {}", path.display());
        }
    }
    Ok(())
}
