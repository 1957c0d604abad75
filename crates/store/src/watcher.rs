use crate::{MemoryConfig, Result, StoreError};
use notify::event::EventKind;
use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Component, Path, PathBuf};
use tokio::sync::mpsc;

/// Semantic change signals derived from raw filesystem events.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FsSignal {
    /// A category document was created, modified or removed.
    CategoryDirty(PathBuf),
    /// A directory was created, moved or removed; any category under it may have changed.
    SubtreeDirty(PathBuf),
    /// The version ledger changed on disk.
    VersionsDirty,
}

/// Maps one changed path to a signal, or `None` when the path is not ours to react to.
pub fn classify_path(config: &MemoryConfig, path: &Path) -> Option<FsSignal> {
    if path == config.versions_file {
        return Some(FsSignal::VersionsDirty);
    }
    if path == config.summary_file {
        return None;
    }

    let relative = path.strip_prefix(&config.memory_dir).ok()?;
    for component in relative.components() {
        match component {
            Component::Normal(name) if name.to_string_lossy().starts_with('.') => return None,
            Component::Normal(_) => {}
            _ => return None,
        }
    }

    // Directories may already be gone (renamed away), so they are recognised by the
    // missing extension rather than by a stat.
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("md") => Some(FsSignal::CategoryDirty(path.to_path_buf())),
        None => Some(FsSignal::SubtreeDirty(path.to_path_buf())),
        Some(_) => None,
    }
}

/// Classifies every path of an event, dropping duplicates and pure access notifications.
pub fn classify_event(config: &MemoryConfig, event: &Event) -> Vec<FsSignal> {
    if matches!(event.kind, EventKind::Access(_) | EventKind::Other) {
        return Vec::new();
    }

    let mut signals = Vec::new();
    for path in &event.paths {
        if let Some(signal) = classify_path(config, path) {
            if !signals.contains(&signal) {
                signals.push(signal);
            }
        }
    }
    signals
}

/// Recursive `notify` watcher over the memory root, feeding classified signals to a channel.
///
/// Dropping the watcher stops event delivery.
pub struct MemoryWatcher {
    _watcher: RecommendedWatcher,
}

impl MemoryWatcher {
    pub fn start(config: &MemoryConfig, sender: mpsc::Sender<FsSignal>) -> Result<Self> {
        let classify_config = config.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    for signal in classify_event(&classify_config, &event) {
                        if sender.blocking_send(signal).is_err() {
                            return;
                        }
                    }
                }
                Err(err) => log::error!("Memory watcher error: {err}"),
            },
            NotifyConfig::default(),
        )
        .map_err(|e| StoreError::Watcher(format!("watcher init failed: {e}")))?;

        watcher
            .watch(&config.memory_dir, RecursiveMode::Recursive)
            .map_err(|e| {
                StoreError::Watcher(format!(
                    "failed to watch {}: {e}",
                    config.memory_dir.display()
                ))
            })?;
        log::info!("Watching {}", config.memory_dir.display());

        Ok(Self { _watcher: watcher })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, ModifyKind, RemoveKind, RenameMode};
    use pretty_assertions::assert_eq;

    fn config() -> MemoryConfig {
        let root = PathBuf::from("/memory");
        MemoryConfig {
            context_file: None,
            summary_file: root.join("summary.md"),
            versions_file: root.join("versions.json"),
            user_file: root.join("user.local.md"),
            memory_dir: root,
        }
    }

    #[test]
    fn classifies_paths() {
        let config = config();
        assert_eq!(
            classify_path(&config, Path::new("/memory/versions.json")),
            Some(FsSignal::VersionsDirty)
        );
        assert_eq!(
            classify_path(&config, Path::new("/memory/lang/rust.md")),
            Some(FsSignal::CategoryDirty(PathBuf::from("/memory/lang/rust.md")))
        );
        assert_eq!(
            classify_path(&config, Path::new("/memory/user.local.md")),
            Some(FsSignal::CategoryDirty(PathBuf::from("/memory/user.local.md")))
        );
        assert_eq!(classify_path(&config, Path::new("/memory/summary.md")), None);
        assert_eq!(classify_path(&config, Path::new("/memory/notes.txt")), None);
        assert_eq!(
            classify_path(&config, Path::new("/memory/lang")),
            Some(FsSignal::SubtreeDirty(PathBuf::from("/memory/lang")))
        );
        assert_eq!(classify_path(&config, Path::new("/memory/.git/refs")), None);
        assert_eq!(classify_path(&config, Path::new("/memory/.git/x.md")), None);
        assert_eq!(classify_path(&config, Path::new("/elsewhere/a.md")), None);
    }

    #[test]
    fn event_paths_are_deduplicated() {
        let config = config();
        let event = Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path(PathBuf::from("/memory/a.md"))
            .add_path(PathBuf::from("/memory/a.md"))
            .add_path(PathBuf::from("/memory/summary.md"))
            .add_path(PathBuf::from("/memory/versions.json"));
        assert_eq!(
            classify_event(&config, &event),
            vec![
                FsSignal::CategoryDirty(PathBuf::from("/memory/a.md")),
                FsSignal::VersionsDirty
            ]
        );
    }

    #[test]
    fn create_and_remove_are_both_dirty() {
        let config = config();
        for kind in [
            EventKind::Create(CreateKind::File),
            EventKind::Remove(RemoveKind::File),
        ] {
            let event = Event::new(kind).add_path(PathBuf::from("/memory/b.md"));
            assert_eq!(classify_event(&config, &event).len(), 1);
        }
    }

    #[test]
    fn directory_rename_reports_both_sides() {
        let config = config();
        let event = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(PathBuf::from("/memory/lang"))
            .add_path(PathBuf::from("/memory/languages"));
        assert_eq!(
            classify_event(&config, &event),
            vec![
                FsSignal::SubtreeDirty(PathBuf::from("/memory/lang")),
                FsSignal::SubtreeDirty(PathBuf::from("/memory/languages"))
            ]
        );
    }

    #[test]
    fn access_events_are_ignored() {
        let config = config();
        let event = Event::new(EventKind::Access(AccessKind::Any))
            .add_path(PathBuf::from("/memory/b.md"));
        assert!(classify_event(&config, &event).is_empty());
    }
}
