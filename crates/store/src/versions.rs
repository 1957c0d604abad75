use crate::{
    category_exists, category_file_path, category_name_from_path, ensure_invariants, hash_content, parse_ledger,
    render_category_tree, render_summary, serialize_ledger, Describer, FsSignal, LedgerRead,
    MemoryConfig, MemoryWalk, MemoryWatcher, Result, SessionState, StoreError, Tuning,
    VersionEntry, VersionMap, USER_CATEGORY_NAME,
};
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use recall_sync::{Debouncer, LockedResource};
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Component, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

static VERSION_LOCK_WAIT_MS_LAST: AtomicU64 = AtomicU64::new(0);
static VERSION_LOCK_WAIT_MS_MAX: AtomicU64 = AtomicU64::new(0);

pub fn version_lock_wait_ms_last() -> u64 {
    VERSION_LOCK_WAIT_MS_LAST.load(Ordering::Relaxed)
}

pub fn version_lock_wait_ms_max() -> u64 {
    VERSION_LOCK_WAIT_MS_MAX.load(Ordering::Relaxed)
}

fn update_lock_wait_ms(wait_ms: u64) {
    VERSION_LOCK_WAIT_MS_LAST.store(wait_ms, Ordering::Relaxed);
    let mut current = VERSION_LOCK_WAIT_MS_MAX.load(Ordering::Relaxed);
    while wait_ms > current {
        match VERSION_LOCK_WAIT_MS_MAX.compare_exchange(
            current,
            wait_ms,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(next) => current = next,
        }
    }
}

enum Reconciled {
    Missing,
    Unchanged,
    Changed(VersionEntry),
}

/// Owns the in-memory version map and keeps `versions.json` and `summary.md` in sync with it.
///
/// Every read and write goes through one FIFO lock. After each mutation the map is compared
/// against its state before the mutation, and the two artifacts are rewritten only if
/// something changed. Cloning is cheap; clones share the same map.
#[derive(Clone)]
pub struct VersionCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    config: MemoryConfig,
    versions: LockedResource<VersionMap>,
    describer: Describer,
    session: Arc<SessionState>,
    debouncer: Debouncer,
    dirty: Mutex<BTreeSet<String>>,
    lock_warn: Duration,
}

/// Keeps the filesystem watch loop alive. Dropping it stops watching.
pub struct WatchHandle {
    task: JoinHandle<()>,
}

impl WatchHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl VersionCache {
    pub fn new(
        config: MemoryConfig,
        describer: Describer,
        session: Arc<SessionState>,
        tuning: &Tuning,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                config,
                versions: LockedResource::new(VersionMap::new()),
                describer,
                session,
                debouncer: Debouncer::new(tuning.debounce()),
                dirty: Mutex::new(BTreeSet::new()),
                lock_warn: tuning.lock_warn(),
            }),
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.inner.config
    }

    pub fn session(&self) -> &Arc<SessionState> {
        &self.inner.session
    }

    /// Startup load: reads the ledger, drops entries without a backing file, and logs the
    /// resulting category tree.
    pub async fn initialize(&self) -> Result<()> {
        self.load_from_disk(true).await
    }

    /// Replaces the map with the ledger on disk, after an external edit of `versions.json`.
    pub async fn reload_from_disk(&self) -> Result<()> {
        self.load_from_disk(false).await
    }

    async fn load_from_disk(&self, log_tree: bool) -> Result<()> {
        let inner = self.inner.clone();
        self.use_versions_with("load ledger", move |versions| {
            async move {
                inner
                    .load_ledger(versions, log_tree)
                    .await
                    .map(|stale| ((), stale))
            }
            .boxed()
        })
        .await
    }

    /// Re-hashes the named categories and refreshes descriptions whose content changed.
    ///
    /// All names are processed in one lock hold; their description calls overlap. A failure
    /// for one name is logged and does not prevent the others from being applied.
    pub async fn reconcile(&self, names: Vec<String>) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        let inner = self.inner.clone();
        self.use_versions("reconcile", move |versions| {
            async move { inner.reconcile_batch(versions, names).await }.boxed()
        })
        .await
    }

    /// Installs content authored by the ingestion pipeline: describes it, writes the file,
    /// then records the new entry.
    pub async fn apply_category_write(&self, name: String, content: String) -> Result<()> {
        let path = category_file_path(&self.inner.config, &name)?;
        let inner = self.inner.clone();
        self.use_versions("write category", move |versions| {
            async move { inner.write_category(versions, name, path, content).await }.boxed()
        })
        .await
    }

    /// A copy of the current map.
    pub async fn snapshot(&self) -> Result<VersionMap> {
        self.ensure_open("snapshot")?;
        let started = Instant::now();
        let snapshot = self
            .inner
            .versions
            .with(|versions| async move { versions.clone() }.boxed())
            .await?;
        update_lock_wait_ms(started.elapsed().as_millis() as u64);
        Ok(snapshot)
    }

    /// The summary document as it would be rendered from the current map.
    pub async fn summary(&self) -> Result<String> {
        Ok(render_summary(&self.snapshot().await?))
    }

    /// Queues a category for the next debounced reconciliation batch.
    pub fn mark_dirty(&self, name: String) {
        self.inner.lock_dirty().insert(name);
        let cache = self.clone();
        self.inner.debouncer.trigger(move || {
            async move {
                let names = cache.inner.take_dirty();
                if let Err(err) = cache.reconcile(names).await {
                    log::warn!("Reconciliation batch failed: {err}");
                }
            }
            .boxed()
        });
    }

    /// The ledger changed externally: hold back the pending batch, then reload.
    pub fn on_versions_dirty(&self) {
        self.inner.debouncer.poke();
        let cache = self.clone();
        tokio::spawn(async move {
            if let Err(err) = cache.reload_from_disk().await {
                log::warn!("Failed to reload ledger: {err}");
            }
        });
    }

    pub fn handle_signal(&self, signal: FsSignal) {
        match signal {
            FsSignal::CategoryDirty(path) => {
                match category_name_from_path(&self.inner.config, &path) {
                    Ok(name) => self.mark_dirty(name),
                    Err(err) => log::debug!("Ignoring change to {}: {err}", path.display()),
                }
            }
            FsSignal::SubtreeDirty(dir) => {
                let cache = self.clone();
                tokio::spawn(async move {
                    if let Err(err) = cache.rescan_subtree(dir).await {
                        log::warn!("Failed to rescan moved directory: {err}");
                    }
                });
            }
            FsSignal::VersionsDirty => self.on_versions_dirty(),
        }
    }

    /// Waits until no reconciliation batch is scheduled or running.
    pub async fn flush(&self) {
        while self.inner.debouncer.is_pending() {
            self.inner.debouncer.wait_for_pending_trigger().await;
        }
    }

    /// Marks every category document on disk dirty, catching edits made while not running.
    ///
    /// Returns the number of categories queued. Unchanged files cost a hash, not a model call.
    pub async fn rescan(&self) -> Result<usize> {
        let names = self.walk_names(self.inner.config.memory_dir.clone()).await?;
        let count = names.len();
        for name in names {
            self.mark_dirty(name);
        }
        Ok(count)
    }

    /// Marks dirty every category that is, or was, under `dir`.
    ///
    /// Known entries below the directory catch documents that moved away with it; a walk of
    /// whatever is on disk there now catches documents that arrived.
    pub async fn rescan_subtree(&self, dir: PathBuf) -> Result<usize> {
        let relative = dir
            .strip_prefix(&self.inner.config.memory_dir)
            .map_err(|_| StoreError::OutsideRoot(dir.clone()))?;
        let prefix: Vec<&str> = relative
            .components()
            .filter_map(|component| match component {
                Component::Normal(part) => part.to_str(),
                _ => None,
            })
            .collect();
        let prefix = format!("{}/", prefix.join("/"));

        let mut names: BTreeSet<String> = self
            .snapshot()
            .await?
            .into_keys()
            .filter(|name| prefix == "/" || name.starts_with(&prefix))
            .collect();
        names.extend(self.walk_names(dir).await?);

        let count = names.len();
        for name in names {
            self.mark_dirty(name);
        }
        Ok(count)
    }

    async fn walk_names(&self, dir: PathBuf) -> Result<Vec<String>> {
        let config = self.inner.config.clone();
        tokio::task::spawn_blocking(move || {
            if !dir.is_dir() {
                return Vec::new();
            }
            MemoryWalk::under(config, &dir)
                .map(|node| node.category_name)
                .collect()
        })
        .await
        .map_err(|err| StoreError::Task(err.to_string()))
    }

    /// Starts the filesystem watcher and the loop that turns its signals into reconciliation.
    ///
    /// The loop ends when the session closes or the handle is dropped.
    pub fn watch(&self) -> Result<WatchHandle> {
        let (tx, mut rx) = mpsc::channel(1024);
        let watcher = MemoryWatcher::start(&self.inner.config, tx)?;
        let cache = self.clone();
        let task = tokio::spawn(async move {
            let _watcher = watcher;
            let session = cache.inner.session.clone();
            loop {
                tokio::select! {
                    _ = session.closed() => {
                        log::info!("Memory session closed; stopping watcher");
                        break;
                    }
                    signal = rx.recv() => match signal {
                        Some(signal) => cache.handle_signal(signal),
                        None => {
                            log::warn!("Memory watcher channel closed");
                            break;
                        }
                    },
                }
            }
        });
        Ok(WatchHandle { task })
    }

    fn ensure_open(&self, label: &str) -> Result<()> {
        if self.inner.session.is_closed() {
            log::warn!("Skipping {label}: memory session is closed");
            return Err(StoreError::SessionClosed);
        }
        Ok(())
    }

    /// Runs `work` under the version lock, then rewrites the artifacts if the map changed.
    async fn use_versions<R, F>(&self, label: &'static str, work: F) -> Result<R>
    where
        R: Send + 'static,
        F: for<'a> FnOnce(&'a mut VersionMap) -> BoxFuture<'a, Result<R>> + Send + 'static,
    {
        self.use_versions_with(label, move |versions| {
            work(versions)
                .map(|result| result.map(|value| (value, false)))
                .boxed()
        })
        .await
    }

    /// Like `use_versions`, but `work` can also report that the artifacts on disk no longer
    /// match the map, forcing a rewrite even when the map itself is unchanged.
    async fn use_versions_with<R, F>(&self, label: &'static str, work: F) -> Result<R>
    where
        R: Send + 'static,
        F: for<'a> FnOnce(&'a mut VersionMap) -> BoxFuture<'a, Result<(R, bool)>>
            + Send
            + 'static,
    {
        self.ensure_open(label)?;
        let started = Instant::now();
        let inner = self.inner.clone();
        self.inner
            .versions
            .with_mut(move |versions| {
                async move {
                    let waited = started.elapsed();
                    update_lock_wait_ms(waited.as_millis() as u64);
                    if waited > inner.lock_warn {
                        log::warn!(
                            "Waited {}ms for the version lock ({label})",
                            waited.as_millis()
                        );
                    }
                    if inner.session.is_closed() {
                        log::warn!("Skipping {label}: memory session is closed");
                        return Err(StoreError::SessionClosed);
                    }

                    let before = versions.clone();
                    let (result, stale) = match work(versions).await {
                        Ok((value, stale)) => (Ok(value), stale),
                        Err(err) => (Err(err), false),
                    };
                    ensure_invariants(versions);

                    if stale || *versions != before {
                        if let Err(err) = inner.write_artifacts(versions).await {
                            log::error!("Failed to write memory artifacts: {err}");
                            if result.is_ok() {
                                return Err(err);
                            }
                        }
                    }
                    result
                }
                .boxed()
            })
            .await?
    }
}

impl CacheInner {
    fn lock_dirty(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.dirty.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_dirty(&self) -> Vec<String> {
        std::mem::take(&mut *self.lock_dirty()).into_iter().collect()
    }

    /// Installs the ledger from disk. Returns whether the file differs from what was
    /// installed (entries dropped, invariants added, or unparseable), so it must be rewritten.
    async fn load_ledger(&self, versions: &mut VersionMap, log_tree: bool) -> Result<bool> {
        let path = &self.config.versions_file;
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => String::new(),
            Err(err) => return Err(err.into()),
        };

        let mut stale = false;
        let loaded = match parse_ledger(&raw) {
            LedgerRead::MergeConflict => {
                log::warn!(
                    "{} contains merge conflict markers; keeping previous versions until resolved",
                    path.display()
                );
                return Ok(false);
            }
            LedgerRead::Invalid(err) => {
                log::error!(
                    "Failed to parse {}: {err}; starting from an empty ledger",
                    path.display()
                );
                stale = true;
                VersionMap::new()
            }
            LedgerRead::Parsed(loaded) => loaded,
        };

        let mut next = VersionMap::new();
        for (name, entry) in loaded.iter() {
            if category_exists(&self.config, name).await {
                next.insert(name.clone(), entry.clone());
            } else {
                log::info!("Dropping {name} from ledger: no backing file");
            }
        }
        ensure_invariants(&mut next);
        stale |= next != loaded;

        if log_tree {
            log::info!(
                "Loaded {} memory categories:\n{}",
                next.len(),
                render_category_tree(next.keys().map(String::as_str))
            );
        }
        *versions = next;
        Ok(stale)
    }

    async fn reconcile_batch(&self, versions: &mut VersionMap, names: Vec<String>) -> Result<()> {
        let tasks = names.into_iter().map(|name| {
            let previous = versions.get(&name).cloned();
            async move {
                let outcome = self.reconcile_one(&name, previous).await;
                (name, outcome)
            }
        });
        let outcomes = join_all(tasks).await;

        for (name, outcome) in outcomes {
            match outcome {
                Ok(Reconciled::Missing) => {
                    if versions.remove(&name).is_some() {
                        log::info!("Removed {name}: backing file is gone");
                    }
                }
                Ok(Reconciled::Unchanged) => log::debug!("{name} unchanged"),
                Ok(Reconciled::Changed(entry)) => {
                    log::info!("Refreshed description of {name}");
                    versions.insert(name, entry);
                }
                Err(err) => log::error!("Failed to reconcile {name}: {err}"),
            }
        }
        Ok(())
    }

    async fn write_category(
        &self,
        versions: &mut VersionMap,
        name: String,
        path: PathBuf,
        content: String,
    ) -> Result<()> {
        let content_hash = hash_content(&content);
        let description = self.describer.describe(&name, &content).await?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &content).await?;
        log::info!("Wrote {} ({} bytes)", path.display(), content.len());
        versions.insert(
            name,
            VersionEntry {
                content_hash,
                description,
            },
        );
        Ok(())
    }

    async fn reconcile_one(&self, name: &str, previous: Option<VersionEntry>) -> Result<Reconciled> {
        let path = category_file_path(&self.config, name)?;
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            // The user entry is synthetic and outlives its file.
            Err(err) if err.kind() == ErrorKind::NotFound && name == USER_CATEGORY_NAME => {
                return Ok(Reconciled::Unchanged)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Reconciled::Missing),
            Err(err) => return Err(err.into()),
        };

        let content_hash = hash_content(&content);
        if previous.is_some_and(|entry| entry.content_hash == content_hash) {
            return Ok(Reconciled::Unchanged);
        }

        let description = self.describer.describe(name, &content).await?;
        Ok(Reconciled::Changed(VersionEntry {
            content_hash,
            description,
        }))
    }

    async fn write_artifacts(&self, versions: &VersionMap) -> Result<()> {
        let ledger = serialize_ledger(versions)?;
        let summary = render_summary(versions);
        tokio::try_join!(
            tokio::fs::write(&self.config.versions_file, ledger),
            tokio::fs::write(&self.config.summary_file, summary),
        )?;
        log::debug!("Rewrote ledger and summary ({} categories)", versions.len());
        Ok(())
    }
}
