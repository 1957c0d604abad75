use crate::{QueryError, Result};
use recall_sampling::{PromptBuilder, RateLimitedSampler, Sampler};
use recall_store::{
    category_file_path, ensure_gitignore, validate_category_name, Describer, GuardedSampler,
    MemoryConfig, SessionState, Tuning, VersionCache, VersionMap, WatchHandle,
    USER_CATEGORY_NAME,
};
use recall_sync::KeyedLock;
use std::io::ErrorKind;
use std::sync::{Arc, Mutex, PoisonError};

/// Canned reply when nothing in memory answers a query.
pub const NO_MEMORY_RESPONSE: &str = "No relevant memory found for the query. Go search the codebase and once you're done, ingest your findings into memory for next time.";

/// One memory root and everything wired around it.
///
/// Every model call goes through a rate limiter and a guard that closes the session on a
/// permission denial. Closing the session stops the watcher and rejects further writes.
pub struct Memory {
    pub(crate) config: MemoryConfig,
    pub(crate) sampler: Arc<dyn Sampler>,
    pub(crate) prompts: Arc<PromptBuilder>,
    pub(crate) cache: VersionCache,
    pub(crate) session: Arc<SessionState>,
    pub(crate) update_locks: KeyedLock<String>,
    watch: Mutex<Option<WatchHandle>>,
}

impl Memory {
    /// Wires the store and sampling stack. Nothing is read until [`initialize`](Self::initialize).
    pub async fn create(
        config: MemoryConfig,
        tuning: &Tuning,
        sampler: Arc<dyn Sampler>,
    ) -> Result<Arc<Self>> {
        ensure_gitignore(&config).await?;

        let session = Arc::new(SessionState::new());
        let limited: Arc<dyn Sampler> =
            Arc::new(RateLimitedSampler::new(sampler, tuning.sampling_limits()));
        let sampler: Arc<dyn Sampler> = Arc::new(GuardedSampler::new(limited, session.clone()));
        let prompts = Arc::new(PromptBuilder::new(
            config.context_file.clone(),
            USER_CATEGORY_NAME,
        ));
        let describer = Describer::new(sampler.clone(), prompts.clone());
        let cache = VersionCache::new(config.clone(), describer, session.clone(), tuning);

        Ok(Arc::new(Self {
            config,
            sampler,
            prompts,
            cache,
            session,
            update_locks: KeyedLock::new(),
            watch: Mutex::new(None),
        }))
    }

    /// Loads the ledger, optionally starts watching the memory root, and queues every
    /// category on disk for reconciliation.
    pub async fn initialize(&self, watch: bool) -> Result<()> {
        self.cache.initialize().await?;
        if watch {
            let handle = self.cache.watch()?;
            *self.watch.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        }
        let queued = self.cache.rescan().await?;
        log::info!(
            "Memory ready at {} ({queued} category files queued for reconciliation)",
            self.config.memory_dir.display()
        );
        Ok(())
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn cache(&self) -> &VersionCache {
        &self.cache
    }

    pub fn is_closed(&self) -> bool {
        self.session.is_closed()
    }

    /// Waits for any scheduled reconciliation batch to finish.
    pub async fn flush(&self) {
        self.cache.flush().await;
    }

    /// Every known category with its description.
    pub async fn list_categories(&self) -> Result<VersionMap> {
        Ok(self.cache.snapshot().await?)
    }

    /// Raw markdown of one category, or `None` if it has no file yet.
    pub async fn get_category(&self, name: &str) -> Result<Option<String>> {
        validate_category_name(name)
            .map_err(|_| QueryError::InvalidCategoryName(name.to_string()))?;
        let path = category_file_path(&self.config, name)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Whether the watch loop is still running. It ends on its own once the session closes.
    pub fn is_watching(&self) -> bool {
        self.watch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stops the filesystem watcher. The memory stays usable for direct calls.
    pub fn stop_watching(&self) {
        if self
            .watch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
        {
            log::info!("Stopped watching {}", self.config.memory_dir.display());
        }
    }
}
