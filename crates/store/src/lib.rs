//! # Recall Store
//!
//! File-backed memory: every category is a markdown document under the memory root, and a
//! version ledger records a content hash and description per category.
//!
//! ## Consistency
//!
//! ```text
//! notify watcher
//!     │
//!     ├──> classifier ──> CategoryDirty(path) ──> debounced batch ──┐
//!     │               └─> VersionsDirty ──> poke + reload ─────────┤
//!     │                                                             ▼
//! ingestion write ────────────────────────────────────────> VersionCache (single FIFO lock)
//!                                                                   │ changed?
//!                                                                   ▼
//!                                                   versions.json + summary.md
//! ```
//!
//! Every mutation of the version map goes through one [`recall_sync::LockedResource`], and
//! the two derived artifacts are rewritten only when the map actually changed.

mod category;
mod config;
mod describe;
mod error;
mod gitignore;
mod ledger;
mod session;
mod tree;
mod versions;
mod walk;
mod watcher;

pub use category::{
    category_exists, category_file_path, category_name_from_path, is_valid_category_name,
    validate_category_name, SUMMARY_CATEGORY_NAME, USER_CATEGORY_NAME,
};
pub use config::{
    MemoryConfig, Tuning, GITIGNORE_FILE_NAME, SUMMARY_FILE_NAME, USER_FILE_NAME,
    VERSIONS_FILE_NAME,
};
pub use describe::Describer;
pub use error::{Result, StoreError};
pub use gitignore::ensure_gitignore;
pub use ledger::{
    ensure_invariants, has_stored_categories, hash_content, parse_ledger, render_summary,
    serialize_ledger, LedgerRead, VersionEntry, VersionMap, DEFAULT_USER_DESCRIPTION,
    LEDGER_HEADER,
};
pub use session::{GuardedSampler, SessionState};
pub use tree::render_category_tree;
pub use versions::{version_lock_wait_ms_last, version_lock_wait_ms_max, VersionCache, WatchHandle};
pub use walk::{MemoryNode, MemoryWalk};
pub use watcher::{classify_event, classify_path, FsSignal, MemoryWatcher};
