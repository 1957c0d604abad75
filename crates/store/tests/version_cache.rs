use async_trait::async_trait;
use pretty_assertions::assert_eq;
use recall_sampling::{PromptBuilder, SampleRequest, Sampler};
use recall_store::{
    hash_content, parse_ledger, render_summary, serialize_ledger, version_lock_wait_ms_max,
    Describer, FsSignal, LedgerRead, MemoryConfig, SessionState, StoreError, Tuning,
    VersionCache, VersionEntry, VersionMap, DEFAULT_USER_DESCRIPTION, LEDGER_HEADER,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Describes a category as "About <name>" and counts how often it was asked.
#[derive(Default)]
struct CountingDescriber {
    calls: AtomicUsize,
    delay: Duration,
}

impl CountingDescriber {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sampler for CountingDescriber {
    async fn sample(&self, request: SampleRequest) -> recall_sampling::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let marker = "<CONTENT categoryName=\"";
        let start = request.prompt.find(marker).expect("description prompt") + marker.len();
        let name = &request.prompt[start..];
        let name = &name[..name.find('"').expect("closing quote")];
        Ok(format!("<DESCRIPTION>About {name}</DESCRIPTION>"))
    }
}

struct Fixture {
    _tmp: TempDir,
    config: MemoryConfig,
    cache: VersionCache,
    sampler: Arc<CountingDescriber>,
    session: Arc<SessionState>,
}

async fn fixture() -> Fixture {
    fixture_with(CountingDescriber::default()).await
}

async fn fixture_with(describer: CountingDescriber) -> Fixture {
    let tmp = TempDir::new().unwrap();
    let config = MemoryConfig::new(tmp.path(), None).await.unwrap();
    let sampler = Arc::new(describer);
    let describer = Describer::new(sampler.clone(), Arc::new(PromptBuilder::new(None, "user")));
    let session = Arc::new(SessionState::new());
    let tuning = Tuning {
        debounce_ms: 50,
        ..Tuning::default()
    };
    let cache = VersionCache::new(config.clone(), describer, session.clone(), &tuning);
    Fixture {
        _tmp: tmp,
        config,
        cache,
        sampler,
        session,
    }
}

fn entry(hash: &str, description: &str) -> VersionEntry {
    VersionEntry {
        content_hash: hash.to_string(),
        description: description.to_string(),
    }
}

/// The ledger and summary on disk must both be projections of `expected`.
fn assert_artifacts_match(config: &MemoryConfig, expected: &VersionMap) {
    let ledger = std::fs::read_to_string(&config.versions_file).unwrap();
    assert!(ledger.starts_with(LEDGER_HEADER));
    assert_eq!(parse_ledger(&ledger), LedgerRead::Parsed(expected.clone()));
    assert_eq!(
        std::fs::read_to_string(&config.summary_file).unwrap(),
        render_summary(expected)
    );
}

#[tokio::test]
async fn initialize_on_empty_root_writes_user_entry() {
    let fx = fixture().await;
    fx.cache.initialize().await.unwrap();

    let snapshot = fx.cache.snapshot().await.unwrap();
    let mut expected = VersionMap::new();
    expected.insert("user".to_string(), entry("", DEFAULT_USER_DESCRIPTION));
    assert_eq!(snapshot, expected);
    assert_artifacts_match(&fx.config, &snapshot);
    assert_eq!(fx.sampler.calls(), 0);
}

#[tokio::test]
async fn category_write_creates_file_entry_and_artifacts() {
    let fx = fixture().await;
    fx.cache.initialize().await.unwrap();

    fx.cache
        .apply_category_write("lang/rust".to_string(), "# Rust\nUse clippy.".to_string())
        .await
        .unwrap();

    assert_eq!(
        std::fs::read_to_string(fx.config.memory_dir.join("lang/rust.md")).unwrap(),
        "# Rust\nUse clippy."
    );
    let snapshot = fx.cache.snapshot().await.unwrap();
    assert_eq!(
        snapshot.get("lang/rust"),
        Some(&entry(&hash_content("# Rust\nUse clippy."), "About lang/rust"))
    );
    assert_artifacts_match(&fx.config, &snapshot);
    assert!(fx
        .cache
        .summary()
        .await
        .unwrap()
        .contains("### lang/rust\r\n\r\nAbout lang/rust"));
}

#[tokio::test]
async fn reconciling_unchanged_content_is_a_no_op() {
    let fx = fixture().await;
    fx.cache.initialize().await.unwrap();
    fx.cache
        .apply_category_write("api".to_string(), "endpoints".to_string())
        .await
        .unwrap();
    assert_eq!(fx.sampler.calls(), 1);

    // Artifacts are only rewritten on change, so a removed summary stays removed.
    std::fs::remove_file(&fx.config.summary_file).unwrap();
    fx.cache.reconcile(vec!["api".to_string()]).await.unwrap();

    assert_eq!(fx.sampler.calls(), 1);
    assert!(!fx.config.summary_file.exists());
}

#[tokio::test]
async fn reconcile_refreshes_changed_and_removes_missing() {
    let fx = fixture().await;
    fx.cache.initialize().await.unwrap();
    fx.cache
        .apply_category_write("a".to_string(), "one".to_string())
        .await
        .unwrap();
    fx.cache
        .apply_category_write("b".to_string(), "two".to_string())
        .await
        .unwrap();

    std::fs::write(fx.config.memory_dir.join("a.md"), "one, edited").unwrap();
    std::fs::remove_file(fx.config.memory_dir.join("b.md")).unwrap();
    fx.cache
        .reconcile(vec!["a".to_string(), "b".to_string(), "user".to_string()])
        .await
        .unwrap();

    let snapshot = fx.cache.snapshot().await.unwrap();
    assert_eq!(
        snapshot.keys().cloned().collect::<Vec<_>>(),
        vec!["a".to_string(), "user".to_string()]
    );
    assert_eq!(snapshot["a"].content_hash, hash_content("one, edited"));
    assert_eq!(snapshot["user"].description, DEFAULT_USER_DESCRIPTION);
    assert_artifacts_match(&fx.config, &snapshot);
}

#[tokio::test]
async fn hand_edited_entry_without_file_is_dropped() {
    let fx = fixture().await;
    std::fs::write(fx.config.memory_dir.join("api.md"), "endpoints").unwrap();
    let raw = format!(
        "{LEDGER_HEADER}\n{{\n\t\"api\": {{\"contentHash\": \"{}\", \"description\": \"API\"}},\n\t\"feature/auth\": {{\"contentHash\": \"\", \"description\": \"Auth flows\"}}\n}}",
        hash_content("endpoints")
    );
    std::fs::write(&fx.config.versions_file, raw).unwrap();

    fx.cache.reload_from_disk().await.unwrap();

    let snapshot = fx.cache.snapshot().await.unwrap();
    assert!(!snapshot.contains_key("feature/auth"));
    assert_eq!(snapshot["api"].description, "API");
    assert!(!std::fs::read_to_string(&fx.config.summary_file)
        .unwrap()
        .contains("feature/auth"));
    assert_artifacts_match(&fx.config, &snapshot);
}

#[tokio::test]
async fn hand_edited_entry_after_startup_is_dropped_from_the_ledger() {
    let fx = fixture().await;
    fx.cache.initialize().await.unwrap();
    fx.cache
        .apply_category_write("api".to_string(), "endpoints".to_string())
        .await
        .unwrap();
    let before = fx.cache.snapshot().await.unwrap();

    let mut edited = before.clone();
    edited.insert("feature/auth".to_string(), entry("", "Auth flows"));
    std::fs::write(&fx.config.versions_file, serialize_ledger(&edited).unwrap()).unwrap();

    fx.cache.reload_from_disk().await.unwrap();

    let snapshot = fx.cache.snapshot().await.unwrap();
    assert_eq!(snapshot, before);
    assert!(!std::fs::read_to_string(&fx.config.versions_file)
        .unwrap()
        .contains("feature/auth"));
    assert_artifacts_match(&fx.config, &snapshot);
}

#[tokio::test]
async fn ledger_edit_during_pending_batch_is_kept() {
    let fx = fixture().await;
    fx.cache.initialize().await.unwrap();
    fx.cache
        .apply_category_write("a".to_string(), "one".to_string())
        .await
        .unwrap();
    std::fs::write(fx.config.memory_dir.join("b.md"), "two").unwrap();
    fx.cache.mark_dirty("b".to_string());

    let mut edited = fx.cache.snapshot().await.unwrap();
    edited.get_mut("a").unwrap().description = "Hand written".to_string();
    std::fs::write(&fx.config.versions_file, serialize_ledger(&edited).unwrap()).unwrap();
    fx.cache.handle_signal(FsSignal::VersionsDirty);
    fx.cache.flush().await;

    let snapshot = fx.cache.snapshot().await.unwrap();
    assert_eq!(snapshot["a"].description, "Hand written");
    assert_eq!(snapshot["b"].description, "About b");
    assert_artifacts_match(&fx.config, &snapshot);
}

#[tokio::test]
async fn moved_directory_reconciles_old_and_new_names() {
    let fx = fixture().await;
    fx.cache.initialize().await.unwrap();
    fx.cache
        .apply_category_write("lang/rust".to_string(), "clippy".to_string())
        .await
        .unwrap();
    fx.cache
        .apply_category_write("api".to_string(), "endpoints".to_string())
        .await
        .unwrap();

    let root = fx.config.memory_dir.clone();
    std::fs::rename(root.join("lang"), root.join("languages")).unwrap();
    assert_eq!(fx.cache.rescan_subtree(root.join("lang")).await.unwrap(), 1);
    assert_eq!(fx.cache.rescan_subtree(root.join("languages")).await.unwrap(), 1);
    fx.cache.flush().await;

    let snapshot = fx.cache.snapshot().await.unwrap();
    assert_eq!(
        snapshot.keys().cloned().collect::<Vec<_>>(),
        vec!["api".to_string(), "languages/rust".to_string(), "user".to_string()]
    );
    assert_eq!(snapshot["languages/rust"].content_hash, hash_content("clippy"));
    assert_artifacts_match(&fx.config, &snapshot);
}

#[tokio::test]
async fn long_lock_hold_is_recorded_as_wait() {
    let fx = fixture_with(CountingDescriber {
        delay: Duration::from_millis(300),
        ..Default::default()
    })
    .await;
    fx.cache.initialize().await.unwrap();

    let writer = {
        let cache = fx.cache.clone();
        tokio::spawn(async move {
            cache
                .apply_category_write("slow".to_string(), "body".to_string())
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    fx.cache.snapshot().await.unwrap();
    writer.await.unwrap().unwrap();

    assert!(version_lock_wait_ms_max() >= 200);
}

#[tokio::test]
async fn merge_conflict_keeps_previous_versions() {
    let fx = fixture().await;
    fx.cache.initialize().await.unwrap();
    fx.cache
        .apply_category_write("api".to_string(), "endpoints".to_string())
        .await
        .unwrap();
    let before = fx.cache.snapshot().await.unwrap();

    std::fs::write(
        &fx.config.versions_file,
        "{\n<<<<<<< HEAD\n\t\"x\": {}\n=======\n>>>>>>> branch\n}",
    )
    .unwrap();
    fx.cache.reload_from_disk().await.unwrap();

    assert_eq!(fx.cache.snapshot().await.unwrap(), before);
}

#[tokio::test]
async fn unparseable_ledger_falls_back_to_empty() {
    let fx = fixture().await;
    std::fs::write(&fx.config.versions_file, "{ this is not json").unwrap();

    fx.cache.initialize().await.unwrap();

    let snapshot = fx.cache.snapshot().await.unwrap();
    assert_eq!(snapshot.keys().collect::<Vec<_>>(), vec!["user"]);
    assert_artifacts_match(&fx.config, &snapshot);
}

#[tokio::test]
async fn path_escaping_names_are_rejected_before_writing() {
    let fx = fixture().await;
    fx.cache.initialize().await.unwrap();

    for name in ["../evil", "a/../../b", "summary", "", "a b"] {
        let err = fx
            .cache
            .apply_category_write(name.to_string(), "x".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidCategoryName(_)), "{name}");
    }
    assert_eq!(fx.sampler.calls(), 0);
    assert!(!fx.config.memory_dir.parent().unwrap().join("evil.md").exists());
}

#[tokio::test]
async fn dirty_marks_collapse_into_one_batch() {
    let fx = fixture().await;
    fx.cache.initialize().await.unwrap();
    for name in ["a", "b", "c"] {
        std::fs::write(fx.config.memory_dir.join(format!("{name}.md")), name).unwrap();
    }

    fx.cache.mark_dirty("a".to_string());
    fx.cache.mark_dirty("b".to_string());
    fx.cache.mark_dirty("c".to_string());
    fx.cache.mark_dirty("a".to_string());
    fx.cache.flush().await;

    assert_eq!(fx.sampler.calls(), 3);
    let snapshot = fx.cache.snapshot().await.unwrap();
    assert_eq!(snapshot.len(), 4);
    assert_artifacts_match(&fx.config, &snapshot);
}

#[tokio::test]
async fn rescan_picks_up_offline_edits() {
    let fx = fixture().await;
    std::fs::create_dir_all(fx.config.memory_dir.join("lang")).unwrap();
    std::fs::write(fx.config.memory_dir.join("lang/go.md"), "go").unwrap();
    fx.cache.initialize().await.unwrap();

    assert_eq!(fx.cache.rescan().await.unwrap(), 1);
    fx.cache.flush().await;

    let snapshot = fx.cache.snapshot().await.unwrap();
    assert_eq!(snapshot["lang/go"].description, "About lang/go");
}

#[tokio::test]
async fn closed_session_rejects_work() {
    let fx = fixture().await;
    fx.cache.initialize().await.unwrap();
    fx.session.close();

    let err = fx
        .cache
        .apply_category_write("api".to_string(), "x".to_string())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::SessionClosed));
    assert!(matches!(
        fx.cache.snapshot().await.unwrap_err(),
        StoreError::SessionClosed
    ));
    assert!(!fx.config.memory_dir.join("api.md").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn watcher_reconciles_external_edits() {
    let fx = fixture().await;
    fx.cache.initialize().await.unwrap();
    let _watch = fx.cache.watch().unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    std::fs::write(fx.config.memory_dir.join("notes.md"), "external edit").unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let snapshot = fx.cache.snapshot().await.unwrap();
        if snapshot.contains_key("notes") {
            assert_artifacts_match(&fx.config, &snapshot);
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "watcher never reconciled notes.md"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
