//! End-to-end tests for the sync engine.
//!
//! Drives the orchestrator against `InMemoryFs` and `InMemoryPageClient`:
//! classification, ordering, recovery, divergence and persistence.

use std::sync::Arc;

use page_sync_core::diagram::InMemoryRenderer;
use page_sync_core::metadata::METADATA_FILE;
use page_sync_core::recovery::replacement_title;
use page_sync_core::{
    DivergenceKind, FileSystem, InMemoryFs, InMemoryPageClient, MarkdownConverter, MetadataStore,
    Orchestrator, Severity, SyncError, SyncOptions, SyncSettings, SyncStatus,
};

type TestOrchestrator = Orchestrator<Arc<InMemoryFs>, Arc<InMemoryPageClient>>;

// ============================================================================
// Helpers
// ============================================================================

struct Harness {
    fs: Arc<InMemoryFs>,
    client: Arc<InMemoryPageClient>,
    orchestrator: TestOrchestrator,
}

impl Harness {
    fn new(settings: SyncSettings) -> Self {
        let fs = Arc::new(InMemoryFs::new());
        let client = Arc::new(InMemoryPageClient::new());
        let orchestrator = Orchestrator::new(
            fs.clone(),
            client.clone(),
            Box::new(MarkdownConverter::new()),
            settings,
        );
        Self {
            fs,
            client,
            orchestrator,
        }
    }

    /// Sync root with `README.md` ("Project") and `docs/guide.md` ("Guide").
    async fn project() -> Self {
        let harness = Self::new(SyncSettings::new("DOC"));
        harness.write("README.md", "# Project\n\nWelcome.\n").await;
        harness.write("docs/guide.md", "# Guide\n\nSteps.\n").await;
        harness
    }

    async fn write(&self, path: &str, content: &str) {
        self.fs
            .write(path, content.as_bytes())
            .await
            .expect("Failed to write file");
    }

    async fn sync(&self) -> page_sync_core::SyncSummary {
        self.orchestrator
            .run(&forced(), |_| panic!("Forced runs must not prompt"))
            .await
            .expect("Sync failed")
    }

    fn page_id(&self, title: &str) -> String {
        self.client
            .page_by_title("DOC", title)
            .unwrap_or_else(|| panic!("No page titled {}", title))
            .id
    }
}

fn forced() -> SyncOptions {
    SyncOptions {
        force: true,
        ..SyncOptions::default()
    }
}

fn dry_run() -> SyncOptions {
    SyncOptions {
        dry_run: true,
        ..SyncOptions::default()
    }
}

// ============================================================================
// Classification
// ============================================================================

#[tokio::test]
async fn test_first_sync_of_project() {
    let harness = Harness::project().await;

    let plan = harness.orchestrator.plan(&SyncOptions::default()).await.unwrap();
    let new_files = plan.files.iter().filter(|f| f.status == SyncStatus::New).count();
    assert_eq!(new_files, 2);
    assert_eq!(plan.directories.len(), 1);
    assert_eq!(plan.directories[0].title, "Docs");
    assert_eq!(plan.directories[0].status, SyncStatus::New);

    let summary = harness.sync().await;
    assert!(summary.is_success());
    assert_eq!(summary.created, 3);

    let metadata = MetadataStore::new(&harness.fs)
        .load()
        .await
        .unwrap()
        .expect("Metadata should be persisted");
    assert_eq!(metadata.files.len() + metadata.directories.len(), 3);
    assert!(metadata.last_sync.is_some());

    let plan = harness.orchestrator.plan(&dry_run()).await.unwrap();
    assert_eq!(plan.count(SyncStatus::New), 0);
    assert_eq!(plan.count(SyncStatus::Changed), 0);
    assert_eq!(plan.count(SyncStatus::UpToDate), 3);
}

#[tokio::test]
async fn test_forced_rerun_writes_nothing() {
    let harness = Harness::project().await;
    harness.sync().await;
    harness.client.reset_calls();

    let summary = harness.sync().await;

    assert_eq!(harness.client.calls().writes(), 0);
    assert_eq!(summary.written(), 0);
    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.unchanged, 1);
}

#[tokio::test]
async fn test_single_byte_change_is_changed() {
    let harness = Harness::project().await;
    harness.sync().await;

    harness.write("docs/guide.md", "# Guide\n\nSteps!\n").await;
    let plan = harness.orchestrator.plan(&SyncOptions::default()).await.unwrap();

    let guide = plan.files.iter().find(|f| f.path == "docs/guide.md").unwrap();
    assert_eq!(guide.status, SyncStatus::Changed);
    let readme = plan.files.iter().find(|f| f.path == "README.md").unwrap();
    assert_eq!(readme.status, SyncStatus::UpToDate);
    assert_eq!(plan.directories[0].status, SyncStatus::Changed);
}

#[tokio::test]
async fn test_newer_mtime_is_changed() {
    let harness = Harness::project().await;
    harness.sync().await;

    let stat = harness.fs.stat("README.md").await.unwrap();
    harness.fs.set_mtime("README.md", stat.mtime_millis + 60_000);
    let plan = harness.orchestrator.plan(&SyncOptions::default()).await.unwrap();

    let readme = plan.files.iter().find(|f| f.path == "README.md").unwrap();
    assert_eq!(readme.status, SyncStatus::Changed);
}

#[tokio::test]
async fn test_remotely_deleted_page_is_new_again() {
    let harness = Harness::project().await;
    harness.sync().await;

    harness.client.delete_page(&harness.page_id("Project"));
    let plan = harness.orchestrator.plan(&SyncOptions::default()).await.unwrap();

    let readme = plan.files.iter().find(|f| f.path == "README.md").unwrap();
    assert_eq!(readme.status, SyncStatus::New);
}

#[tokio::test]
async fn test_lookup_failure_degrades_to_changed() {
    let harness = Harness::project().await;
    harness.sync().await;

    harness.client.fail_lookups(true);
    let plan = harness
        .orchestrator
        .plan(&SyncOptions::default())
        .await
        .expect("Lookup failures must not abort planning");

    assert_eq!(plan.count(SyncStatus::Changed), 3);
}

#[tokio::test]
async fn test_no_cache_reclassifies_everything() {
    let harness = Harness::project().await;
    harness.sync().await;

    let options = SyncOptions {
        no_cache: true,
        ..dry_run()
    };
    let plan = harness.orchestrator.plan(&options).await.unwrap();
    assert_eq!(plan.count(SyncStatus::New), 3);
}

// ============================================================================
// Ordering
// ============================================================================

#[tokio::test]
async fn test_directories_precede_their_documents() {
    let harness = Harness::project().await;
    harness.write("docs/api/reference.md", "# Reference\n").await;
    harness.write("docs/api/v2/changes.md", "# Changes\n").await;

    let summary = harness.sync().await;
    assert!(summary.is_success(), "failures: {:?}", summary.failures);

    let docs = harness.page_id("Docs");
    let api = harness.page_id("Api");
    let v2 = harness.page_id("V2");
    let parent = |title: &str| harness.client.page_by_title("DOC", title).unwrap().parent_id;

    assert_eq!(parent("Docs"), None);
    assert_eq!(parent("Project"), None);
    assert_eq!(parent("Guide"), Some(docs.clone()));
    assert_eq!(parent("Api"), Some(docs));
    assert_eq!(parent("Reference"), Some(api.clone()));
    assert_eq!(parent("V2"), Some(api));
    assert_eq!(parent("Changes"), Some(v2));
}

#[tokio::test]
async fn test_preview_tree_nests_documents() {
    let harness = Harness::project().await;
    let plan = harness.orchestrator.plan(&dry_run()).await.unwrap();

    let roots: Vec<_> = plan.tree.iter().map(|n| n.path.as_str()).collect();
    assert_eq!(roots, vec!["docs", "README.md"]);
    assert_eq!(plan.tree[0].children[0].path, "docs/guide.md");
    assert_eq!(plan.tree[0].children[0].level, 1);
}

// ============================================================================
// Recovery
// ============================================================================

#[tokio::test]
async fn test_forbidden_page_is_replaced_once() {
    let harness = Harness::project().await;
    harness.sync().await;
    let original = harness.page_id("Guide");
    harness.client.mark_forbidden(&original);
    let pages_before = harness.client.pages().len();

    harness.write("docs/guide.md", "# Guide\n\nRevised.\n").await;
    let summary = harness.sync().await;

    assert!(summary.is_success(), "failures: {:?}", summary.failures);
    assert_eq!(summary.recreated, 1);
    assert_eq!(harness.client.pages().len(), pages_before + 1);

    let metadata = MetadataStore::new(&harness.fs).load().await.unwrap().unwrap();
    let record = metadata.file("docs/guide.md").unwrap();
    let replacement = record.page_id.clone().expect("Record should reference the replacement");
    assert_ne!(replacement, original);
    let page = harness.client.page(&replacement).unwrap();
    assert!(page.title.starts_with("Guide (replaced "));
    assert_eq!(page.parent_id, Some(harness.page_id("Docs")));
}

#[tokio::test]
async fn test_replacement_keeps_its_title_on_later_edits() {
    let harness = Harness::project().await;
    harness.sync().await;
    harness.client.mark_forbidden(&harness.page_id("Guide"));
    harness.write("docs/guide.md", "# Guide\n\nRevised.\n").await;
    harness.sync().await;

    let metadata = MetadataStore::new(&harness.fs).load().await.unwrap().unwrap();
    let replacement = metadata.file("docs/guide.md").unwrap().page_id.clone().unwrap();
    let replacement_title = harness.client.page(&replacement).unwrap().title;

    harness.write("docs/guide.md", "# Guide\n\nRevised again.\n").await;
    let summary = harness.sync().await;

    assert!(summary.is_success(), "failures: {:?}", summary.failures);
    assert_eq!(summary.updated, 1);
    assert_eq!(summary.recreated, 0);
    let page = harness.client.page(&replacement).unwrap();
    assert_eq!(page.title, replacement_title);

    let plan = harness.orchestrator.plan(&dry_run()).await.unwrap();
    assert!(
        plan.divergences.iter().all(|d| d.local_path != "docs/guide.md"),
        "unexpected: {:?}",
        plan.divergences
    );
}

#[tokio::test]
async fn test_recovery_gives_up_after_second_collision() {
    let harness = Harness::project().await;
    harness.sync().await;
    let original = harness.page_id("Guide");
    harness.client.mark_forbidden(&original);

    let now = chrono::Utc::now();
    for offset in 0..10 {
        let title = replacement_title("Guide", now + chrono::Duration::seconds(offset));
        harness.client.seed_page("DOC", &title, None);
    }

    harness.write("docs/guide.md", "# Guide\n\nRevised.\n").await;
    let summary = harness.sync().await;

    assert_eq!(summary.errors, 1);
    assert_eq!(summary.failures[0].path, "docs/guide.md");
    assert!(summary.failures[0].message.contains("both taken"));

    // The dead identifier is not retried by later runs
    let metadata = MetadataStore::new(&harness.fs).load().await.unwrap().unwrap();
    assert_eq!(metadata.file("docs/guide.md").unwrap().page_id, None);
}

// ============================================================================
// Divergence
// ============================================================================

#[tokio::test]
async fn test_remote_rename_is_reported() {
    let harness = Harness::project().await;
    harness.sync().await;
    harness
        .client
        .rename_page(&harness.page_id("Project"), "Project Home");

    let plan = harness.orchestrator.plan(&dry_run()).await.unwrap();

    let detection = plan
        .divergences
        .iter()
        .find(|d| d.local_path == "README.md")
        .expect("Rename should be detected");
    assert_eq!(detection.kind, DivergenceKind::RemoteRename);
    assert_eq!(detection.cached_title, "Project");
    assert_eq!(detection.actual_title.as_deref(), Some("Project Home"));
}

#[tokio::test]
async fn test_remotely_renamed_page_is_kept() {
    let harness = Harness::project().await;
    harness.sync().await;
    let page_id = harness.page_id("Project");
    harness.client.rename_page(&page_id, "Project Home");

    harness.client.reset_calls();
    let summary = harness.sync().await;
    assert!(summary.is_success(), "failures: {:?}", summary.failures);
    assert_eq!(harness.client.calls().creates, 0);
    assert_eq!(harness.client.page(&page_id).unwrap().title, "Project Home");

    // Reported once, then adopted
    let plan = harness.orchestrator.plan(&dry_run()).await.unwrap();
    assert!(plan.divergences.is_empty(), "unexpected: {:?}", plan.divergences);

    harness.write("README.md", "# Project\n\nWelcome back.\n").await;
    harness.sync().await;
    assert_eq!(harness.client.calls().creates, 0);
    assert_eq!(harness.client.page(&page_id).unwrap().title, "Project Home");
}

#[tokio::test]
async fn test_local_rename_is_reported_and_applied() {
    let harness = Harness::project().await;
    harness.sync().await;
    let page_id = harness.page_id("Project");

    harness.write("README.md", "# Project Overview\n\nWelcome.\n").await;
    let plan = harness.orchestrator.plan(&dry_run()).await.unwrap();
    let detection = plan
        .divergences
        .iter()
        .find(|d| d.local_path == "README.md")
        .expect("Rename should be detected");
    assert_eq!(detection.kind, DivergenceKind::LocalRename);

    harness.sync().await;
    assert_eq!(harness.client.page(&page_id).unwrap().title, "Project Overview");
}

#[tokio::test]
async fn test_removed_directory_with_live_children_is_critical() {
    let harness = Harness::project().await;
    harness.sync().await;

    harness.fs.delete("docs/guide.md").await.unwrap();
    harness.client.reset_calls();
    let plan = harness.orchestrator.plan(&dry_run()).await.unwrap();

    let docs = plan
        .divergences
        .iter()
        .find(|d| d.local_path == "docs")
        .expect("Directory orphan should be reported");
    assert_eq!(docs.kind, DivergenceKind::Orphaned);
    assert_eq!(docs.severity, Severity::Critical);
    let guide = plan
        .divergences
        .iter()
        .find(|d| d.local_path == "docs/guide.md")
        .expect("File orphan should be reported");
    assert_eq!(guide.severity, Severity::Warning);
    assert_eq!(harness.client.calls().writes(), 0);
}

// ============================================================================
// Run control
// ============================================================================

#[tokio::test]
async fn test_dry_run_makes_no_writes() {
    let harness = Harness::project().await;

    let summary = harness
        .orchestrator
        .run(&dry_run(), |_| panic!("Dry runs must not prompt"))
        .await
        .unwrap();

    assert!(summary.dry_run);
    assert_eq!(harness.client.calls().writes(), 0);
    assert!(!harness.fs.exists(METADATA_FILE).await.unwrap());
}

#[tokio::test]
async fn test_declined_confirmation_cancels() {
    let harness = Harness::project().await;

    let mut prompted = false;
    let summary = harness
        .orchestrator
        .run(&SyncOptions::default(), |plan| {
            prompted = true;
            assert!(plan.needs_sync());
            false
        })
        .await
        .unwrap();

    assert!(prompted);
    assert!(summary.cancelled);
    assert_eq!(harness.client.calls().writes(), 0);
    assert!(!harness.fs.exists(METADATA_FILE).await.unwrap());
}

#[tokio::test]
async fn test_corrupt_cache_is_fatal() {
    let harness = Harness::project().await;
    harness.write(METADATA_FILE, "{ broken").await;

    let err = harness.orchestrator.run(&forced(), |_| true).await.unwrap_err();

    assert!(matches!(err, SyncError::Metadata(_)));
    assert_eq!(harness.client.calls().writes(), 0);
}

#[tokio::test]
async fn test_unreadable_document_does_not_stop_the_run() {
    let harness = Harness::project().await;
    harness
        .fs
        .write("docs/broken.md", &[0xff, 0xfe, 0x00])
        .await
        .unwrap();

    let summary = harness.sync().await;

    assert_eq!(summary.errors, 1);
    assert_eq!(summary.failures[0].path, "docs/broken.md");
    assert_eq!(summary.created, 3);
}

#[tokio::test]
async fn test_unreadable_synced_document_is_not_orphaned() {
    let harness = Harness::project().await;
    harness.sync().await;
    harness
        .fs
        .write("docs/guide.md", &[0xff, 0xfe, 0x00])
        .await
        .unwrap();

    let plan = harness.orchestrator.plan(&dry_run()).await.unwrap();

    assert_eq!(plan.failures.len(), 1);
    assert_eq!(plan.failures[0].path, "docs/guide.md");
    assert!(
        plan.divergences
            .iter()
            .all(|d| d.kind != DivergenceKind::Orphaned),
        "unexpected: {:?}",
        plan.divergences
    );

    // The record survives a run so the page is reused once the file is fixed
    harness.sync().await;
    let metadata = MetadataStore::new(&harness.fs).load().await.unwrap().unwrap();
    assert!(metadata.file("docs/guide.md").is_some());
}

// ============================================================================
// Diagrams
// ============================================================================

fn diagram_settings() -> SyncSettings {
    SyncSettings {
        diagrams_enabled: true,
        ..SyncSettings::new("DOC")
    }
}

const FLOW: &str = "# Flow\n\n```mermaid\ngraph TD\nA-->B\n```\n";

#[tokio::test]
async fn test_unavailable_renderer_is_fatal_before_writes() {
    let mut harness = Harness::new(diagram_settings());
    harness.orchestrator = harness
        .orchestrator
        .with_renderer(Box::new(InMemoryRenderer::unavailable()));
    harness.write("README.md", "# Project\n").await;
    harness.write("docs/flow.md", FLOW).await;

    let err = harness.orchestrator.run(&forced(), |_| true).await.unwrap_err();

    assert!(matches!(err, SyncError::Diagram(_)));
    assert_eq!(harness.client.calls().writes(), 0);
}

#[tokio::test]
async fn test_missing_renderer_is_fatal_before_writes() {
    let harness = Harness::new(diagram_settings());
    harness.write("docs/flow.md", FLOW).await;

    let err = harness.orchestrator.run(&forced(), |_| true).await.unwrap_err();

    assert!(matches!(err, SyncError::RendererMissing));
    assert_eq!(harness.client.calls().writes(), 0);
}

#[tokio::test]
async fn test_diagrams_are_embedded_after_upload() {
    let mut harness = Harness::new(diagram_settings());
    harness.orchestrator = harness
        .orchestrator
        .with_renderer(Box::new(InMemoryRenderer::new()));
    harness.write("docs/flow.md", FLOW).await;

    let summary = harness.sync().await;
    assert!(summary.is_success(), "failures: {:?}", summary.failures);

    let page_id = harness.page_id("Flow");
    let attachments = harness.client.attachments();
    assert_eq!(attachments.len(), 1);
    assert_eq!(attachments[0].page_id, page_id);
    let content = harness.client.content(&page_id).unwrap();
    assert!(content.contains(&attachments[0].file_name));
}
