//! End-to-end sync scenarios against the in-memory remote

use bridge::{MemorySettings, SettingsStore, SyncBridge, SyncConfig, SyncError, SyncEvent};
use bytes::Bytes;
use queue::TaskQueue;
use remote::{Credentials, MemoryRepos};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::sleep;
use vfs_core::{LocalStore, MutationEvent, NodeKind, ResourceKey, VirtualStore};

const REPO: &str = "acme/site";
const TOKEN: &str = "secret";

struct Harness {
    bridge: SyncBridge,
    local: Arc<VirtualStore>,
    repos: MemoryRepos,
    settings: MemorySettings,
    events: broadcast::Receiver<SyncEvent>,
}

impl Harness {
    fn new() -> Self {
        let repos = MemoryRepos::new();
        repos.create_repo(REPO, Some(TOKEN));
        repos.seed(
            REPO,
            "main",
            [("README.md", "# site"), ("a.txt", ""), ("docs/a.md", "A")],
        );
        repos.seed(REPO, "dev", [("README.md", "# dev")]);

        let local = Arc::new(VirtualStore::new());
        let settings = MemorySettings::new();
        let config = SyncConfig::default();
        let queue = TaskQueue::new(config.queue_config());
        let bridge = SyncBridge::new(
            config,
            queue,
            local.clone(),
            Arc::new(settings.clone()),
            Arc::new(repos.clone()),
        )
        .unwrap();
        let events = bridge.subscribe();
        bridge.listen(local.subscribe());

        Self {
            bridge,
            local,
            repos,
            settings,
            events,
        }
    }

    async fn connect(&self) -> usize {
        self.bridge
            .connect(REPO, Credentials::token(TOKEN), "main")
            .await
            .unwrap()
    }

    /// Let debounce windows close and the queue drain
    async fn settle(&self) {
        sleep(Duration::from_secs(3)).await;
        self.bridge.queue().wait_idle().await;
        sleep(Duration::from_millis(10)).await;
    }

    fn drain_events(&mut self) -> Vec<SyncEvent> {
        let mut seen = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            seen.push(event);
        }
        seen
    }

    fn remote(&self, path: &str) -> Option<Bytes> {
        self.repos.file(REPO, "main", path)
    }

    fn commit_messages(&self) -> Vec<String> {
        self.repos
            .commits(REPO)
            .into_iter()
            .map(|c| c.message)
            .collect()
    }
}

#[tokio::test(start_paused = true)]
async fn test_connect_mirrors_clone_locally() {
    let mut h = Harness::new();
    h.local.create_file("stale.txt", "left over").unwrap();

    assert_eq!(h.connect().await, 3);
    assert!(h.bridge.is_ready());
    assert_eq!(h.local.read("README.md").unwrap(), Bytes::from("# site"));
    assert_eq!(h.local.read("docs/a.md").unwrap(), Bytes::from("A"));
    assert!(!h.local.exists("stale.txt"));

    let saved = h.settings.load().unwrap().unwrap();
    assert_eq!(saved.repo, REPO);
    assert_eq!(saved.branch, "main");
    assert_eq!(h.bridge.branches(), vec!["dev", "main"]);

    let events = h.drain_events();
    assert!(events.contains(&SyncEvent::Ready));
    assert!(events.contains(&SyncEvent::BranchesAvailable(vec![
        "dev".to_string(),
        "main".to_string()
    ])));
    assert!(events
        .iter()
        .any(|e| matches!(e, SyncEvent::CloneProgress(_))));
}

#[tokio::test(start_paused = true)]
async fn test_burst_of_commits_coalesces_into_one() {
    let h = Harness::new();
    h.connect().await;

    h.bridge.schedule_commit("a.txt", "hello");
    sleep(Duration::from_millis(500)).await;
    h.bridge.schedule_commit("a.txt", "hello world");
    h.settle().await;

    assert_eq!(h.commit_messages(), vec!["Update a.txt"]);
    assert_eq!(h.remote("a.txt"), Some(Bytes::from("hello world")));
}

#[tokio::test(start_paused = true)]
async fn test_local_edits_flow_through_debounce() {
    let h = Harness::new();
    h.connect().await;

    for text in ["# s", "# si", "# sit", "# site!"] {
        h.local.write_file("README.md", text).unwrap();
        sleep(Duration::from_millis(300)).await;
    }
    assert!(h.repos.commits(REPO).is_empty());
    h.settle().await;

    assert_eq!(h.commit_messages(), vec!["Update README.md"]);
    assert_eq!(h.remote("README.md"), Some(Bytes::from("# site!")));
}

#[tokio::test(start_paused = true)]
async fn test_unchanged_content_is_not_committed() {
    let h = Harness::new();
    h.connect().await;

    h.bridge.schedule_commit("README.md", "# site");
    h.settle().await;

    assert!(h.repos.commits(REPO).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_keeps_task_queued_until_retry() {
    let mut h = Harness::new();
    h.connect().await;
    h.drain_events();

    h.repos.throttle_next(REPO, Duration::from_secs(120));
    h.bridge.schedule_commit("a.txt", "hello world");
    sleep(Duration::from_millis(2100)).await;
    h.bridge.schedule_remove("README.md");

    let events = h.drain_events();
    let limited = events
        .iter()
        .find_map(|e| match e {
            SyncEvent::RateLimited {
                retry_after,
                message,
            } => Some((*retry_after, message.clone())),
            _ => None,
        })
        .expect("rate-limited event");
    assert_eq!(limited.0, Duration::from_secs(120));
    assert!(limited.1.contains("2 minutes"), "{}", limited.1);
    assert!(h.bridge.rate_limit_remaining().is_some());

    // Nothing moves past the throttled commit while the adapter waits
    sleep(Duration::from_secs(60)).await;
    assert!(h.repos.commits(REPO).is_empty());
    assert!(h.remote("README.md").is_some());
    assert!(h.bridge.queue().is_draining());

    h.settle().await;
    assert_eq!(
        h.commit_messages(),
        vec!["Update a.txt", "Remove README.md"]
    );
    assert_eq!(h.remote("a.txt"), Some(Bytes::from("hello world")));
    assert_eq!(h.remote("README.md"), None);
    assert_eq!(h.bridge.rate_limit_remaining(), None);
}

#[tokio::test(start_paused = true)]
async fn test_delete_cancels_pending_edit() {
    let h = Harness::new();
    h.connect().await;

    h.local.write_file("README.md", "# edited").unwrap();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(h.bridge.pending_edits(), 1);

    h.local.delete("README.md").unwrap();
    h.settle().await;

    assert_eq!(h.commit_messages(), vec!["Remove README.md"]);
    assert_eq!(h.remote("README.md"), None);
}

#[tokio::test(start_paused = true)]
async fn test_create_edit_delete_leaves_nothing_behind() {
    let h = Harness::new();
    h.connect().await;

    h.local.create_file("scratch.txt", "one").unwrap();
    h.local.write_file("scratch.txt", "two").unwrap();
    h.local.delete("scratch.txt").unwrap();
    h.settle().await;

    assert_eq!(h.remote("scratch.txt"), None);
    assert_eq!(
        h.commit_messages(),
        vec!["Update scratch.txt", "Remove scratch.txt"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_folder_move_reissues_pending_edits() {
    let h = Harness::new();
    h.connect().await;

    h.local.write_file("docs/a.md", "A2").unwrap();
    sleep(Duration::from_millis(100)).await;
    h.local.rename("docs", "guides").unwrap();
    h.settle().await;

    assert_eq!(h.remote("docs/a.md"), None);
    assert_eq!(h.remote("guides/a.md"), Some(Bytes::from("A2")));
    assert_eq!(
        h.commit_messages(),
        vec!["Rename docs to guides", "Update guides/a.md"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_file_move_carries_content() {
    let h = Harness::new();
    h.connect().await;

    h.local.write_file("a.txt", "moved text").unwrap();
    h.local.rename("a.txt", "b.txt").unwrap();
    h.settle().await;

    assert_eq!(h.remote("a.txt"), None);
    assert_eq!(h.remote("b.txt"), Some(Bytes::from("moved text")));
    assert_eq!(h.commit_messages(), vec!["Rename a.txt to b.txt"]);
}

#[tokio::test(start_paused = true)]
async fn test_move_onto_pending_edit_keeps_moved_content() {
    let h = Harness::new();
    h.connect().await;

    h.local.write_file("a.txt", "A").unwrap();
    h.bridge.schedule_commit("b.txt", "B2");
    h.local.rename("a.txt", "b.txt").unwrap();
    h.settle().await;

    assert_eq!(h.remote("a.txt"), None);
    assert_eq!(h.remote("b.txt"), Some(Bytes::from("A")));
    assert_eq!(h.commit_messages(), vec!["Rename a.txt to b.txt"]);
}

#[tokio::test(start_paused = true)]
async fn test_folder_moved_out_of_ignored_path_is_committed() {
    let h = Harness::new();
    h.connect().await;

    h.local.create_file("target/keep.txt", "precious").unwrap();
    h.settle().await;
    assert!(h.repos.commits(REPO).is_empty());

    h.local.rename("target", "out").unwrap();
    h.settle().await;

    assert_eq!(h.remote("out/keep.txt"), Some(Bytes::from("precious")));
    assert_eq!(h.commit_messages(), vec!["Update out/keep.txt"]);
}

#[tokio::test(start_paused = true)]
async fn test_populated_folder_arriving_commits_its_files() {
    let h = Harness::new();
    h.connect().await;

    // Files land without per-file notifications, as when a folder is
    // moved into the watched directory
    let mut files = h.local.files_under(&ResourceKey::root()).unwrap();
    files.push((ResourceKey::new("site/index.html"), Bytes::from("<h1>")));
    files.push((ResourceKey::new("site/css/main.css"), Bytes::from("body{}")));
    h.local.replace_all(files).unwrap();

    h.bridge.handle_mutation(MutationEvent::Created {
        key: ResourceKey::new("site"),
        kind: NodeKind::Folder,
        content: Bytes::new(),
    });
    h.settle().await;

    assert_eq!(h.remote("site/index.html"), Some(Bytes::from("<h1>")));
    assert_eq!(h.remote("site/css/main.css"), Some(Bytes::from("body{}")));
    assert_eq!(
        h.commit_messages(),
        vec!["Update site/css/main.css", "Update site/index.html"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_busy_queue_reports_syncing() {
    let mut h = Harness::new();
    h.connect().await;
    h.drain_events();

    for i in 0..5 {
        h.local
            .create_file(format!("notes/{}.txt", i), format!("note {}", i))
            .unwrap();
    }
    h.settle().await;

    let syncing: Vec<SyncEvent> = h
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, SyncEvent::SyncingStarted | SyncEvent::SyncingFinished))
        .collect();
    assert_eq!(
        syncing,
        vec![SyncEvent::SyncingStarted, SyncEvent::SyncingFinished]
    );
    assert_eq!(h.repos.commits(REPO).len(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_bad_credentials_are_explained() {
    let mut h = Harness::new();

    let err = h
        .bridge
        .connect(REPO, Credentials::token("wrong"), "main")
        .await
        .unwrap_err();
    let SyncError::Connect(message) = err else {
        panic!("expected connect error");
    };
    assert!(message.starts_with("Authentication failed"), "{}", message);
    assert!(!h.bridge.is_ready());
    assert!(h.bridge.connection().is_none());
    assert_eq!(h.settings.load().unwrap(), None);

    sleep(Duration::from_millis(10)).await;
    let events = h.drain_events();
    assert!(events.contains(&SyncEvent::Error { message }));
    assert!(!events.contains(&SyncEvent::Ready));
}

#[tokio::test(start_paused = true)]
async fn test_missing_repository_is_explained() {
    let h = Harness::new();
    let err = h
        .bridge
        .connect("acme/nowhere", Credentials::token(TOKEN), "main")
        .await
        .unwrap_err();
    assert!(err.to_string().starts_with("Repository not found"), "{}", err);
}

#[tokio::test(start_paused = true)]
async fn test_work_before_ready_waits_for_connection() {
    let h = Harness::new();
    h.bridge.schedule_remove("docs");
    sleep(Duration::from_secs(10)).await;

    assert!(h.bridge.queue().is_draining());
    assert!(h.repos.commits(REPO).is_empty());

    h.connect().await;
    h.settle().await;
    assert_eq!(h.commit_messages(), vec!["Remove docs"]);
    assert_eq!(h.remote("docs/a.md"), None);
}

#[tokio::test(start_paused = true)]
async fn test_failed_connect_keeps_queued_work() {
    let h = Harness::new();
    h.bridge.schedule_remove("docs");

    assert!(h
        .bridge
        .connect(REPO, Credentials::token("wrong"), "main")
        .await
        .is_err());
    h.connect().await;
    h.settle().await;

    assert_eq!(h.commit_messages(), vec!["Remove docs"]);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_drops_work_and_optionally_settings() {
    let h = Harness::new();
    h.connect().await;

    h.bridge.schedule_commit("a.txt", "never sent");
    h.bridge.disconnect(false).unwrap();
    assert_eq!(h.bridge.pending_edits(), 0);
    assert!(!h.bridge.is_ready());
    assert!(h.settings.load().unwrap().is_some());

    // Queued while disconnected, then dropped by the next teardown
    h.bridge.schedule_remove("README.md");
    h.bridge.disconnect(true).unwrap();
    assert_eq!(h.settings.load().unwrap(), None);
    h.settle().await;

    assert!(h.repos.commits(REPO).is_empty());
    assert!(matches!(
        h.bridge.resume().await,
        Err(SyncError::NoSavedConnection)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_resume_reconnects_from_saved_settings() {
    let h = Harness::new();
    h.connect().await;
    h.bridge.disconnect(false).unwrap();
    assert!(h.bridge.connection().is_none());

    assert_eq!(h.bridge.resume().await.unwrap(), 3);
    assert!(h.bridge.is_ready());
    assert_eq!(h.bridge.connection().unwrap().repo, REPO);
}

#[tokio::test(start_paused = true)]
async fn test_switch_branch_reclones() {
    let h = Harness::new();
    h.connect().await;

    assert_eq!(h.bridge.switch_branch("dev").await.unwrap(), 1);
    assert_eq!(h.local.read("README.md").unwrap(), Bytes::from("# dev"));
    assert!(!h.local.exists("docs/a.md"));
    assert_eq!(h.bridge.connection().unwrap().branch, "dev");
    assert_eq!(h.settings.load().unwrap().unwrap().branch, "dev");

    h.local.write_file("README.md", "# dev 2").unwrap();
    h.settle().await;
    assert_eq!(
        h.repos.file(REPO, "dev", "README.md"),
        Some(Bytes::from("# dev 2"))
    );
    assert_eq!(h.remote("README.md"), Some(Bytes::from("# site")));
}

#[tokio::test(start_paused = true)]
async fn test_remote_failure_does_not_block_queue() {
    let mut h = Harness::new();
    h.connect().await;
    h.drain_events();

    h.repos.fail_next(REPO, "non-fast-forward");
    h.local.create_file("first.txt", "1").unwrap();
    h.local.create_file("second.txt", "2").unwrap();
    h.settle().await;

    assert_eq!(h.remote("first.txt"), None);
    assert_eq!(h.remote("second.txt"), Some(Bytes::from("2")));
    assert_eq!(h.bridge.queue().failed(), 1);
    assert!(h
        .drain_events()
        .iter()
        .any(|e| matches!(e, SyncEvent::Error { message } if message.contains("non-fast-forward"))));
}
