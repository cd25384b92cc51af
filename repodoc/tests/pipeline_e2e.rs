//! End-to-end pipeline runs against a SQLite status store, local storage and
//! a stand-in analysis service served over HTTP.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{Json, Router, http::StatusCode, routing::post};
use serde_json::{Value, json};
use tempfile::TempDir;

use repodoc::analysis::HttpAnalysisClient;
use repodoc::config::{LocalSettings, WorkerConfig};
use repodoc::database::models::JobStatus;
use repodoc::database::repositories::{SqlxJobRepository, SqlxTaskRepository};
use repodoc::database::{self, DbPool};
use repodoc::pipeline::stages::{JobPaths, RepositoryCloner};
use repodoc::pipeline::{
    JobOrchestrator, JobOutcome, OrchestratorDeps, StatusStore, SubmissionGateway, TaskQueue,
    WorkerPool,
};
use repodoc::storage::LocalStorage;
use repodoc::{Error, Result};

const BASE_URL: &str = "http://localhost:8000";

/// Writes a tiny project, refusing to clone over an existing directory.
struct FixtureCloner;

#[async_trait]
impl RepositoryCloner for FixtureCloner {
    async fn clone_repo(&self, _url: &str, dest: &Path) -> Result<()> {
        if dest.exists() {
            return Err(Error::Clone("destination path already exists".into()));
        }
        tokio::fs::create_dir_all(dest.join("src")).await?;
        tokio::fs::write(dest.join("src/main.py"), "print('hi')\n").await?;
        tokio::fs::write(dest.join("README.md"), "# fixture\n").await?;
        Ok(())
    }
}

/// Serve `router` on an ephemeral port and return its base URL.
async fn spawn_agent(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

async fn sqlite_pool(dir: &TempDir) -> DbPool {
    let db_path = dir.path().join("repodoc.db");
    let db_url = format!(
        "sqlite:{}?mode=rwc",
        db_path.to_string_lossy().replace('\\', "/")
    );
    let pool = database::init_pool(&db_url).await.unwrap();
    database::run_migrations(&pool).await.unwrap();
    pool
}

struct Fixture {
    dir: TempDir,
    status: Arc<StatusStore>,
    orchestrator: Arc<JobOrchestrator>,
}

impl Fixture {
    fn work_dir(&self) -> PathBuf {
        self.dir.path().join("work")
    }

    fn storage_dir(&self) -> PathBuf {
        self.dir.path().join("storage")
    }
}

async fn fixture(agent_url: &str) -> Fixture {
    let dir = TempDir::new().unwrap();
    let pool = sqlite_pool(&dir).await;
    let status = Arc::new(StatusStore::new(Arc::new(SqlxJobRepository::new(pool))));
    let storage = Arc::new(LocalStorage::new(&LocalSettings {
        storage_dir: dir.path().join("storage"),
        public_base_url: BASE_URL.to_string(),
    }));
    let analysis =
        Arc::new(HttpAnalysisClient::new(agent_url, Duration::from_secs(10)).unwrap());

    let orchestrator = Arc::new(JobOrchestrator::new(
        OrchestratorDeps {
            status: status.clone(),
            cloner: Arc::new(FixtureCloner),
            analysis,
            storage,
        },
        dir.path().join("work"),
        Duration::from_secs(10),
    ));

    Fixture {
        dir,
        status,
        orchestrator,
    }
}

fn read_archive(path: &Path) -> Vec<(String, String)> {
    let mut archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
    (0..archive.len())
        .map(|i| {
            let mut file = archive.by_index(i).unwrap();
            let mut body = String::new();
            file.read_to_string(&mut body).unwrap();
            (file.name().to_string(), body)
        })
        .collect()
}

fn stored_archive(f: &Fixture, download_url: &str) -> PathBuf {
    let name = download_url
        .strip_prefix(&format!("{BASE_URL}/files/"))
        .expect("local download URL");
    f.storage_dir().join(name)
}

#[tokio::test]
async fn documents_are_sanitized_packaged_and_stored() {
    let agent = spawn_agent(Router::new().route(
        "/analyze",
        post(|Json(body): Json<Value>| async move {
            assert!(body["repo_path"].as_str().unwrap().contains("repos"));
            Json(json!({
                "documents": {
                    "README.md": "# Overview",
                    "../../etc/passwd": "root:x",
                    "src/main.py": "entry point",
                }
            }))
        }),
    ))
    .await;
    let f = fixture(&agent).await;
    f.status
        .create("job-ok", "https://example.com/repo.git")
        .await
        .unwrap();

    let outcome = f
        .orchestrator
        .run("job-ok", "https://example.com/repo.git")
        .await
        .unwrap();
    let JobOutcome::Completed { download_url } = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert_eq!(download_url, format!("{BASE_URL}/files/docs_job-ok.zip"));

    let record = f.status.get("job-ok").await.unwrap();
    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(record.download_url.as_deref(), Some(download_url.as_str()));

    let entries = read_archive(&stored_archive(&f, &download_url));
    let names: Vec<&str> = entries.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(entries.len(), 3);
    for name in &names {
        assert!(!name.contains('/') && !name.contains(".."), "{name}");
    }
    assert!(names.contains(&"__etc_passwd.md"));
    assert!(names.contains(&"src_main.py.md"));

    // Nothing job-scoped is left behind in the work directory.
    for path in JobPaths::new(f.work_dir(), "job-ok").transient_paths() {
        assert!(!path.exists(), "{} survived", path.display());
    }
}

#[tokio::test]
async fn failing_agent_still_yields_a_document() {
    let agent = spawn_agent(Router::new().route(
        "/analyze",
        post(|| async {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "detail": "Agent analysis failed: model unavailable" })),
            )
        }),
    ))
    .await;
    let f = fixture(&agent).await;
    f.status
        .create("job-degraded", "https://example.com/repo.git")
        .await
        .unwrap();

    let outcome = f
        .orchestrator
        .run("job-degraded", "https://example.com/repo.git")
        .await
        .unwrap();
    let JobOutcome::Completed { download_url } = outcome else {
        panic!("expected completion, got {outcome:?}");
    };

    let entries = read_archive(&stored_archive(&f, &download_url));
    assert_eq!(entries.len(), 1);
    let (name, body) = &entries[0];
    assert_eq!(name, "README.md");
    assert!(body.starts_with("# Analysis Failed"));
    assert!(body.contains("model unavailable"));

    let logs = f.status.logs("job-degraded").await.unwrap();
    assert!(logs.iter().any(|l| l.level == "WARN"));
}

#[tokio::test]
async fn stale_snapshot_does_not_block_clone() {
    let agent = spawn_agent(Router::new().route(
        "/analyze",
        post(|| async { Json(json!({ "overview": "text" })) }),
    ))
    .await;
    let f = fixture(&agent).await;
    let snapshot = JobPaths::new(f.work_dir(), "job-stale").snapshot_dir();
    std::fs::create_dir_all(&snapshot).unwrap();
    std::fs::write(snapshot.join("leftover.txt"), "from a crashed run").unwrap();

    f.status
        .create("job-stale", "https://example.com/repo.git")
        .await
        .unwrap();
    let outcome = f
        .orchestrator
        .run("job-stale", "https://example.com/repo.git")
        .await
        .unwrap();
    assert!(matches!(outcome, JobOutcome::Completed { .. }), "{outcome:?}");
}

#[tokio::test]
async fn unreachable_agent_degrades_instead_of_failing() {
    // Nothing listens on this port.
    let f = fixture("http://127.0.0.1:9").await;
    f.status
        .create("job-offline", "https://example.com/repo.git")
        .await
        .unwrap();

    let outcome = f
        .orchestrator
        .run("job-offline", "https://example.com/repo.git")
        .await
        .unwrap();
    assert!(matches!(outcome, JobOutcome::Completed { .. }), "{outcome:?}");
}

#[tokio::test]
async fn submitted_job_completes_through_the_worker_pool() {
    let agent = spawn_agent(Router::new().route(
        "/analyze",
        post(|| async { Json(json!("plain markdown answer")) }),
    ))
    .await;
    let f = fixture(&agent).await;
    let pool = sqlite_pool(&f.dir).await;
    let queue = Arc::new(TaskQueue::new(Arc::new(SqlxTaskRepository::new(pool))));
    let gateway = SubmissionGateway::new(f.status.clone(), queue.clone());

    let workers = WorkerPool::new(WorkerConfig {
        concurrency: 2,
        poll_interval: Duration::from_millis(20),
        ..Default::default()
    });
    workers.start(queue.clone(), f.orchestrator.clone());

    let record = gateway
        .submit("https://example.com/repo.git")
        .await
        .unwrap();
    assert_eq!(record.status, JobStatus::Queued);

    let finished = tokio::time::timeout(Duration::from_secs(20), async {
        loop {
            let current = f.status.get(&record.job_id).await.unwrap();
            if current.status.is_terminal() {
                return current;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("job did not finish");

    assert_eq!(finished.status, JobStatus::Completed, "{}", finished.message);
    assert!(
        finished
            .download_url
            .as_deref()
            .unwrap()
            .starts_with(BASE_URL)
    );
    assert_eq!(queue.pending_count().await.unwrap(), 0);

    workers.stop().await;
}

#[tokio::test]
async fn invalid_submission_leaves_no_trace() {
    let dir = TempDir::new().unwrap();
    let pool = sqlite_pool(&dir).await;
    let status = Arc::new(StatusStore::new(Arc::new(SqlxJobRepository::new(
        pool.clone(),
    ))));
    let queue = Arc::new(TaskQueue::new(Arc::new(SqlxTaskRepository::new(
        pool.clone(),
    ))));
    let gateway = SubmissionGateway::new(status, queue.clone());

    let err = gateway.submit("not-a-url").await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let (jobs,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM job")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(jobs, 0);
    assert_eq!(queue.pending_count().await.unwrap(), 0);
}
