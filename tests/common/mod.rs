#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use drop_intake::core::config::Config;
use drop_intake::daemon::loop_main::{IntakeWatcher, ScanReport};
use drop_intake::db::IntakeDb;
use drop_intake::storage::object_store::ObjectStore;

pub const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_intake") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "intake.exe" } else { "intake" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve intake binary path for integration test"),
    }
}

/// Run the CLI and keep a transcript under the temp dir for post-mortems.
pub fn run_cli_case(case_name: &str, args: &[&str]) -> CmdResult {
    let root = std::env::temp_dir().join("intake-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let output = Command::new(&bin_path)
        .args(args)
        .env("INTAKE_OUTPUT_FORMAT", "json")
        .env("RUST_BACKTRACE", "1")
        .output()
        .expect("execute intake command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

/// A throwaway inbox, database, object store and log directory.
pub struct Inbox {
    pub dir: tempfile::TempDir,
    pub config: Config,
}

impl Inbox {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let base = dir.path();
        let mut config = Config::default();
        config.watcher.inbox_root = base.join("inbox");
        config.watcher.scan_interval_secs = 1;
        config.watcher.file_stable_secs = 0;
        config.watcher.max_concurrency = 4;
        config.watcher.max_file_bytes = 1024 * 1024;
        config.snapshot.backoff_ms = 0;
        config.snapshot.object_store_root = base.join("objects");
        config.paths.config_file = base.join("intake.toml");
        config.paths.database = base.join("intake.sqlite3");
        config.paths.activity_log = base.join("activity.jsonl");
        config.paths.metrics_file = base.join("metrics.json");
        fs::create_dir_all(&config.watcher.inbox_root).expect("create inbox");
        IntakeDb::initialize(&config.paths.database).expect("init db");
        Self { dir, config }
    }

    pub fn root(&self) -> &Path {
        &self.config.watcher.inbox_root
    }

    pub fn db(&self) -> IntakeDb {
        IntakeDb::open(&self.config.paths.database).expect("open db")
    }

    pub fn seed_tenant(&self, slug: &str) {
        self.db().insert_tenant(slug, None).expect("insert tenant");
    }

    /// Create a case owned by `tenant` (or unassigned) and return its id.
    pub fn seed_case(&self, tenant: Option<&str>) -> String {
        self.db().insert_case(tenant, None).expect("insert case").id
    }

    /// Write `body` at `rel` under the inbox, creating parents.
    pub fn drop_file(&self, rel: &str, body: &[u8]) -> PathBuf {
        let path = self.root().join(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("create drop dir");
        fs::write(&path, body).expect("write drop");
        path
    }

    pub fn processed(&self, rel: &str) -> PathBuf {
        self.root().join(&self.config.watcher.processed_dir_name).join(rel)
    }

    pub fn object(&self, key: &str) -> PathBuf {
        self.config
            .snapshot
            .object_store_root
            .join(&self.config.snapshot.bucket)
            .join(key)
    }

    pub fn watcher(&self) -> IntakeWatcher {
        IntakeWatcher::init(self.config.clone()).expect("init watcher")
    }

    pub fn watcher_with_store(&self, store: Arc<dyn ObjectStore>) -> IntakeWatcher {
        IntakeWatcher::with_store(self.config.clone(), store).expect("init watcher")
    }

    /// Persist the config as TOML so the CLI can be pointed at it.
    pub fn write_config_file(&self) -> PathBuf {
        let path = self.config.paths.config_file.clone();
        let raw = toml::to_string_pretty(&self.config).expect("serialize config");
        fs::write(&path, raw).expect("write config");
        path
    }
}

pub fn new_drop_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// One cycle to start tracking, one to process (zero stability window).
pub fn settle(watcher: &mut IntakeWatcher) -> ScanReport {
    watcher.scan_once().expect("first scan");
    watcher.scan_once().expect("second scan")
}
