#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::{SystemTime, UNIX_EPOCH};

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

impl CmdResult {
    /// Parse stdout as a single JSON line.
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(self.stdout.trim()).unwrap_or_else(|e| {
            panic!(
                "stdout is not one JSON line ({e}); log: {}",
                self.log_path.display()
            )
        })
    }
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
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_swd") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "swd.exe" } else { "swd" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve swd binary path for integration test"),
    }
}

/// An isolated swd environment: config, database, logs and vault under one
/// temp dir, plus a `tree/` to scan.
pub struct Sandbox {
    pub dir: tempfile::TempDir,
}

impl Sandbox {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create sandbox");
        let root = dir.path();
        fs::create_dir_all(root.join("tree")).expect("create tree");
        let config = format!(
            "[scanner]\nroot_paths = [{tree:?}]\nexcluded_paths = []\n\n\
             [quarantine]\ndir = {vault:?}\n\n\
             [paths]\ndatabase = {db:?}\njsonl_log = {jsonl:?}\nactivity_db = {activity:?}\n",
            tree = root.join("tree").to_string_lossy(),
            vault = root.join("vault").to_string_lossy(),
            db = root.join("warden.sqlite3").to_string_lossy(),
            jsonl = root.join("activity.jsonl").to_string_lossy(),
            activity = root.join("activity.sqlite3").to_string_lossy(),
        );
        fs::write(root.join("config.toml"), config).expect("write config");
        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn tree(&self) -> PathBuf {
        self.root().join("tree")
    }

    pub fn vault(&self) -> PathBuf {
        self.root().join("vault")
    }

    pub fn config_path(&self) -> PathBuf {
        self.root().join("config.toml")
    }

    pub fn write(&self, relative: &str, bytes: &[u8]) -> PathBuf {
        let path = self.tree().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(&path, bytes).expect("write tree file");
        path
    }

    /// Run swd against this sandbox's config with JSON output.
    pub fn swd(&self, case_name: &str, args: &[&str]) -> CmdResult {
        let config = self.config_path();
        let mut full: Vec<&str> = vec!["--config", config.to_str().expect("utf-8 path"), "--json"];
        full.extend_from_slice(args);
        run_cli_case(case_name, &full)
    }
}

pub fn run_cli_case(case_name: &str, args: &[&str]) -> CmdResult {
    let root = std::env::temp_dir().join("swd-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let output = Command::new(&bin_path)
        .args(args)
        .env_remove("SWD_OUTPUT_FORMAT")
        .env("RUST_BACKTRACE", "1")
        .output()
        .expect("execute swd command");

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
