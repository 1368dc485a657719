use chrono::Utc;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub fn run_log_path(run_dir: &Path) -> PathBuf {
    run_dir.join("run.log")
}

pub fn role_stderr_log_path(run_dir: &Path, role_name: &str) -> PathBuf {
    run_dir.join("roles").join(format!("{role_name}.stderr.log"))
}

pub fn append_run_log_line(run_dir: &Path, line: &str) -> std::io::Result<()> {
    let path = run_log_path(run_dir);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)?;
    writeln!(file, "ts={} {line}", Utc::now().timestamp())
}
