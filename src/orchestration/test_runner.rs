use crate::orchestration::json_extract::truncate_to_char_boundary;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Command;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub command: Vec<String>,
    pub exit_code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl TestResult {
    pub fn status_label(&self) -> &'static str {
        if self.exit_code.is_none() {
            "error"
        } else if self.success {
            "passed"
        } else {
            "failed"
        }
    }
}

/// Run the configured test command (a shell-free argv list) in the workspace.
/// Never fails the caller: spawn errors are folded into the result.
pub fn run_tests(workspace_root: &Path, command: &[String], output_cap: usize) -> TestResult {
    let started = Instant::now();
    let mut result = TestResult {
        command: command.to_vec(),
        exit_code: None,
        success: false,
        stdout: String::new(),
        stderr: String::new(),
        duration_ms: 0,
    };
    let Some((program, args)) = command.split_first() else {
        result.stderr = "test command is empty".to_string();
        return result;
    };

    match Command::new(program)
        .args(args)
        .current_dir(workspace_root)
        .output()
    {
        Ok(output) => {
            result.exit_code = output.status.code();
            result.success = output.status.success();
            result.stdout = capped_output(output.stdout, output_cap);
            result.stderr = capped_output(output.stderr, output_cap);
        }
        Err(err) => {
            result.stderr = format!("failed to spawn test command: {err}");
        }
    }
    result.duration_ms = started.elapsed().as_millis() as u64;
    result
}

fn capped_output(raw: Vec<u8>, cap: usize) -> String {
    let text = String::from_utf8_lossy(&raw).into_owned();
    if text.len() <= cap {
        return text;
    }
    format!(
        "{}\n… (output truncated)",
        truncate_to_char_boundary(&text, cap)
    )
}
