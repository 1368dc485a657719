use crate::orchestration::error::{io_error, OrchestratorError};
use crate::orchestration::file_apply::{AppliedFile, RejectedFile};
use crate::orchestration::test_runner::TestResult;
use crate::orchestration::turn_runner::TurnResult;
use crate::shared::fs_atomic::{atomic_write_file, atomic_write_json};
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONTROLLER_STATE_FILE: &str = "controller_state.json";
pub const ANALYSIS_SIDECAR_FILE: &str = "analysis.md";
const ITEM_SEPARATOR: &str = "\n\n---\n\n";

/// Owns the on-disk layout of one run:
/// `<runs_root>/<run_id>/cycles/<cycle>/<role>/` for per-turn artifacts plus
/// `controller_state.json` at the run root. Every write is atomic.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    runs_root: PathBuf,
    run_id: String,
}

impl ArtifactStore {
    pub fn new(runs_root: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            runs_root: runs_root.into(),
            run_id: run_id.into(),
        }
    }

    pub fn run_dir(&self) -> PathBuf {
        self.runs_root.join(&self.run_id)
    }

    pub fn turn_dir(&self, cycle_index: u32, role_name: &str) -> PathBuf {
        self.run_dir()
            .join("cycles")
            .join(cycle_index.to_string())
            .join(role_name)
    }

    pub fn ensure_run_dir(&self) -> Result<(), OrchestratorError> {
        let dir = self.run_dir();
        fs::create_dir_all(&dir).map_err(|err| io_error(&dir, err))
    }

    pub fn write_turn_texts(
        &self,
        turn_dir: &Path,
        prompt: &str,
        result: &TurnResult,
    ) -> Result<(), OrchestratorError> {
        write_text(&turn_dir.join("prompt.txt"), prompt)?;
        write_text(&turn_dir.join("assistant_text.txt"), &result.assistant_text)?;
        write_text(&turn_dir.join("delta_text.txt"), &result.delta_text)?;
        write_text(
            &turn_dir.join("items_text.md"),
            &result.item_texts.join(ITEM_SEPARATOR),
        )?;
        Ok(())
    }

    pub fn write_handoff(
        &self,
        turn_dir: &Path,
        payload: &Value,
    ) -> Result<(), OrchestratorError> {
        write_json(&turn_dir.join("handoff.json"), payload)
    }

    pub fn write_applied_files(
        &self,
        turn_dir: &Path,
        applied: &[AppliedFile],
    ) -> Result<(), OrchestratorError> {
        write_json(&turn_dir.join("applied_files.json"), &applied)
    }

    pub fn write_rejected_files(
        &self,
        turn_dir: &Path,
        rejected: &[RejectedFile],
    ) -> Result<(), OrchestratorError> {
        write_json(&turn_dir.join("rejected_files.json"), &rejected)
    }

    pub fn write_test_result(
        &self,
        turn_dir: &Path,
        result: &TestResult,
    ) -> Result<(), OrchestratorError> {
        write_json(&turn_dir.join("test_result.json"), result)
    }

    /// `analysis_md` sidecar for payload reduction; returns the sidecar path.
    pub fn write_analysis_sidecar(
        &self,
        turn_dir: &Path,
        content: &str,
    ) -> Result<PathBuf, OrchestratorError> {
        let path = turn_dir.join(ANALYSIS_SIDECAR_FILE);
        write_text(&path, content)?;
        Ok(path)
    }

    pub fn write_controller_state<T: Serialize>(
        &self,
        state: &T,
    ) -> Result<(), OrchestratorError> {
        write_json(&self.run_dir().join(CONTROLLER_STATE_FILE), state)
    }
}

fn write_text(path: &Path, content: &str) -> Result<(), OrchestratorError> {
    atomic_write_file(path, content.as_bytes()).map_err(|err| io_error(path, err))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), OrchestratorError> {
    atomic_write_json(path, value).map_err(|err| io_error(path, err))
}
