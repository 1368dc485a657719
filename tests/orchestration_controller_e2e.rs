use roundtable::config::{
    PromptFlags, RoleBehaviors, RoleBindingConfig, RoleSpec, Settings, TimeoutPolicy,
};
use roundtable::orchestration::{ControllerState, RunController, RunOutcome, TurnStatus};
use roundtable::shared::ids::RoleName;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::tempdir;

/// The mock assistant answers `initialize`, appends every `turn/start` line to
/// `turns.log` in its cwd, and picks a canned reply by the role header baked
/// into the prompt.
const MOCK_PRELUDE: &str = r##"#!/bin/sh
while read line; do
  case "$line" in *'"initialize"'*)
    echo '{"type":"thread/started","thread_id":"t-'$$'"}'
    continue
  ;; esac
  case "$line" in *'turn/start'*)
    printf '%s\n' "$line" >> turns.log
  ;; esac
"##;

fn write_mock(dir: &Path, behavior: &str) -> std::path::PathBuf {
    let path = dir.join("assistant-mock");
    let body = format!("{MOCK_PRELUDE}{behavior}done\n");
    fs::write(&path, body).expect("write mock");
    let mut perms = fs::metadata(&path).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("chmod");
    path
}

struct Harness {
    _dir: tempfile::TempDir,
    settings: Settings,
}

fn harness(behavior: &str) -> Harness {
    let dir = tempdir().expect("tempdir");
    let workspace = dir.path().join("workspace");
    let runs = dir.path().join("runs");
    fs::create_dir_all(&workspace).expect("workspace");
    let binary = write_mock(dir.path(), behavior);

    let planner = RoleSpec {
        behaviors: RoleBehaviors {
            timeout_policy: TimeoutPolicy::Planner,
            apply_files: false,
            can_finish: false,
        },
        ..RoleSpec::default()
    };
    let implementer = RoleSpec {
        prompt_flags: PromptFlags {
            allow_write: true,
            allow_file_suggestions: true,
            ..PromptFlags::default()
        },
        behaviors: RoleBehaviors {
            timeout_policy: TimeoutPolicy::Default,
            apply_files: true,
            can_finish: true,
        },
        ..RoleSpec::default()
    };

    let settings = Settings {
        goal: "make it work".to_string(),
        cycles: 1,
        repair_attempts: 1,
        idle_timeout_default_s: 5,
        overall_timeout_default_s: 20,
        idle_timeout_planner_s: 5,
        overall_timeout_planner_s: 20,
        handshake_timeout_s: 5,
        workspace_root: workspace,
        runs_root: runs,
        assistant_binary: binary.display().to_string(),
        roles: BTreeMap::from_iter([
            ("planner".to_string(), planner),
            ("implementer".to_string(), implementer),
        ]),
        role_bindings: vec![
            RoleBindingConfig {
                name: RoleName::parse("planner").expect("name"),
                role: "planner".to_string(),
            },
            RoleBindingConfig {
                name: RoleName::parse("implementer").expect("name"),
                role: "implementer".to_string(),
            },
        ],
        ..Settings::default()
    };
    Harness {
        _dir: dir,
        settings,
    }
}

fn read_state(run_dir: &Path) -> ControllerState {
    let raw =
        fs::read_to_string(run_dir.join("controller_state.json")).expect("controller state");
    serde_json::from_str(&raw).expect("parse controller state")
}

fn turn_count(workspace: &Path, needle: &str) -> usize {
    let Ok(log) = fs::read_to_string(workspace.join("turns.log")) else {
        return 0;
    };
    log.lines().filter(|line| line.contains(needle)).count()
}

#[test]
fn happy_path_applies_files_and_stops_on_done() {
    let harness = harness(
        r##"  case "$line" in *'Role: planner'*)
    echo '{"type":"item/completed","text":"{\"summary\":\"ok\",\"status\":\"CONTINUE\"}"}'
    echo '{"type":"turn/completed"}'
  ;; esac
  case "$line" in *'Role: implementer'*)
    echo '{"type":"item/completed","text":"{\"summary\":\"done\",\"files\":[{\"path\":\"a.txt\",\"content\":\"hi\"}],\"status\":\"DONE\"}"}'
    echo '{"type":"turn/completed"}'
  ;; esac
"##,
    );
    let workspace = harness.settings.workspace_root.clone();

    let controller = RunController::start(
        harness.settings.clone(),
        Arc::new(AtomicBool::new(false)),
    )
    .expect("start");
    let report = controller.execute().expect("execute");

    assert_eq!(report.outcome, RunOutcome::Done);
    assert_eq!(report.cycles_completed, 1);
    assert_eq!(
        fs::read_to_string(workspace.join("a.txt")).expect("applied file"),
        "hi"
    );

    let state = read_state(&report.run_dir);
    assert!(state.stop_requested);
    assert_eq!(state.cycles_completed, 1);
    assert_eq!(state.history.len(), 2);
    assert_eq!(state.history[0].role_name, "planner");
    assert_eq!(state.history[0].status, TurnStatus::Ok);
    assert_eq!(state.history[1].role_name, "implementer");
    assert_eq!(state.history[1].status, TurnStatus::Ok);
    assert_eq!(state.history[1].applied_files_count, 1);

    let planner_payload = state
        .latest_json_by_role
        .get("planner")
        .expect("planner payload");
    assert_eq!(
        planner_payload.get("status").and_then(Value::as_str),
        Some("CONTINUE")
    );

    // The implementer handoff was reduced: the files array stays out of it.
    let handoff: Value = serde_json::from_str(
        &fs::read_to_string(
            report
                .run_dir
                .join("cycles/1/implementer/handoff.json"),
        )
        .expect("handoff"),
    )
    .expect("parse handoff");
    assert!(handoff.get("files").is_none());
    assert_eq!(handoff.get("status").and_then(Value::as_str), Some("DONE"));
}

#[test]
fn noisy_json_is_extracted_without_a_repair_turn() {
    let harness = harness(
        r##"  case "$line" in *'Role: planner'*)
    echo '{"type":"item/completed","text":"here is your plan: {\"summary\":\"s\",\"status\":\"CONTINUE\"}"}'
    echo '{"type":"turn/completed"}'
  ;; esac
  case "$line" in *'Role: implementer'*)
    echo '{"type":"item/completed","text":"{\"summary\":\"done\",\"status\":\"DONE\"}"}'
    echo '{"type":"turn/completed"}'
  ;; esac
"##,
    );
    let workspace = harness.settings.workspace_root.clone();

    let controller = RunController::start(
        harness.settings.clone(),
        Arc::new(AtomicBool::new(false)),
    )
    .expect("start");
    let report = controller.execute().expect("execute");

    assert_eq!(report.outcome, RunOutcome::Done);
    let state = read_state(&report.run_dir);
    assert_eq!(state.history[0].status, TurnStatus::Ok);
    assert_eq!(
        state
            .latest_json_by_role
            .get("planner")
            .and_then(|payload| payload.get("summary"))
            .and_then(Value::as_str),
        Some("s")
    );
    // Exactly one planner turn: no repair was needed.
    assert_eq!(turn_count(&workspace, "Role: planner"), 1);
}

#[test]
fn exhausted_repairs_hand_a_synthetic_payload_to_the_next_role() {
    let harness = harness(
        r##"  case "$line" in *'Role: planner'*)
    echo '{"type":"item/completed","text":"oops"}'
    echo '{"type":"turn/completed"}'
  ;; esac
  case "$line" in *'Role: implementer'*)
    echo '{"type":"item/completed","text":"{\"summary\":\"done\",\"status\":\"DONE\"}"}'
    echo '{"type":"turn/completed"}'
  ;; esac
"##,
    );
    let workspace = harness.settings.workspace_root.clone();

    let controller = RunController::start(
        harness.settings.clone(),
        Arc::new(AtomicBool::new(false)),
    )
    .expect("start");
    let report = controller.execute().expect("execute");

    // repair_attempts=1: the planner was prompted exactly twice.
    assert_eq!(turn_count(&workspace, "Role: planner"), 2);

    let state = read_state(&report.run_dir);
    assert_eq!(state.history[0].status, TurnStatus::JsonFailed);
    assert!(
        !state.latest_json_by_role.contains_key("planner"),
        "a failed parse must not update latest_json_by_role"
    );

    let handoff: Value = serde_json::from_str(
        &fs::read_to_string(report.run_dir.join("cycles/1/planner/handoff.json"))
            .expect("handoff"),
    )
    .expect("parse handoff");
    assert_eq!(
        handoff.get("error").and_then(Value::as_str),
        Some("json_parse_failed")
    );
    assert_eq!(
        handoff.get("raw_excerpt").and_then(Value::as_str),
        Some("oops")
    );

    // The implementer received the synthetic payload in its prompt.
    let implementer_prompt =
        fs::read_to_string(report.run_dir.join("cycles/1/implementer/prompt.txt"))
            .expect("prompt");
    assert!(implementer_prompt.contains("json_parse_failed"));
}

#[test]
fn a_silent_planner_times_out_idle_and_the_cycle_continues() {
    let mut harness = harness(
        r##"  case "$line" in *'Role: implementer'*)
    echo '{"type":"item/completed","text":"{\"summary\":\"done\",\"status\":\"DONE\"}"}'
    echo '{"type":"turn/completed"}'
  ;; esac
"##,
    );
    harness.settings.idle_timeout_planner_s = 1;
    harness.settings.overall_timeout_planner_s = 10;
    harness.settings.repair_attempts = 0;

    let controller = RunController::start(
        harness.settings.clone(),
        Arc::new(AtomicBool::new(false)),
    )
    .expect("start");
    let report = controller.execute().expect("execute");

    assert_eq!(report.outcome, RunOutcome::Done);
    let state = read_state(&report.run_dir);
    assert_eq!(state.history.len(), 2);
    assert_eq!(state.history[0].status, TurnStatus::TimedOut);

    let assistant_text =
        fs::read_to_string(report.run_dir.join("cycles/1/planner/assistant_text.txt"))
            .expect("assistant text");
    assert_eq!(assistant_text, "");

    let implementer_prompt =
        fs::read_to_string(report.run_dir.join("cycles/1/implementer/prompt.txt"))
            .expect("prompt");
    assert!(implementer_prompt.contains("json_parse_failed"));
}

#[test]
fn traversal_proposals_are_rejected_and_mark_the_turn() {
    let harness = harness(
        r##"  case "$line" in *'Role: planner'*)
    echo '{"type":"item/completed","text":"{\"summary\":\"ok\",\"status\":\"CONTINUE\"}"}'
    echo '{"type":"turn/completed"}'
  ;; esac
  case "$line" in *'Role: implementer'*)
    echo '{"type":"item/completed","text":"{\"summary\":\"bad\",\"files\":[{\"path\":\"../evil.txt\",\"content\":\"x\"}],\"status\":\"DONE\"}"}'
    echo '{"type":"turn/completed"}'
  ;; esac
"##,
    );
    let workspace = harness.settings.workspace_root.clone();

    let controller = RunController::start(
        harness.settings.clone(),
        Arc::new(AtomicBool::new(false)),
    )
    .expect("start");
    let report = controller.execute().expect("execute");

    assert!(!workspace.parent().expect("parent").join("evil.txt").exists());

    let state = read_state(&report.run_dir);
    assert_eq!(state.history[1].status, TurnStatus::JsonFailed);
    assert_eq!(state.history[1].applied_files_count, 0);

    let rejected: Value = serde_json::from_str(
        &fs::read_to_string(
            report
                .run_dir
                .join("cycles/1/implementer/rejected_files.json"),
        )
        .expect("rejected files"),
    )
    .expect("parse rejected");
    assert_eq!(
        rejected
            .as_array()
            .expect("array")
            .first()
            .and_then(|entry| entry.get("path"))
            .and_then(Value::as_str),
        Some("../evil.txt")
    );
}

#[test]
fn transport_crash_in_the_first_role_aborts_the_run() {
    let harness = harness(
        r##"  case "$line" in *'Role: planner'*)
    echo '{"type":"item/delta","text":"par"}'
    exit 0
  ;; esac
"##,
    );

    let controller = RunController::start(
        harness.settings.clone(),
        Arc::new(AtomicBool::new(false)),
    )
    .expect("start");
    let report = controller.execute().expect("execute");

    assert!(matches!(report.outcome, RunOutcome::Aborted(_)));
    assert_eq!(report.cycles_completed, 0);

    let state = read_state(&report.run_dir);
    assert_eq!(state.history.len(), 1);
    assert_eq!(state.history[0].status, TurnStatus::TransportFailed);
    assert!(!state.stop_requested);
}

#[test]
fn a_pre_fired_cancel_token_stops_the_run_before_any_turn() {
    let harness = harness(
        r##"  case "$line" in *'Role: '*)
    echo '{"type":"item/completed","text":"{\"status\":\"CONTINUE\"}"}'
    echo '{"type":"turn/completed"}'
  ;; esac
"##,
    );
    let cancel = Arc::new(AtomicBool::new(true));
    cancel.store(true, Ordering::Relaxed);

    let controller =
        RunController::start(harness.settings.clone(), cancel).expect("start");
    let report = controller.execute().expect("execute");
    assert_eq!(report.outcome, RunOutcome::Cancelled);

    let state = read_state(&report.run_dir);
    assert!(state.history.is_empty());
}

#[test]
fn cycle_budget_exhaustion_ends_runs_that_never_signal_done() {
    let mut harness = harness(
        r##"  case "$line" in *'Role: '*)
    echo '{"type":"item/completed","text":"{\"summary\":\"keep going\",\"status\":\"CONTINUE\"}"}'
    echo '{"type":"turn/completed"}'
  ;; esac
"##,
    );
    harness.settings.cycles = 2;
    let workspace = harness.settings.workspace_root.clone();

    let controller = RunController::start(
        harness.settings.clone(),
        Arc::new(AtomicBool::new(false)),
    )
    .expect("start");
    let report = controller.execute().expect("execute");

    assert_eq!(report.outcome, RunOutcome::CycleBudgetExhausted);
    assert_eq!(report.cycles_completed, 2);

    let state = read_state(&report.run_dir);
    assert_eq!(state.history.len(), 4);
    let cycles: Vec<u32> = state.history.iter().map(|turn| turn.cycle_index).collect();
    assert_eq!(cycles, vec![1, 1, 2, 2]);
    let roles: Vec<&str> = state
        .history
        .iter()
        .map(|turn| turn.role_name.as_str())
        .collect();
    assert_eq!(roles, vec!["planner", "implementer", "planner", "implementer"]);
    assert_eq!(turn_count(&workspace, "Role: planner"), 2);
}
