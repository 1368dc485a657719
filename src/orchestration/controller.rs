use crate::assistant::{locate_assistant_binary, Transport};
use crate::config::{RoleSpec, Settings};
use crate::orchestration::artifacts::ArtifactStore;
use crate::orchestration::error::{io_error, OrchestratorError};
use crate::orchestration::file_apply::{apply_proposals, proposals_from_payload};
use crate::orchestration::json_extract::{extract_payload, parse_failure_payload};
use crate::orchestration::prompt_build::{assemble_prompt, PromptContext};
use crate::orchestration::test_runner::run_tests;
use crate::orchestration::timeouts::{resolve_turn_timeouts, TurnTimeouts};
use crate::orchestration::turn_runner::{run_turn, CompletionReason};
use crate::shared::ids::mint_run_id;
use crate::shared::logging::append_run_log_line;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const DONE_STATUS: &str = "DONE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Ok,
    JsonFailed,
    TransportFailed,
    TimedOut,
}

impl TurnStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::JsonFailed => "json_failed",
            Self::TransportFailed => "transport_failed",
            Self::TimedOut => "timed_out",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub cycle_index: u32,
    pub role_name: String,
    pub prompt_len: usize,
    pub started_at: i64,
    pub finished_at: i64,
    pub status: TurnStatus,
    pub artifact_dir: String,
    pub applied_files_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerState {
    pub run_id: String,
    pub goal: String,
    pub cycles_completed: u32,
    pub stop_requested: bool,
    #[serde(default)]
    pub latest_json_by_role: BTreeMap<String, Value>,
    #[serde(default)]
    pub history: Vec<TurnRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Done,
    CycleBudgetExhausted,
    Aborted(String),
    Cancelled,
}

impl RunOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Done => "done".to_string(),
            Self::CycleBudgetExhausted => "cycle budget exhausted".to_string(),
            Self::Aborted(reason) => format!("aborted: {reason}"),
            Self::Cancelled => "cancelled".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub run_id: String,
    pub outcome: RunOutcome,
    pub cycles_completed: u32,
    pub run_dir: PathBuf,
}

struct RoleBinding {
    name: String,
    spec: RoleSpec,
    timeouts: TurnTimeouts,
    transport: Transport,
}

/// Outcome of a single role turn, before run-level classification.
struct TurnOutcome {
    record: TurnRecord,
    payload: Option<Map<String, Value>>,
    reduced: Value,
    completion_reason: CompletionReason,
    finished: bool,
}

enum LoopDecision {
    Continue,
    EndCycle,
    AbortRun(String),
    StopRun,
    Cancelled,
}

/// The run driver: starts one transport per role binding, then walks cycles
/// and roles in order, feeding each role the reduced payload of the previous
/// one and persisting state after every turn.
pub struct RunController {
    settings: Settings,
    store: ArtifactStore,
    state: ControllerState,
    bindings: Vec<RoleBinding>,
    cancel: Arc<AtomicBool>,
    run_dir: PathBuf,
}

impl RunController {
    pub fn start(
        settings: Settings,
        cancel: Arc<AtomicBool>,
    ) -> Result<Self, OrchestratorError> {
        settings.validate()?;
        let run_id = mint_run_id();
        let store = ArtifactStore::new(settings.runs_root.clone(), run_id.clone());
        store.ensure_run_dir()?;
        let run_dir = store.run_dir();

        fs::create_dir_all(&settings.workspace_root)
            .map_err(|err| io_error(&settings.workspace_root, err))?;

        let binary = locate_assistant_binary(
            &settings.assistant_binary,
            &settings.assistant_fallback_paths,
        )
        .map_err(|source| OrchestratorError::TransportStart {
            role: "(binary lookup)".to_string(),
            source,
        })?;
        log_line(&run_dir, &format!("transport_binary path={}", binary.display()));

        let mut bindings: Vec<RoleBinding> = Vec::new();
        for binding_config in &settings.role_bindings {
            let name = binding_config.name.as_str().to_string();
            let spec = settings.resolve_role_spec(binding_config).ok_or_else(|| {
                OrchestratorError::Config(crate::config::ConfigError::UnknownRole {
                    binding: name.clone(),
                    role: binding_config.role.clone(),
                })
            })?;
            let timeouts = resolve_turn_timeouts(&spec.behaviors, &settings);
            let transport = Transport::start(
                &name,
                &binary,
                &settings.workspace_root,
                &settings.assistant_env,
                &run_dir,
            )
            .map_err(|source| {
                // A failed start aborts the run; stop whatever already came up.
                for started in bindings.iter_mut() {
                    started.transport.stop();
                }
                OrchestratorError::TransportStart {
                    role: name.clone(),
                    source,
                }
            })?;
            log_line(&run_dir, &format!("transport_started role={name}"));
            bindings.push(RoleBinding {
                name,
                spec,
                timeouts,
                transport,
            });
        }

        let state = ControllerState {
            run_id,
            goal: settings.goal.clone(),
            cycles_completed: 0,
            stop_requested: false,
            latest_json_by_role: BTreeMap::new(),
            history: Vec::new(),
        };
        store.write_controller_state(&state)?;

        Ok(Self {
            settings,
            store,
            state,
            bindings,
            cancel,
            run_dir,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.state.run_id
    }

    pub fn execute(mut self) -> Result<RunReport, OrchestratorError> {
        let result = self.drive();
        self.teardown();
        let outcome = result?;
        let report = RunReport {
            run_id: self.state.run_id.clone(),
            outcome,
            cycles_completed: self.state.cycles_completed,
            run_dir: self.run_dir.clone(),
        };
        log_line(
            &self.run_dir,
            &format!(
                "run_finished outcome=\"{}\" cycles_completed={}",
                report.outcome.describe(),
                report.cycles_completed
            ),
        );
        Ok(report)
    }

    fn drive(&mut self) -> Result<RunOutcome, OrchestratorError> {
        let mut payload = Value::Object(Map::from_iter([(
            "goal".to_string(),
            Value::String(self.state.goal.clone()),
        )]));

        for cycle_index in 1..=self.settings.cycles {
            if self.state.stop_requested {
                break;
            }
            log_line(&self.run_dir, &format!("cycle_started cycle={cycle_index}"));

            let mut cycle_aborted = false;
            for role_index in 0..self.bindings.len() {
                if self.cancel.load(Ordering::Relaxed) {
                    return Ok(RunOutcome::Cancelled);
                }
                let (decision, next_payload) =
                    self.execute_role_turn(cycle_index, role_index, &payload)?;
                if let Some(next) = next_payload {
                    payload = next;
                }
                match decision {
                    LoopDecision::Continue => {}
                    LoopDecision::EndCycle => {
                        cycle_aborted = true;
                        break;
                    }
                    LoopDecision::AbortRun(reason) => {
                        return Ok(RunOutcome::Aborted(reason));
                    }
                    LoopDecision::StopRun => break,
                    LoopDecision::Cancelled => return Ok(RunOutcome::Cancelled),
                }
            }

            self.state.cycles_completed = cycle_index;
            self.store.write_controller_state(&self.state)?;
            log_line(
                &self.run_dir,
                &format!(
                    "cycle_finished cycle={cycle_index} aborted={cycle_aborted}"
                ),
            );
            if self.state.stop_requested {
                break;
            }
        }

        if self.state.stop_requested {
            Ok(RunOutcome::Done)
        } else {
            Ok(RunOutcome::CycleBudgetExhausted)
        }
    }

    fn execute_role_turn(
        &mut self,
        cycle_index: u32,
        role_index: usize,
        incoming: &Value,
    ) -> Result<(LoopDecision, Option<Value>), OrchestratorError> {
        let role_name = self.bindings[role_index].name.clone();
        let turn_dir = self.store.turn_dir(cycle_index, &role_name);
        fs::create_dir_all(&turn_dir).map_err(|err| io_error(&turn_dir, err))?;

        let outcome = match self.run_role_turn(cycle_index, role_index, incoming, &turn_dir) {
            Ok(outcome) => outcome,
            Err(err @ OrchestratorError::HandshakeTimeout { .. })
            | Err(err @ OrchestratorError::Transport { .. }) => {
                // Handshake failures count as a failed transport start: the
                // turn is recorded and the run aborts regardless of position.
                let now = Utc::now().timestamp();
                let record = TurnRecord {
                    cycle_index,
                    role_name: role_name.clone(),
                    prompt_len: 0,
                    started_at: now,
                    finished_at: now,
                    status: TurnStatus::TransportFailed,
                    artifact_dir: turn_dir.display().to_string(),
                    applied_files_count: 0,
                    test_status: None,
                    error: Some(err.to_string()),
                };
                self.record_turn(record)?;
                return Ok((LoopDecision::AbortRun(err.to_string()), None));
            }
            Err(err) => return Err(err),
        };

        let TurnOutcome {
            record,
            payload,
            reduced,
            completion_reason,
            finished,
        } = outcome;

        if completion_reason == CompletionReason::Cancelled {
            // A cancelled turn never completed; it leaves artifacts but no
            // history entry, and the run winds down.
            return Ok((LoopDecision::Cancelled, None));
        }

        let status = record.status;
        self.record_turn(record)?;

        if status != TurnStatus::TransportFailed {
            if let Some(extracted) = payload {
                // Only a fully extracted payload replaces the previous one.
                self.state
                    .latest_json_by_role
                    .insert(role_name.clone(), Value::Object(extracted));
                self.store.write_controller_state(&self.state)?;
            }
        }

        if finished {
            self.state.stop_requested = true;
            self.store.write_controller_state(&self.state)?;
            log_line(&self.run_dir, &format!("run_done role={role_name}"));
            return Ok((LoopDecision::StopRun, Some(reduced)));
        }

        let hard_failure = status == TurnStatus::TransportFailed
            || completion_reason == CompletionReason::OverallTimeout;
        if hard_failure {
            let reason = format!(
                "role `{role_name}` turn ended with {}",
                completion_reason.as_str()
            );
            if role_index == 0 {
                return Ok((LoopDecision::AbortRun(reason), None));
            }
            return Ok((LoopDecision::EndCycle, None));
        }

        Ok((LoopDecision::Continue, Some(reduced)))
    }

    fn run_role_turn(
        &mut self,
        cycle_index: u32,
        role_index: usize,
        incoming: &Value,
        turn_dir: &std::path::Path,
    ) -> Result<TurnOutcome, OrchestratorError> {
        let binding = &mut self.bindings[role_index];
        let role_name = binding.name.clone();
        let started_at = Utc::now().timestamp();

        let prompt = assemble_prompt(&PromptContext {
            role_name: &role_name,
            spec: &binding.spec,
            goal: &self.settings.goal,
            cycle_index,
            payload: incoming,
            payload_cap: self.settings.payload_excerpt_cap,
            is_repair: false,
        });
        log_line(
            &self.run_dir,
            &format!(
                "turn_started cycle={cycle_index} role={role_name} prompt_len={}",
                prompt.len()
            ),
        );

        let mut result = run_turn(
            &mut binding.transport,
            &binding.spec,
            &prompt,
            &binding.timeouts,
            &self.cancel,
        )?;
        self.store.write_turn_texts(turn_dir, &prompt, &result)?;

        // The repair loop re-prompts on the same thread. Skipped when the
        // transport died, the turn overran its overall budget, or the run was
        // cancelled; an idle-timeout turn may still be repairable.
        let mut extracted = extract_payload(&result.assistant_text);
        let repairable = matches!(
            result.completion_reason,
            CompletionReason::Normal | CompletionReason::IdleTimeout
        );
        if extracted.is_none() && repairable {
            let binding = &mut self.bindings[role_index];
            for attempt in 1..=self.settings.repair_attempts {
                if self.cancel.load(Ordering::Relaxed) {
                    break;
                }
                log_line(
                    &self.run_dir,
                    &format!("repair_attempt cycle={cycle_index} role={role_name} n={attempt}"),
                );
                let repair_prompt = assemble_prompt(&PromptContext {
                    role_name: &role_name,
                    spec: &binding.spec,
                    goal: &self.settings.goal,
                    cycle_index,
                    payload: incoming,
                    payload_cap: self.settings.payload_excerpt_cap,
                    is_repair: true,
                });
                let repair_result = run_turn(
                    &mut binding.transport,
                    &binding.spec,
                    &repair_prompt,
                    &binding.timeouts,
                    &self.cancel,
                )?;
                let stop = !matches!(
                    repair_result.completion_reason,
                    CompletionReason::Normal | CompletionReason::IdleTimeout
                );
                result = repair_result;
                self.store.write_turn_texts(turn_dir, &repair_prompt, &result)?;
                extracted = extract_payload(&result.assistant_text);
                if extracted.is_some() || stop {
                    break;
                }
            }
        }

        let binding = &self.bindings[role_index];
        let payload = extracted.clone().unwrap_or_else(|| {
            parse_failure_payload(&result.assistant_text)
        });

        let finished = binding.spec.behaviors.can_finish
            && payload.get("status").and_then(Value::as_str) == Some(DONE_STATUS);

        let mut applied_count = 0usize;
        let mut all_rejected = false;
        let mut test_status = None;
        if binding.spec.behaviors.apply_files
            && extracted.is_some()
            && result.completion_reason != CompletionReason::Cancelled
        {
            let proposals = proposals_from_payload(&payload);
            if !proposals.is_empty() {
                let apply_outcome = apply_proposals(
                    &self.settings.workspace_root,
                    &proposals,
                    &self.settings.allowed_file_extensions,
                )?;
                applied_count = apply_outcome.applied.len();
                all_rejected = apply_outcome.applied.is_empty();
                if !apply_outcome.applied.is_empty() {
                    self.store
                        .write_applied_files(turn_dir, &apply_outcome.applied)?;
                }
                if !apply_outcome.rejected.is_empty() {
                    self.store
                        .write_rejected_files(turn_dir, &apply_outcome.rejected)?;
                }
                log_line(
                    &self.run_dir,
                    &format!(
                        "files_applied cycle={cycle_index} role={role_name} count={applied_count} rejected={}",
                        apply_outcome.rejected.len()
                    ),
                );
                if self.settings.run_tests && applied_count >= 1 {
                    let test_result = run_tests(
                        &self.settings.workspace_root,
                        &self.settings.test_command,
                        self.settings.test_output_cap,
                    );
                    log_line(
                        &self.run_dir,
                        &format!(
                            "tests cycle={cycle_index} role={role_name} status={} exit={:?}",
                            test_result.status_label(),
                            test_result.exit_code
                        ),
                    );
                    self.store.write_test_result(turn_dir, &test_result)?;
                    test_status = Some(test_result.status_label().to_string());
                }
            }
        }

        let status = match result.completion_reason {
            CompletionReason::TransportClosed => TurnStatus::TransportFailed,
            CompletionReason::IdleTimeout | CompletionReason::OverallTimeout => {
                TurnStatus::TimedOut
            }
            CompletionReason::Cancelled | CompletionReason::Normal => {
                if extracted.is_none() || all_rejected {
                    TurnStatus::JsonFailed
                } else {
                    TurnStatus::Ok
                }
            }
        };

        let reduced = self.reduce_payload(payload.clone(), turn_dir)?;
        self.store.write_handoff(turn_dir, &reduced)?;

        let error = match status {
            TurnStatus::Ok => None,
            TurnStatus::JsonFailed if all_rejected => {
                Some("all file proposals rejected".to_string())
            }
            TurnStatus::JsonFailed => Some("json extraction failed".to_string()),
            TurnStatus::TransportFailed => Some("transport closed mid-turn".to_string()),
            TurnStatus::TimedOut => Some(format!(
                "turn timed out ({})",
                result.completion_reason.as_str()
            )),
        };

        let finished_at = Utc::now().timestamp();
        log_line(
            &self.run_dir,
            &format!(
                "turn_finished cycle={cycle_index} role={role_name} status={} reason={}",
                status.as_str(),
                result.completion_reason.as_str()
            ),
        );

        Ok(TurnOutcome {
            record: TurnRecord {
                cycle_index,
                role_name,
                prompt_len: prompt.len(),
                started_at,
                finished_at,
                status,
                artifact_dir: turn_dir.display().to_string(),
                applied_files_count: applied_count,
                test_status,
                error,
            },
            payload: extracted,
            reduced,
            completion_reason: result.completion_reason,
            finished,
        })
    }

    /// Strip known oversize fields before forwarding: `analysis_md` moves to
    /// a sidecar file, `files` arrays are already on disk.
    fn reduce_payload(
        &self,
        mut payload: Map<String, Value>,
        turn_dir: &std::path::Path,
    ) -> Result<Value, OrchestratorError> {
        if let Some(Value::String(analysis)) = payload.remove("analysis_md") {
            let sidecar = self.store.write_analysis_sidecar(turn_dir, &analysis)?;
            payload.insert(
                "analysis_md_path".to_string(),
                Value::String(sidecar.display().to_string()),
            );
        }
        payload.remove("files");
        Ok(Value::Object(payload))
    }

    fn record_turn(&mut self, record: TurnRecord) -> Result<(), OrchestratorError> {
        self.state.history.push(record);
        self.store.write_controller_state(&self.state)
    }

    fn teardown(&mut self) {
        for binding in &mut self.bindings {
            binding.transport.stop();
            log_line(
                &self.run_dir,
                &format!("transport_stopped role={}", binding.name),
            );
        }
        let _ = self.store.write_controller_state(&self.state);
    }
}

fn log_line(run_dir: &std::path::Path, line: &str) {
    let _ = append_run_log_line(run_dir, line);
}
