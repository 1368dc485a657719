use super::error::{field_error, ConfigError};
use crate::shared::ids::RoleName;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_SETTINGS_FILE_NAME: &str = "roundtable.yaml";

pub const MIN_TIMEOUT_SECONDS: u64 = 1;
pub const MAX_TIMEOUT_SECONDS: u64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPolicy {
    #[default]
    Default,
    Planner,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct PromptFlags {
    #[serde(default)]
    pub allow_tools: bool,
    #[serde(default)]
    pub allow_read: bool,
    #[serde(default)]
    pub allow_write: bool,
    #[serde(default)]
    pub allow_file_suggestions: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct RoleBehaviors {
    #[serde(default)]
    pub timeout_policy: TimeoutPolicy,
    #[serde(default)]
    pub apply_files: bool,
    #[serde(default)]
    pub can_finish: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct RoleSpec {
    #[serde(default)]
    pub system_instructions: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub model_env: Option<String>,
    #[serde(default)]
    pub reasoning_effort: String,
    #[serde(default)]
    pub prompt_flags: PromptFlags,
    #[serde(default)]
    pub behaviors: RoleBehaviors,
    #[serde(default)]
    pub schema_hint: String,
    #[serde(default)]
    pub skills: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RoleBindingConfig {
    pub name: RoleName,
    pub role: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub goal: String,
    #[serde(default = "default_cycles")]
    pub cycles: u32,
    #[serde(default)]
    pub run_tests: bool,
    #[serde(default)]
    pub test_command: Vec<String>,
    #[serde(default = "default_repair_attempts")]
    pub repair_attempts: u32,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_default_s: u64,
    #[serde(default = "default_overall_timeout")]
    pub overall_timeout_default_s: u64,
    #[serde(default = "default_idle_timeout_planner")]
    pub idle_timeout_planner_s: u64,
    #[serde(default = "default_overall_timeout_planner")]
    pub overall_timeout_planner_s: u64,
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_s: u64,
    #[serde(default)]
    pub allowed_file_extensions: Vec<String>,
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,
    #[serde(default = "default_runs_root")]
    pub runs_root: PathBuf,
    #[serde(default = "default_payload_excerpt_cap")]
    pub payload_excerpt_cap: usize,
    #[serde(default = "default_test_output_cap")]
    pub test_output_cap: usize,
    #[serde(default = "default_assistant_binary")]
    pub assistant_binary: String,
    #[serde(default)]
    pub assistant_fallback_paths: Vec<PathBuf>,
    #[serde(default)]
    pub assistant_env: BTreeMap<String, String>,
    #[serde(default)]
    pub default_model: String,
    #[serde(default)]
    pub roles: BTreeMap<String, RoleSpec>,
    #[serde(default)]
    pub role_bindings: Vec<RoleBindingConfig>,
}

fn default_cycles() -> u32 {
    1
}

fn default_repair_attempts() -> u32 {
    1
}

fn default_idle_timeout() -> u64 {
    120
}

fn default_overall_timeout() -> u64 {
    900
}

fn default_idle_timeout_planner() -> u64 {
    240
}

fn default_overall_timeout_planner() -> u64 {
    1800
}

fn default_handshake_timeout() -> u64 {
    15
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_runs_root() -> PathBuf {
    PathBuf::from("./.runs")
}

fn default_payload_excerpt_cap() -> usize {
    64 * 1024
}

fn default_test_output_cap() -> usize {
    64 * 1024
}

fn default_assistant_binary() -> String {
    "assistant".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            goal: String::new(),
            cycles: default_cycles(),
            run_tests: false,
            test_command: Vec::new(),
            repair_attempts: default_repair_attempts(),
            idle_timeout_default_s: default_idle_timeout(),
            overall_timeout_default_s: default_overall_timeout(),
            idle_timeout_planner_s: default_idle_timeout_planner(),
            overall_timeout_planner_s: default_overall_timeout_planner(),
            handshake_timeout_s: default_handshake_timeout(),
            allowed_file_extensions: Vec::new(),
            workspace_root: default_workspace_root(),
            runs_root: default_runs_root(),
            payload_excerpt_cap: default_payload_excerpt_cap(),
            test_output_cap: default_test_output_cap(),
            assistant_binary: default_assistant_binary(),
            assistant_fallback_paths: Vec::new(),
            assistant_env: BTreeMap::new(),
            default_model: String::new(),
            roles: BTreeMap::new(),
            role_bindings: Vec::new(),
        }
    }
}

impl Settings {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.goal.trim().is_empty() {
            return Err(field_error("goal", "must be non-empty"));
        }
        if self.cycles < 1 {
            return Err(field_error("cycles", "must be at least 1"));
        }
        if self.run_tests && self.test_command.is_empty() {
            return Err(field_error(
                "test_command",
                "must be non-empty when run_tests is true",
            ));
        }
        validate_timeout("idle_timeout_default_s", self.idle_timeout_default_s)?;
        validate_timeout("overall_timeout_default_s", self.overall_timeout_default_s)?;
        validate_timeout("idle_timeout_planner_s", self.idle_timeout_planner_s)?;
        validate_timeout("overall_timeout_planner_s", self.overall_timeout_planner_s)?;
        validate_timeout("handshake_timeout_s", self.handshake_timeout_s)?;
        if self.idle_timeout_default_s > self.overall_timeout_default_s {
            return Err(field_error(
                "idle_timeout_default_s",
                "must not exceed overall_timeout_default_s",
            ));
        }
        if self.idle_timeout_planner_s > self.overall_timeout_planner_s {
            return Err(field_error(
                "idle_timeout_planner_s",
                "must not exceed overall_timeout_planner_s",
            ));
        }
        if self.assistant_binary.trim().is_empty() {
            return Err(field_error("assistant_binary", "must be non-empty"));
        }
        if self.role_bindings.is_empty() {
            return Err(field_error("role_bindings", "must list at least one role"));
        }
        let mut seen = std::collections::BTreeSet::new();
        for binding in &self.role_bindings {
            if !seen.insert(binding.name.as_str().to_string()) {
                return Err(ConfigError::DuplicateBinding(
                    binding.name.as_str().to_string(),
                ));
            }
            if !self.roles.contains_key(&binding.role) {
                return Err(ConfigError::UnknownRole {
                    binding: binding.name.as_str().to_string(),
                    role: binding.role.clone(),
                });
            }
        }
        Ok(())
    }

    /// Role spec for a binding with the `model_env` override and the run-wide
    /// default model applied.
    pub fn resolve_role_spec(&self, binding: &RoleBindingConfig) -> Option<RoleSpec> {
        let mut spec = self.roles.get(&binding.role)?.clone();
        if let Some(env_name) = spec.model_env.as_deref() {
            if let Ok(value) = std::env::var(env_name) {
                if !value.trim().is_empty() {
                    spec.model = value.trim().to_string();
                }
            }
        }
        if spec.model.is_empty() {
            spec.model = self.default_model.clone();
        }
        Some(spec)
    }
}

fn validate_timeout(field: &str, value: u64) -> Result<(), ConfigError> {
    if !(MIN_TIMEOUT_SECONDS..=MAX_TIMEOUT_SECONDS).contains(&value) {
        return Err(field_error(
            field,
            format!("must be between {MIN_TIMEOUT_SECONDS} and {MAX_TIMEOUT_SECONDS} seconds"),
        ));
    }
    Ok(())
}
