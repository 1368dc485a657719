use crate::assistant::locate_assistant_binary;
use crate::config::{load_settings, CliOverrides, ConfigError};
use crate::orchestration::{OrchestratorError, RunController, RunOutcome};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliVerb {
    Run,
    Doctor,
    Help,
    Unknown,
}

pub fn parse_cli_verb(input: &str) -> CliVerb {
    match input {
        "run" => CliVerb::Run,
        "doctor" => CliVerb::Doctor,
        "help" | "--help" | "-h" => CliVerb::Help,
        _ => CliVerb::Unknown,
    }
}

/// Exit policy: 0 when a run reached DONE, 1 for aborted/incomplete runs and
/// usage errors, 2 for configuration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliExit {
    pub code: i32,
    pub output: String,
}

pub fn cli_help_lines() -> Vec<String> {
    vec![
        "Commands:".to_string(),
        "  run [--config PATH] [--goal TEXT] [--cycles N] [--model NAME]".to_string(),
        "                                       Execute a run over the configured roles"
            .to_string(),
        "  doctor [--config PATH]               Check configuration and assistant binary"
            .to_string(),
        "  help                                 Show this help".to_string(),
    ]
}

pub fn run_cli(args: Vec<String>) -> CliExit {
    let Some((verb, rest)) = args.split_first() else {
        return CliExit {
            code: 1,
            output: cli_help_lines().join("\n"),
        };
    };
    match parse_cli_verb(verb) {
        CliVerb::Help => CliExit {
            code: 0,
            output: cli_help_lines().join("\n"),
        },
        CliVerb::Run => handle_run(rest),
        CliVerb::Doctor => handle_doctor(rest),
        CliVerb::Unknown => CliExit {
            code: 1,
            output: format!(
                "unknown command `{verb}`\n\n{}",
                cli_help_lines().join("\n")
            ),
        },
    }
}

struct RunArgs {
    config_path: Option<PathBuf>,
    overrides: CliOverrides,
}

fn parse_run_args(args: &[String]) -> Result<RunArgs, String> {
    let mut config_path = None;
    let mut overrides = CliOverrides::default();
    let mut iter = args.iter();
    while let Some(flag) = iter.next() {
        let mut take_value = |flag: &str| {
            iter.next()
                .cloned()
                .ok_or_else(|| format!("flag `{flag}` requires a value"))
        };
        match flag.as_str() {
            "--config" => config_path = Some(PathBuf::from(take_value("--config")?)),
            "--goal" => overrides.goal = Some(take_value("--goal")?),
            "--cycles" => {
                let raw = take_value("--cycles")?;
                let cycles = raw
                    .parse::<u32>()
                    .map_err(|_| format!("invalid value for `--cycles`: {raw}"))?;
                overrides.cycles = Some(cycles);
            }
            "--model" => overrides.model = Some(take_value("--model")?),
            other => return Err(format!("unknown flag `{other}`")),
        }
    }
    Ok(RunArgs {
        config_path,
        overrides,
    })
}

fn handle_run(args: &[String]) -> CliExit {
    let parsed = match parse_run_args(args) {
        Ok(parsed) => parsed,
        Err(message) => return CliExit { code: 1, output: message },
    };
    let settings = match load_settings(parsed.config_path.as_deref(), &parsed.overrides) {
        Ok(settings) => settings,
        Err(err) => return config_failure(err),
    };

    let cancel = Arc::new(AtomicBool::new(false));
    let controller = match RunController::start(settings, cancel) {
        Ok(controller) => controller,
        Err(err) => return run_failure(err),
    };
    let report = match controller.execute() {
        Ok(report) => report,
        Err(err) => return run_failure(err),
    };

    let code = if report.outcome.is_done() { 0 } else { 1 };
    CliExit {
        code,
        output: format!(
            "run {} finished: {} (cycles completed: {}, artifacts: {})",
            report.run_id,
            report.outcome.describe(),
            report.cycles_completed,
            report.run_dir.display()
        ),
    }
}

fn handle_doctor(args: &[String]) -> CliExit {
    let mut config_path = None;
    let mut iter = args.iter();
    while let Some(flag) = iter.next() {
        match flag.as_str() {
            "--config" => match iter.next() {
                Some(value) => config_path = Some(PathBuf::from(value)),
                None => {
                    return CliExit {
                        code: 1,
                        output: "flag `--config` requires a value".to_string(),
                    }
                }
            },
            other => {
                return CliExit {
                    code: 1,
                    output: format!("unknown flag `{other}`"),
                }
            }
        }
    }

    let mut lines = Vec::new();
    let mut code = 0;
    let settings = match load_settings(config_path.as_deref(), &CliOverrides::default()) {
        Ok(settings) => {
            lines.push("ok   configuration parses and validates".to_string());
            Some(settings)
        }
        Err(err) => {
            lines.push(format!("fail configuration: {err}"));
            code = 2;
            None
        }
    };

    if let Some(settings) = settings {
        match locate_assistant_binary(
            &settings.assistant_binary,
            &settings.assistant_fallback_paths,
        ) {
            Ok(path) => lines.push(format!("ok   assistant binary at {}", path.display())),
            Err(err) => {
                lines.push(format!("fail assistant binary: {err}"));
                code = 1;
            }
        }
        lines.push(describe_dir("workspace_root", &settings.workspace_root));
        lines.push(describe_dir("runs_root", &settings.runs_root));
    }

    CliExit {
        code,
        output: lines.join("\n"),
    }
}

fn describe_dir(label: &str, path: &Path) -> String {
    if path.is_dir() {
        format!("ok   {label} exists at {}", path.display())
    } else {
        format!("note {label} will be created at {}", path.display())
    }
}

fn config_failure(err: ConfigError) -> CliExit {
    CliExit {
        code: 2,
        output: format!("configuration error: {err}"),
    }
}

fn run_failure(err: OrchestratorError) -> CliExit {
    match err {
        OrchestratorError::Config(inner) => config_failure(inner),
        other => CliExit {
            code: 1,
            output: format!("run aborted: {other}"),
        },
    }
}
