use crate::config::settings::{MAX_TIMEOUT_SECONDS, MIN_TIMEOUT_SECONDS};
use crate::config::{RoleBehaviors, Settings, TimeoutPolicy};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnTimeouts {
    pub handshake: Duration,
    pub idle: Duration,
    pub overall: Duration,
}

/// Pick the applicable timeout tuple for a role. Planner-policy roles get the
/// planner tuple, everything else the default tuple; all values are clamped
/// into the 1 s..=3600 s window and idle never exceeds overall.
pub fn resolve_turn_timeouts(behaviors: &RoleBehaviors, settings: &Settings) -> TurnTimeouts {
    let (idle_s, overall_s) = match behaviors.timeout_policy {
        TimeoutPolicy::Planner => (
            settings.idle_timeout_planner_s,
            settings.overall_timeout_planner_s,
        ),
        TimeoutPolicy::Default => (
            settings.idle_timeout_default_s,
            settings.overall_timeout_default_s,
        ),
    };
    let overall_s = clamp_seconds(overall_s);
    let idle_s = clamp_seconds(idle_s).min(overall_s);
    TurnTimeouts {
        handshake: Duration::from_secs(clamp_seconds(settings.handshake_timeout_s)),
        idle: Duration::from_secs(idle_s),
        overall: Duration::from_secs(overall_s),
    }
}

fn clamp_seconds(value: u64) -> u64 {
    value.clamp(MIN_TIMEOUT_SECONDS, MAX_TIMEOUT_SECONDS)
}
