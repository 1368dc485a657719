use roundtable::config::{RoleBehaviors, Settings, TimeoutPolicy};
use roundtable::orchestration::resolve_turn_timeouts;
use std::time::Duration;

fn behaviors(policy: TimeoutPolicy) -> RoleBehaviors {
    RoleBehaviors {
        timeout_policy: policy,
        apply_files: false,
        can_finish: false,
    }
}

#[test]
fn planner_policy_selects_the_planner_tuple() {
    let settings = Settings {
        idle_timeout_default_s: 100,
        overall_timeout_default_s: 800,
        idle_timeout_planner_s: 200,
        overall_timeout_planner_s: 1600,
        handshake_timeout_s: 10,
        ..Settings::default()
    };

    let planner = resolve_turn_timeouts(&behaviors(TimeoutPolicy::Planner), &settings);
    assert_eq!(planner.idle, Duration::from_secs(200));
    assert_eq!(planner.overall, Duration::from_secs(1600));
    assert_eq!(planner.handshake, Duration::from_secs(10));

    let default = resolve_turn_timeouts(&behaviors(TimeoutPolicy::Default), &settings);
    assert_eq!(default.idle, Duration::from_secs(100));
    assert_eq!(default.overall, Duration::from_secs(800));
}

#[test]
fn out_of_range_values_are_clamped() {
    let settings = Settings {
        idle_timeout_default_s: 0,
        overall_timeout_default_s: 100_000,
        ..Settings::default()
    };
    let resolved = resolve_turn_timeouts(&behaviors(TimeoutPolicy::Default), &settings);
    assert_eq!(resolved.idle, Duration::from_secs(1));
    assert_eq!(resolved.overall, Duration::from_secs(3600));
}

#[test]
fn idle_never_exceeds_overall() {
    let settings = Settings {
        idle_timeout_default_s: 900,
        overall_timeout_default_s: 300,
        ..Settings::default()
    };
    let resolved = resolve_turn_timeouts(&behaviors(TimeoutPolicy::Default), &settings);
    assert_eq!(resolved.idle, resolved.overall);
}
