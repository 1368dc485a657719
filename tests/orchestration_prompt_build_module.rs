use roundtable::config::RoleSpec;
use roundtable::orchestration::prompt_build::{assemble_prompt, PromptContext, REPAIR_INSTRUCTION};
use serde_json::json;

fn sample_spec() -> RoleSpec {
    RoleSpec {
        system_instructions: "You plan the work.".to_string(),
        schema_hint: "{\"summary\": string, \"status\": string}".to_string(),
        skills: vec!["estimate".to_string(), "review".to_string()],
        ..RoleSpec::default()
    }
}

#[test]
fn sections_appear_in_the_documented_order() {
    let payload = json!({"goal": "ship it"});
    let spec = sample_spec();
    let prompt = assemble_prompt(&PromptContext {
        role_name: "planner",
        spec: &spec,
        goal: "ship it",
        cycle_index: 1,
        payload: &payload,
        payload_cap: 64 * 1024,
        is_repair: false,
    });

    let sections = [
        "## Role: planner (cycle 1)",
        "## System instructions",
        "## Skills",
        "## Goal",
        "## Incoming payload",
        "## Rules",
        "## Output contract",
        "## Schema hint",
    ];
    let mut cursor = 0;
    for section in sections {
        let at = prompt[cursor..]
            .find(section)
            .unwrap_or_else(|| panic!("missing section `{section}`"));
        cursor += at + section.len();
    }
    assert!(prompt.contains("- estimate"));
    assert!(prompt.contains("ship it"));
    assert!(!prompt.contains("## Repair"));
}

#[test]
fn repair_prompts_end_with_the_repair_instruction() {
    let payload = json!({});
    let spec = sample_spec();
    let prompt = assemble_prompt(&PromptContext {
        role_name: "planner",
        spec: &spec,
        goal: "ship it",
        cycle_index: 2,
        payload: &payload,
        payload_cap: 64 * 1024,
        is_repair: true,
    });
    assert!(prompt.contains("## Repair"));
    assert!(prompt.trim_end().ends_with(REPAIR_INSTRUCTION));
}

#[test]
fn oversized_payloads_are_truncated_with_a_marker() {
    let payload = json!({"blob": "y".repeat(4096)});
    let spec = sample_spec();
    let prompt = assemble_prompt(&PromptContext {
        role_name: "planner",
        spec: &spec,
        goal: "ship it",
        cycle_index: 1,
        payload: &payload,
        payload_cap: 256,
        is_repair: false,
    });
    assert!(prompt.contains("… (payload truncated)"));
    assert!(!prompt.contains(&"y".repeat(1024)));
}

#[test]
fn empty_optional_sections_render_placeholders() {
    let payload = json!({});
    let spec = RoleSpec::default();
    let prompt = assemble_prompt(&PromptContext {
        role_name: "reviewer",
        spec: &spec,
        goal: "g",
        cycle_index: 1,
        payload: &payload,
        payload_cap: 1024,
        is_repair: false,
    });
    assert!(prompt.contains("## System instructions\n(none)"));
    assert!(prompt.contains("## Skills\n(none)"));
    assert!(prompt.contains("## Schema hint\n(none)"));
}
