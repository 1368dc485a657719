use crate::config::RoleSpec;
use crate::orchestration::json_extract::truncate_to_char_boundary;
use serde_json::Value;

pub const REPAIR_INSTRUCTION: &str =
    "Return ONLY the JSON object matching the previous request, no prose, no code fence.";

#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub role_name: &'a str,
    pub spec: &'a RoleSpec,
    pub goal: &'a str,
    pub cycle_index: u32,
    pub payload: &'a Value,
    pub payload_cap: usize,
    pub is_repair: bool,
}

/// Assemble the prompt for one role turn. Pure string construction; the
/// section order is fixed and every section is always present.
pub fn assemble_prompt(ctx: &PromptContext<'_>) -> String {
    let mut sections = Vec::new();

    sections.push(format!(
        "## Role: {} (cycle {})",
        ctx.role_name, ctx.cycle_index
    ));

    sections.push(format!(
        "## System instructions\n{}",
        non_empty_or(&ctx.spec.system_instructions, "(none)")
    ));

    let skills = if ctx.spec.skills.is_empty() {
        "(none)".to_string()
    } else {
        ctx.spec
            .skills
            .iter()
            .map(|name| format!("- {name}"))
            .collect::<Vec<_>>()
            .join("\n")
    };
    sections.push(format!("## Skills\n{skills}"));

    sections.push(format!("## Goal\n{}", ctx.goal));

    let pretty =
        serde_json::to_string_pretty(ctx.payload).unwrap_or_else(|_| "{}".to_string());
    let payload_section = if pretty.len() > ctx.payload_cap {
        format!(
            "{}\n… (payload truncated)",
            truncate_to_char_boundary(&pretty, ctx.payload_cap)
        )
    } else {
        pretty
    };
    sections.push(format!("## Incoming payload\n{payload_section}"));

    sections.push(format!("## Rules\n{}", rules_block(ctx.spec)));

    sections.push(
        "## Output contract\nRespond with exactly one JSON object. No prose before or after \
         it. No code fence. The object must be self-contained and parse as-is."
            .to_string(),
    );

    sections.push(format!(
        "## Schema hint\n{}",
        non_empty_or(&ctx.spec.schema_hint, "(none)")
    ));

    if ctx.is_repair {
        sections.push(format!("## Repair\n{REPAIR_INSTRUCTION}"));
    }

    sections.join("\n\n")
}

fn rules_block(spec: &RoleSpec) -> String {
    let mut rules = Vec::new();
    rules.push(if spec.prompt_flags.allow_tools {
        "- You may execute commands in the workspace."
    } else {
        "- Do not execute commands."
    });
    rules.push(if spec.prompt_flags.allow_read {
        "- You may read files in the workspace."
    } else {
        "- Do not read workspace files."
    });
    rules.push(if spec.prompt_flags.allow_write {
        "- You may modify files in the workspace."
    } else {
        "- Do not modify workspace files directly."
    });
    rules.push(if spec.prompt_flags.allow_file_suggestions {
        "- Propose file changes in a `files` array of {path, content} objects."
    } else {
        "- Do not propose file changes."
    });
    rules.join("\n")
}

fn non_empty_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.trim().is_empty() {
        fallback
    } else {
        value
    }
}
