use crate::config::PromptFlags;
use serde_json::{Map, Value};

/// The assistant app-server's wire vocabulary. This module is the only place
/// that reads or writes raw message field names; everything else deals in
/// [`Event`] values and the builder functions below.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalCategory {
    Exec,
    Write,
    Read,
    Patch,
    Other,
}

impl ApprovalCategory {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "exec" => Self::Exec,
            "write" => Self::Write,
            "read" => Self::Read,
            "patch" => Self::Patch,
            _ => Self::Other,
        }
    }

    /// Approval policy: a request is granted iff the role's prompt flags
    /// allow the requested action category.
    pub fn allowed_by(self, flags: &PromptFlags) -> bool {
        match self {
            Self::Exec => flags.allow_tools,
            Self::Write | Self::Patch => flags.allow_write,
            Self::Read => flags.allow_read,
            Self::Other => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    ThreadStarted {
        thread_id: String,
    },
    ApprovalRequest {
        approval_id: String,
        category: ApprovalCategory,
    },
    ItemDelta {
        text: String,
    },
    ItemCompleted {
        text: String,
    },
    TurnCompleted {
        usage: Option<Value>,
    },
    Ignored,
}

pub fn classify(message: &Value) -> Event {
    let kind = message.get("type").and_then(Value::as_str).unwrap_or("");
    match kind {
        "thread/started" => {
            let Some(thread_id) = message.get("thread_id").and_then(Value::as_str) else {
                return Event::Ignored;
            };
            Event::ThreadStarted {
                thread_id: thread_id.to_string(),
            }
        }
        "approval/request" => {
            let Some(approval_id) = message.get("approval_id").and_then(Value::as_str) else {
                return Event::Ignored;
            };
            let category = message
                .get("action")
                .and_then(Value::as_str)
                .map(ApprovalCategory::parse)
                .unwrap_or(ApprovalCategory::Other);
            Event::ApprovalRequest {
                approval_id: approval_id.to_string(),
                category,
            }
        }
        "item/delta" => Event::ItemDelta {
            text: message
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
        },
        "item/completed" => Event::ItemCompleted {
            text: message
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
        },
        "turn/completed" => Event::TurnCompleted {
            usage: message.get("usage").cloned(),
        },
        _ => Event::Ignored,
    }
}

pub fn initialize_message() -> Value {
    Value::Object(Map::from_iter([
        ("type".to_string(), Value::String("initialize".to_string())),
        (
            "capabilities".to_string(),
            Value::Object(Map::from_iter([(
                "streaming".to_string(),
                Value::Bool(true),
            )])),
        ),
    ]))
}

pub fn turn_start_message(
    thread_id: &str,
    prompt: &str,
    model: &str,
    reasoning_effort: &str,
    flags: &PromptFlags,
    skills: &[String],
) -> Value {
    let flags_value = Value::Object(Map::from_iter([
        ("allow_tools".to_string(), Value::Bool(flags.allow_tools)),
        ("allow_read".to_string(), Value::Bool(flags.allow_read)),
        ("allow_write".to_string(), Value::Bool(flags.allow_write)),
        (
            "allow_file_suggestions".to_string(),
            Value::Bool(flags.allow_file_suggestions),
        ),
    ]));
    Value::Object(Map::from_iter([
        ("type".to_string(), Value::String("turn/start".to_string())),
        ("thread_id".to_string(), Value::String(thread_id.to_string())),
        ("prompt".to_string(), Value::String(prompt.to_string())),
        ("model".to_string(), Value::String(model.to_string())),
        (
            "reasoning_effort".to_string(),
            Value::String(reasoning_effort.to_string()),
        ),
        ("flags".to_string(), flags_value),
        (
            "skills".to_string(),
            Value::Array(
                skills
                    .iter()
                    .map(|name| Value::String(name.clone()))
                    .collect(),
            ),
        ),
    ]))
}

pub fn approval_reply_message(approval_id: &str, approve: bool) -> Value {
    Value::Object(Map::from_iter([
        (
            "type".to_string(),
            Value::String("approval/reply".to_string()),
        ),
        (
            "approval_id".to_string(),
            Value::String(approval_id.to_string()),
        ),
        (
            "decision".to_string(),
            Value::String(if approve { "approve" } else { "deny" }.to_string()),
        ),
    ]))
}

pub fn shutdown_message() -> Value {
    Value::Object(Map::from_iter([(
        "type".to_string(),
        Value::String("shutdown".to_string()),
    )]))
}
