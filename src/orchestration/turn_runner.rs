use crate::assistant::wire::{
    approval_reply_message, classify, initialize_message, turn_start_message, Event,
};
use crate::assistant::{NextMessage, Transport, TransportError};
use crate::config::RoleSpec;
use crate::orchestration::error::OrchestratorError;
use crate::orchestration::timeouts::TurnTimeouts;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

const DRAIN_POLL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionReason {
    Normal,
    IdleTimeout,
    OverallTimeout,
    TransportClosed,
    Cancelled,
}

impl CompletionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::IdleTimeout => "idle_timeout",
            Self::OverallTimeout => "overall_timeout",
            Self::TransportClosed => "transport_closed",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnResult {
    pub assistant_text: String,
    pub delta_text: String,
    pub item_texts: Vec<String>,
    pub completion_reason: CompletionReason,
}

impl TurnResult {
    fn finish(
        delta_text: String,
        item_texts: Vec<String>,
        completion_reason: CompletionReason,
    ) -> Self {
        let assistant_text = if item_texts.is_empty() {
            delta_text.clone()
        } else {
            item_texts.join("\n")
        };
        Self {
            assistant_text,
            delta_text,
            item_texts,
            completion_reason,
        }
    }
}

/// Drive one prompt/response turn against a role's transport.
///
/// Handshake once per transport lifetime, then `turn/start`, then the collect
/// loop. The idle deadline is pushed forward only by `item/delta` and
/// `item/completed`; approvals are answered inline without touching it. The
/// overall deadline is absolute for the turn.
pub fn run_turn(
    transport: &mut Transport,
    spec: &RoleSpec,
    prompt: &str,
    timeouts: &TurnTimeouts,
    cancel: &AtomicBool,
) -> Result<TurnResult, OrchestratorError> {
    if transport.needs_drain() {
        drain_stale_events(transport);
        transport.set_needs_drain(false);
    }

    if transport.thread_id().is_none() {
        perform_handshake(transport, timeouts)?;
    }
    let thread_id = transport
        .thread_id()
        .unwrap_or_default()
        .to_string();

    let start = turn_start_message(
        &thread_id,
        prompt,
        &spec.model,
        &spec.reasoning_effort,
        &spec.prompt_flags,
        &spec.skills,
    );
    if transport.send(&start).is_err() {
        return Ok(TurnResult::finish(
            String::new(),
            Vec::new(),
            CompletionReason::TransportClosed,
        ));
    }

    let mut delta_text = String::new();
    let mut item_texts = Vec::new();
    let overall_deadline = Instant::now() + timeouts.overall;
    let mut idle_deadline = Instant::now() + timeouts.idle;

    loop {
        if cancel.load(Ordering::Relaxed) {
            transport.set_needs_drain(true);
            return Ok(TurnResult::finish(
                delta_text,
                item_texts,
                CompletionReason::Cancelled,
            ));
        }

        let now = Instant::now();
        if now >= overall_deadline {
            transport.set_needs_drain(true);
            return Ok(TurnResult::finish(
                delta_text,
                item_texts,
                CompletionReason::OverallTimeout,
            ));
        }
        if now >= idle_deadline {
            transport.set_needs_drain(true);
            return Ok(TurnResult::finish(
                delta_text,
                item_texts,
                CompletionReason::IdleTimeout,
            ));
        }

        let wait = idle_deadline.min(overall_deadline).saturating_duration_since(now);
        match transport.next(wait) {
            NextMessage::TimedOut => continue,
            NextMessage::Closed => {
                return Ok(TurnResult::finish(
                    delta_text,
                    item_texts,
                    CompletionReason::TransportClosed,
                ));
            }
            NextMessage::Message(message) => match classify(&message) {
                Event::ThreadStarted { .. } => {}
                Event::ApprovalRequest {
                    approval_id,
                    category,
                } => {
                    let approve = category.allowed_by(&spec.prompt_flags);
                    let reply = approval_reply_message(&approval_id, approve);
                    if transport.send(&reply).is_err() {
                        return Ok(TurnResult::finish(
                            delta_text,
                            item_texts,
                            CompletionReason::TransportClosed,
                        ));
                    }
                }
                Event::ItemDelta { text } => {
                    delta_text.push_str(&text);
                    idle_deadline = Instant::now() + timeouts.idle;
                }
                Event::ItemCompleted { text } => {
                    item_texts.push(text);
                    idle_deadline = Instant::now() + timeouts.idle;
                }
                Event::TurnCompleted { .. } => {
                    return Ok(TurnResult::finish(
                        delta_text,
                        item_texts,
                        CompletionReason::Normal,
                    ));
                }
                Event::Ignored => {}
            },
        }
    }
}

fn perform_handshake(
    transport: &mut Transport,
    timeouts: &TurnTimeouts,
) -> Result<(), OrchestratorError> {
    let role = transport.role_name().to_string();
    transport
        .send(&initialize_message())
        .map_err(|source| OrchestratorError::Transport {
            role: role.clone(),
            source,
        })?;

    let deadline = Instant::now() + timeouts.handshake;
    loop {
        let now = Instant::now();
        if now >= deadline {
            return Err(OrchestratorError::HandshakeTimeout {
                role,
                timeout_ms: timeouts.handshake.as_millis() as u64,
            });
        }
        match transport.next(deadline.saturating_duration_since(now)) {
            NextMessage::TimedOut => continue,
            NextMessage::Closed => {
                return Err(OrchestratorError::Transport {
                    role: role.clone(),
                    source: TransportError::Closed { role },
                });
            }
            NextMessage::Message(message) => {
                if let Event::ThreadStarted { thread_id } = classify(&message) {
                    transport.set_thread_id(thread_id);
                    return Ok(());
                }
            }
        }
    }
}

/// After a turn ended without seeing `turn/completed`, stale events for that
/// turn may still be queued. Discard them up to the next `turn/completed`,
/// giving up after a short silent poll.
fn drain_stale_events(transport: &Transport) {
    loop {
        match transport.next(DRAIN_POLL) {
            NextMessage::Message(message) => {
                if matches!(classify(&message), Event::TurnCompleted { .. }) {
                    return;
                }
            }
            NextMessage::TimedOut | NextMessage::Closed => return,
        }
    }
}
