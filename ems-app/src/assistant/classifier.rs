use crate::assistant::action::{Classification, Intent};
use ems_llm::{CompletionRequest, TextCompletion};
use ems_store::{ActionKind, ActionParams};
use serde_json::Value;
use std::sync::Arc;

pub const UNPARSEABLE_REASON: &str = "unparseable model output";

const SYSTEM_PROMPT: &str = r#"You are an action planner for an Event Management System (EMS).

You receive a single user message and must decide if it is asking to perform
a WRITE operation, and if so, extract the parameters.

Valid actions:
- "create_event"
- "update_event"
- "delete_event"
- "create_venue"
- "cancel_booking"
- "none"  (for purely informational / read-only questions)

Respond with a single line of JSON and nothing else:
{"action": "<one of the actions above>", "reason": "<short explanation>", "params": {...}}

Guidelines:
- If you are not sure there is a write operation, use "action": "none".
- For create_event, extract when given: title, venue_name, type (e.g. "Concert",
  "Sports"), capacity (integer), ticket_price (number), start, end,
  description, status ("DRAFT" or "PUBLISHED").
- For delete_event or update_event, include an "identifier" that is either an
  event id or an exact event title. For update_event also include the fields
  to change.
- For create_venue, include name, address, capacity and type.
- For cancel_booking, include booking_id (integer).
- Write every datetime as "YYYY-MM-DD HH:MM" (24-hour, no timezone), for
  example "2025-12-05 19:00". Never use vague phrases like "next Friday".
"#;

const ORGANIZER_HINT: &str = "The user is an organizer and can manage events and venues.";
const PARTICIPANT_HINT: &str =
    "The user is a participant and CANNOT create, edit, or delete events/venues.";

/// Turns a chat message into a [`Classification`].
///
/// Never fails: transport errors and malformed output both come back as
/// [`Intent::None`].
pub struct IntentClassifier {
    llm: Arc<dyn TextCompletion>,
    temperature: f32,
}

impl IntentClassifier {
    pub fn new(llm: Arc<dyn TextCompletion>, temperature: f32) -> Self {
        Self { llm, temperature }
    }

    #[tracing::instrument(level = "info", skip_all, fields(is_privileged = is_privileged))]
    pub async fn classify(&self, message: &str, is_privileged: bool) -> Classification {
        let role_hint = if is_privileged {
            ORGANIZER_HINT
        } else {
            PARTICIPANT_HINT
        };
        let user_prompt = format!("{role_hint}\n\nUser message:\n```{message}```");
        let request = CompletionRequest::new(SYSTEM_PROMPT, user_prompt, self.temperature);

        let classification = match self.llm.complete(request).await {
            Ok(raw) => parse_classification(&raw),
            Err(e) => {
                tracing::warn!(error = %e, "classifier completion failed; treating as no action");
                Classification::none(format!("classifier unavailable: {e}"))
            }
        };
        tracing::info!(
            intent = classification.intent.as_str(),
            param_count = classification.params.len(),
            "message classified"
        );
        classification
    }
}

/// Decodes one line of model output, degrading anything unexpected to
/// [`Intent::None`].
pub fn parse_classification(raw: &str) -> Classification {
    let Ok(Value::Object(mut object)) = serde_json::from_str::<Value>(strip_code_fence(raw))
    else {
        tracing::debug!(raw_chars = raw.chars().count(), "classifier output is not a JSON object");
        return Classification::none(UNPARSEABLE_REASON);
    };
    let Some(action) = object.get("action").and_then(Value::as_str).map(str::to_string) else {
        return Classification::none(UNPARSEABLE_REASON);
    };

    let reason = match object.remove("reason") {
        Some(Value::String(reason)) => reason.trim().to_string(),
        _ => String::new(),
    };
    let intent = match action.trim() {
        "none" => Intent::None,
        other => match other.parse::<ActionKind>() {
            Ok(kind) if kind.as_str() == other => Intent::Action(kind),
            _ => {
                tracing::debug!(action = other, "unknown action kind coerced to none");
                Intent::None
            }
        },
    };
    let params = match (intent, object.remove("params")) {
        (Intent::None, _) => ActionParams::new(),
        (_, Some(Value::Object(params))) => params,
        _ => ActionParams::new(),
    };

    Classification {
        intent,
        reason,
        params,
    }
}

/// Models sometimes wrap the JSON line in a markdown fence.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}
