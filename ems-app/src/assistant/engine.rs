//! The confirmation state machine.
//!
//! Per identity the only state is the row in the pending-action store: either
//! nothing is awaiting confirmation, or one unexpired action is. Each message
//! runs under that identity's lock, so load, act and delete/create happen as
//! one unit relative to the same identity's other messages.

use crate::assistant::action::Intent;
use crate::assistant::answer::{AnswerGenerator, EMPTY_QUESTION_REPLY};
use crate::assistant::classifier::IntentClassifier;
use crate::assistant::context::{ContextBuilder, ContextLimits};
use crate::assistant::executor::ActionExecutor;
use crate::assistant::locks::IdentityLocks;
use crate::assistant::preview;
use chrono::{DateTime, Utc};
use ems_llm::TextCompletion;
use ems_store::{Identity, PendingAction, Store, StoreError};
use std::sync::Arc;

const CONFIRM_PHRASES: &[&str] = &["yes", "y", "confirm", "ok", "okay", "do it", "go ahead"];
const CANCEL_PHRASES: &[&str] = &["no", "n", "cancel", "stop", "never mind", "abort"];

pub const CANCELLED_REPLY: &str = "Okay, I've cancelled that action and won't make any changes.";
pub const PERMISSION_DENIED_REPLY: &str = "It looks like you're asking me to modify events or bookings, but you're not registered as an organizer. You can still ask me questions about events and your own bookings.";
pub const PENDING_REMINDER: &str = "You still have a pending action waiting for confirmation.\n\nIf you'd like to proceed, type **yes**. To cancel, type **no**.\n\nI'll also treat your new message as a separate question.";
pub const SUPERSEDED_NOTICE: &str =
    "Your earlier pending action has been replaced by this new request.";
pub const STORE_FAULT_REPLY: &str =
    "Sorry, I couldn't reach the event records just now. Please try again in a moment.";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssistantSettings {
    pub pending_ttl_minutes: u32,
    pub classify_temperature: f32,
    pub answer_temperature: f32,
    pub context_limits: ContextLimits,
}

impl Default for AssistantSettings {
    fn default() -> Self {
        Self {
            pending_ttl_minutes: 5,
            classify_temperature: 0.1,
            answer_temperature: 0.2,
            context_limits: ContextLimits::default(),
        }
    }
}

/// How a message was routed. Carried alongside the reply for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Turn {
    Executed { committed: bool },
    Cancelled,
    Answered,
    Denied,
    Staged,
    Fault,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub turn: Turn,
}

impl Reply {
    fn new(text: impl Into<String>, turn: Turn) -> Self {
        Self {
            text: text.into(),
            turn,
        }
    }
}

enum Normalized {
    Confirm,
    Cancel,
    Other,
}

fn normalize(message: &str) -> Normalized {
    let folded = message.trim().to_lowercase();
    if CONFIRM_PHRASES.contains(&folded.as_str()) {
        Normalized::Confirm
    } else if CANCEL_PHRASES.contains(&folded.as_str()) {
        Normalized::Cancel
    } else {
        Normalized::Other
    }
}

pub struct Assistant {
    store: Store,
    classifier: IntentClassifier,
    answers: AnswerGenerator,
    executor: ActionExecutor,
    locks: IdentityLocks,
    settings: AssistantSettings,
}

impl Assistant {
    pub fn new(store: Store, llm: Arc<dyn TextCompletion>, settings: AssistantSettings) -> Self {
        let context = ContextBuilder::new(store.clone(), settings.context_limits);
        Self {
            classifier: IntentClassifier::new(llm.clone(), settings.classify_temperature),
            answers: AnswerGenerator::new(llm, context, settings.answer_temperature),
            executor: ActionExecutor::new(store.clone()),
            locks: IdentityLocks::new(),
            store,
            settings,
        }
    }

    pub async fn handle_message(&self, identity: &Identity, message: &str) -> Reply {
        self.handle_message_at(identity, message, Utc::now()).await
    }

    /// Routes one message. Always produces reply text; store faults are
    /// logged and answered with [`STORE_FAULT_REPLY`].
    #[tracing::instrument(level = "info", skip_all, fields(account_id = identity.account_id))]
    pub async fn handle_message_at(
        &self,
        identity: &Identity,
        message: &str,
        now: DateTime<Utc>,
    ) -> Reply {
        let message = message.trim();
        if message.is_empty() {
            return Reply::new(EMPTY_QUESTION_REPLY, Turn::Answered);
        }
        let _guard = self.locks.acquire(identity.account_id).await;
        let reply = match self.route(identity, message, now).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(error = %e, "record store fault while handling message");
                Reply::new(STORE_FAULT_REPLY, Turn::Fault)
            }
        };
        tracing::info!(turn = ?reply.turn, "message handled");
        reply
    }

    /// The caller's live pending action, dropping it if it has expired.
    pub async fn live_pending(
        &self,
        identity: &Identity,
        now: DateTime<Utc>,
    ) -> ems_store::Result<Option<PendingAction>> {
        self.store.live_pending_for(identity.account_id, now).await
    }

    pub fn prune_idle_locks(&self) -> usize {
        self.locks.prune_idle()
    }

    async fn route(
        &self,
        identity: &Identity,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<Reply, StoreError> {
        let mut pending = self.store.live_pending_for(identity.account_id, now).await?;

        if let Some(action) = pending.take() {
            match normalize(message) {
                Normalized::Confirm => {
                    if self.store.claim_pending(action.id).await? {
                        tracing::info!(pending_id = action.id, kind = %action.kind, "pending action confirmed");
                        let outcome = self.executor.execute(&action, now).await;
                        let committed = outcome.is_committed();
                        return Ok(Reply::new(outcome.into_text(), Turn::Executed { committed }));
                    }
                    tracing::warn!(pending_id = action.id, "pending action already claimed elsewhere");
                }
                Normalized::Cancel => {
                    self.store.claim_pending(action.id).await?;
                    tracing::info!(pending_id = action.id, kind = %action.kind, "pending action cancelled");
                    return Ok(Reply::new(CANCELLED_REPLY, Turn::Cancelled));
                }
                Normalized::Other => pending = Some(action),
            }
        }

        let awaiting = pending.is_some();
        let is_privileged = identity.is_privileged();
        let classification = self.classifier.classify(message, is_privileged).await;

        let reply = match classification.intent {
            Intent::None => {
                let answer = self.answers.answer(identity, message, now).await?;
                Reply::new(answer, Turn::Answered)
            }
            Intent::Action(kind) if !is_privileged => {
                tracing::info!(kind = %kind, "mutation requested without organizer approval");
                Reply::new(PERMISSION_DENIED_REPLY, Turn::Denied)
            }
            Intent::Action(kind) => {
                let staged = self
                    .store
                    .create_pending_for(
                        identity.account_id,
                        kind,
                        classification.params,
                        self.settings.pending_ttl_minutes,
                        now,
                    )
                    .await?;
                tracing::info!(
                    pending_id = staged.id,
                    kind = %kind,
                    expires_at = %staged.expires_at,
                    "pending action staged"
                );
                let preview = preview::render(kind, &staged.params, &classification.reason);
                let text = if awaiting {
                    format!("{SUPERSEDED_NOTICE}\n\n{preview}")
                } else {
                    preview
                };
                return Ok(Reply::new(text, Turn::Staged));
            }
        };

        if awaiting {
            Ok(Reply::new(
                format!("{PENDING_REMINDER}\n\n---\n\n{}", reply.text),
                reply.turn,
            ))
        } else {
            Ok(reply)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::executor::NOT_IMPLEMENTED_REPLY;
    use crate::assistant::preview::CONFIRM_INSTRUCTION;
    use crate::assistant::testing::{Fixture, ScriptedCompletion, ts};
    use chrono::Duration;
    use ems_store::{ActionKind, BookingStatus};
    use serde_json::json;

    const NONE: &str = r#"{"action":"none","reason":"question","params":{}}"#;
    const CREATE_LAUNCH: &str = r#"{"action":"create_event","reason":"asked to create an event","params":{"title":"Launch","venue_name":"Hall A","capacity":100,"ticket_price":null}}"#;

    fn assistant(fx: &Fixture, llm: &Arc<ScriptedCompletion>) -> Assistant {
        Assistant::new(fx.store.clone(), llm.clone(), AssistantSettings::default())
    }

    #[tokio::test]
    async fn create_event_round_trip() {
        let fx = Fixture::new().await;
        let llm = Arc::new(ScriptedCompletion::new([CREATE_LAUNCH]));
        let assistant = assistant(&fx, &llm);

        let staged = assistant
            .handle_message_at(&fx.organizer, "Create Launch at Hall A for 100 people", ts(0))
            .await;
        assert_eq!(staged.turn, Turn::Staged);
        assert!(staged.text.contains("Launch"));
        assert!(staged.text.contains("Hall A"));
        assert!(staged.text.contains(CONFIRM_INSTRUCTION));

        let pending = fx
            .store
            .most_recent_pending_for(fx.organizer.account_id)
            .await
            .expect("lookup")
            .expect("staged");
        assert_eq!(pending.kind, ActionKind::CreateEvent);
        assert_eq!(
            serde_json::Value::Object(pending.params.clone()),
            json!({"title":"Launch","venue_name":"Hall A","capacity":100,"ticket_price":null})
        );
        assert_eq!(pending.expires_at, ts(0) + Duration::minutes(5));

        let confirmed = assistant
            .handle_message_at(&fx.organizer, "  YES ", ts(60))
            .await;
        assert_eq!(confirmed.turn, Turn::Executed { committed: true });
        assert!(confirmed.text.starts_with("✅ Event 'Launch' has been created"));

        let events = fx
            .store
            .organizer_events(fx.organizer_id(), 30)
            .await
            .expect("events");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.title, "Launch");
        assert_eq!(events[0].event.organizer_id, fx.organizer_id());
        assert!(
            fx.store
                .most_recent_pending_for(fx.organizer.account_id)
                .await
                .expect("lookup")
                .is_none()
        );
        // Confirmation never reaches the model.
        assert_eq!(llm.requests().len(), 1);
    }

    #[tokio::test]
    async fn confirm_phrase_without_pending_is_classified() {
        let fx = Fixture::new().await;
        let llm = Arc::new(ScriptedCompletion::new([NONE, "Nothing is waiting on you."]));
        let assistant = assistant(&fx, &llm);

        let reply = assistant.handle_message_at(&fx.organizer, "yes", ts(0)).await;
        assert_eq!(reply.turn, Turn::Answered);
        assert_eq!(reply.text, "Nothing is waiting on you.");
        assert_eq!(llm.requests().len(), 2);
    }

    #[tokio::test]
    async fn expired_action_behaves_as_absent() {
        let fx = Fixture::new().await;
        let llm = Arc::new(ScriptedCompletion::new([CREATE_LAUNCH, NONE, "Nothing pending."]));
        let assistant = assistant(&fx, &llm);

        assistant
            .handle_message_at(&fx.organizer, "create Launch", ts(0))
            .await;
        let late = ts(0) + Duration::minutes(5) + Duration::seconds(1);
        let reply = assistant.handle_message_at(&fx.organizer, "yes", late).await;
        assert_eq!(reply.turn, Turn::Answered);
        assert_eq!(reply.text, "Nothing pending.");
        assert!(
            fx.store
                .organizer_events(fx.organizer_id(), 30)
                .await
                .expect("events")
                .is_empty()
        );
        assert_eq!(
            fx.store
                .count_pending_for(fx.organizer.account_id)
                .await
                .expect("count"),
            0
        );
    }

    #[tokio::test]
    async fn cancelling_twice_falls_through_the_second_time() {
        let fx = Fixture::new().await;
        let llm = Arc::new(ScriptedCompletion::new([CREATE_LAUNCH, NONE, "Okay."]));
        let assistant = assistant(&fx, &llm);

        assistant
            .handle_message_at(&fx.organizer, "create Launch", ts(0))
            .await;
        let first = assistant.handle_message_at(&fx.organizer, "Cancel", ts(10)).await;
        assert_eq!(first, Reply::new(CANCELLED_REPLY, Turn::Cancelled));

        let second = assistant.handle_message_at(&fx.organizer, "cancel", ts(20)).await;
        assert_eq!(second.turn, Turn::Answered);
        assert_eq!(second.text, "Okay.");
        assert!(
            fx.store
                .organizer_events(fx.organizer_id(), 30)
                .await
                .expect("events")
                .is_empty()
        );
    }

    #[tokio::test]
    async fn malformed_classifier_output_is_answered() {
        let fx = Fixture::new().await;
        let llm = Arc::new(ScriptedCompletion::new(["¯\\_(ツ)_/¯ not json", "Here is what I know."]));
        let assistant = assistant(&fx, &llm);

        let reply = assistant
            .handle_message_at(&fx.organizer, "delete everything", ts(0))
            .await;
        assert_eq!(reply.turn, Turn::Answered);
        assert_eq!(reply.text, "Here is what I know.");
        assert_eq!(
            fx.store
                .count_pending_for(fx.organizer.account_id)
                .await
                .expect("count"),
            0
        );
    }

    #[tokio::test]
    async fn participant_mutation_is_denied_without_staging() {
        let fx = Fixture::new().await;
        let llm = Arc::new(ScriptedCompletion::new([
            r#"{"action":"delete_event","reason":"asked to delete","params":{"identifier":"Expo"}}"#,
        ]));
        let assistant = assistant(&fx, &llm);

        let reply = assistant
            .handle_message_at(&fx.participant, "delete the Expo", ts(0))
            .await;
        assert_eq!(reply, Reply::new(PERMISSION_DENIED_REPLY, Turn::Denied));
        assert!(
            fx.store
                .most_recent_pending_for(fx.participant.account_id)
                .await
                .expect("lookup")
                .is_none()
        );
        assert!(
            llm.requests()[0]
                .user_prompt
                .starts_with("The user is a participant")
        );
    }

    #[tokio::test]
    async fn foreign_booking_failure_still_consumes_the_action() {
        let fx = Fixture::new().await;
        let rival = fx.rival_event("Rival Expo").await;
        let booking = fx.booking_for(rival.id, "guest@example.com").await;
        let cancel = format!(
            r#"{{"action":"cancel_booking","reason":"asked to cancel","params":{{"booking_id":{}}}}}"#,
            booking.id
        );
        let llm = Arc::new(ScriptedCompletion::new([cancel.as_str(), NONE, "No pending actions."]));
        let assistant = assistant(&fx, &llm);

        let staged = assistant
            .handle_message_at(&fx.organizer, "cancel that booking", ts(0))
            .await;
        assert_eq!(staged.turn, Turn::Staged);

        let failed = assistant.handle_message_at(&fx.organizer, "yes", ts(5)).await;
        assert_eq!(failed.turn, Turn::Executed { committed: false });
        assert_eq!(failed.text, "I couldn't find that booking under your events.");

        let again = assistant.handle_message_at(&fx.organizer, "yes", ts(10)).await;
        assert_eq!(again.turn, Turn::Answered);
        assert_eq!(again.text, "No pending actions.");

        let stored = fx
            .store
            .booking_by_id(booking.id)
            .await
            .expect("get")
            .expect("booking");
        assert_eq!(stored.status, BookingStatus::Approved);
    }

    #[tokio::test]
    async fn unrelated_message_keeps_pending_and_adds_reminder() {
        let fx = Fixture::new().await;
        let llm = Arc::new(ScriptedCompletion::new([CREATE_LAUNCH, NONE, "Two events this week."]));
        let assistant = assistant(&fx, &llm);

        let staged = assistant
            .handle_message_at(&fx.organizer, "create Launch", ts(0))
            .await;
        let question = assistant
            .handle_message_at(&fx.organizer, "what's on this week?", ts(30))
            .await;
        assert_eq!(question.turn, Turn::Answered);
        assert_eq!(
            question.text,
            format!("{PENDING_REMINDER}\n\n---\n\nTwo events this week.")
        );

        let pending = fx
            .store
            .live_pending_for(fx.organizer.account_id, ts(30))
            .await
            .expect("lookup")
            .expect("still pending");
        assert_eq!(pending.kind, ActionKind::CreateEvent);
        assert!(staged.text.contains("Launch"));
    }

    #[tokio::test]
    async fn new_mutation_supersedes_the_pending_one() {
        let fx = Fixture::new().await;
        let llm = Arc::new(ScriptedCompletion::new([
            CREATE_LAUNCH,
            r#"{"action":"create_venue","reason":"asked for a venue","params":{"name":"Dome"}}"#,
        ]));
        let assistant = assistant(&fx, &llm);

        assistant
            .handle_message_at(&fx.organizer, "create Launch", ts(0))
            .await;
        let replaced = assistant
            .handle_message_at(&fx.organizer, "actually add a venue called Dome", ts(30))
            .await;
        assert_eq!(replaced.turn, Turn::Staged);
        assert!(replaced.text.starts_with(SUPERSEDED_NOTICE));
        assert!(replaced.text.contains("`create_venue`"));
        assert_eq!(
            fx.store
                .count_pending_for(fx.organizer.account_id)
                .await
                .expect("count"),
            1
        );

        let confirmed = assistant.handle_message_at(&fx.organizer, "ok", ts(40)).await;
        assert_eq!(
            confirmed,
            Reply::new(NOT_IMPLEMENTED_REPLY, Turn::Executed { committed: false })
        );
        assert!(
            fx.store
                .organizer_events(fx.organizer_id(), 30)
                .await
                .expect("events")
                .is_empty()
        );
    }

    #[tokio::test]
    async fn concurrent_confirmations_execute_once() {
        let fx = Fixture::new().await;
        let llm = Arc::new(ScriptedCompletion::new([CREATE_LAUNCH, NONE, "Nothing pending."]));
        let assistant = Arc::new(assistant(&fx, &llm));

        assistant
            .handle_message_at(&fx.organizer, "create Launch", ts(0))
            .await;
        let (a, b) = tokio::join!(
            assistant.handle_message_at(&fx.organizer, "yes", ts(5)),
            assistant.handle_message_at(&fx.organizer, "go ahead", ts(5)),
        );
        let executed = [&a, &b]
            .iter()
            .filter(|r| r.turn == Turn::Executed { committed: true })
            .count();
        assert_eq!(executed, 1, "{a:?} / {b:?}");
        assert_eq!(
            fx.store
                .organizer_events(fx.organizer_id(), 30)
                .await
                .expect("events")
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn blank_message_is_not_classified() {
        let fx = Fixture::new().await;
        let llm = Arc::new(ScriptedCompletion::new(Vec::<&str>::new()));
        let assistant = assistant(&fx, &llm);
        let reply = assistant.handle_message_at(&fx.organizer, "   ", ts(0)).await;
        assert_eq!(reply.text, EMPTY_QUESTION_REPLY);
        assert!(llm.requests().is_empty());
    }

    #[test]
    fn phrase_sets_match_exactly_after_folding() {
        assert!(matches!(normalize(" Go Ahead "), Normalized::Confirm));
        assert!(matches!(normalize("NEVER MIND"), Normalized::Cancel));
        assert!(matches!(normalize("yes please"), Normalized::Other));
        assert!(matches!(normalize("nope"), Normalized::Other));
    }
}
