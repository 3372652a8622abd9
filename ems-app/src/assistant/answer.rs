use crate::assistant::context::ContextBuilder;
use chrono::{DateTime, Utc};
use ems_llm::{CompletionRequest, TextCompletion};
use ems_store::Identity;
use std::sync::Arc;

pub const EMPTY_QUESTION_REPLY: &str = "I didn't receive a question. Please type what you'd like to know about your events or bookings.";
pub const BACKEND_UNAVAILABLE_REPLY: &str =
    "I had trouble contacting the AI backend. Please try again in a moment.";

const SYSTEM_PROMPT: &str = r#"You are an AI assistant for an Event Management System (EMS).

You are given:
- The current user (an organizer or a participant).
- A small snapshot of relevant data from the EMS database.
- The user's natural-language question.

Answer clearly and concisely, using ONLY the information in the snapshot plus
general knowledge about how events and bookings work. Do not invent events or
bookings that are not in the snapshot.

If the user asks for something the snapshot does not show, say so and suggest
what they could do instead (ask the organizer, check another page, etc.).

Use plain language, one to three short paragraphs, with bullet points only
when they help readability."#;

/// Answers read-only questions from a snapshot of the caller's records.
pub struct AnswerGenerator {
    llm: Arc<dyn TextCompletion>,
    context: ContextBuilder,
    temperature: f32,
}

impl AnswerGenerator {
    pub fn new(llm: Arc<dyn TextCompletion>, context: ContextBuilder, temperature: f32) -> Self {
        Self {
            llm,
            context,
            temperature,
        }
    }

    /// Completion failures become [`BACKEND_UNAVAILABLE_REPLY`]; only store
    /// faults while building the snapshot are returned as errors.
    #[tracing::instrument(level = "info", skip_all, fields(account_id = identity.account_id))]
    pub async fn answer(
        &self,
        identity: &Identity,
        question: &str,
        now: DateTime<Utc>,
    ) -> ems_store::Result<String> {
        let question = question.trim();
        if question.is_empty() {
            return Ok(EMPTY_QUESTION_REPLY.to_string());
        }
        let snapshot = self.context.build(identity, now).await?;
        let user_prompt = format!(
            "Here is a snapshot of the EMS database relevant to the current user:\n\n\
             ---BEGIN CONTEXT---\n{snapshot}\n---END CONTEXT---\n\n\
             User question:\n{question}\n\n\
             Answer using only the context above and general event-management knowledge."
        );
        let request = CompletionRequest::new(SYSTEM_PROMPT, user_prompt, self.temperature);
        match self.llm.complete(request).await {
            Ok(reply) => Ok(reply.trim().to_string()),
            Err(e) => {
                tracing::warn!(error = %e, "answer completion failed");
                Ok(BACKEND_UNAVAILABLE_REPLY.to_string())
            }
        }
    }
}
