//! Text-completion client for the EMS assistant.
//!
//! One request in, one assistant reply out. Transport, status and body
//! problems all surface as [`LlmError`].

mod client;
mod error;
mod ollama;
mod openai;
mod types;

pub use client::{LlmClient, Provider, TextCompletion};
pub use error::{LlmError, Result};
pub use types::{ChatMessage, CompletionRequest, Role};
