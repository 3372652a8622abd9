//! The conversational assistant: intent classification, read-only answers and
//! the confirm-before-commit workflow for mutations.

pub mod action;
pub mod answer;
pub mod classifier;
pub mod context;
pub mod engine;
pub mod executor;
pub mod locks;
pub mod preview;

pub use context::ContextLimits;
pub use engine::{Assistant, AssistantSettings};
