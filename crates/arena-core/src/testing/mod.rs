//! Testing utilities for deterministic scheduler runs.

pub mod scripted_generator;

pub use scripted_generator::{RecordedPrompt, ScriptedGenerator, ScriptedReply};
