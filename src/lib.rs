//! Text-to-SQL generation and evaluation harness.
//!
//! A request flows through the [`prompts::PromptFactory`] (schema text from
//! [`schema`], exemplars from [`retriever`]), then to an [`llm::LlmClient`],
//! and optionally through [`selection`] when several candidates compete.
//! [`eval`] scores the resulting SQL by execution accuracy.

pub mod config;
pub mod db;
pub mod error;
pub mod eval;
pub mod llm;
pub mod pipeline;
pub mod prompts;
pub mod retriever;
pub mod schema;
pub mod selection;
pub mod util;
pub mod web;

pub use error::{Result, Text2SqlError};
