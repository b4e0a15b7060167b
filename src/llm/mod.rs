pub mod client;
pub mod models;
pub mod parse;
pub mod prompts;

pub use client::{ChatMessage, LanguageModel, LlmResponse, ModelRequest, OpenRouterClient, Role};
pub use models::{Model, Usage};
