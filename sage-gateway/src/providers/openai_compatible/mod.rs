//! OpenAI-compatible provider implementation (OpenAI and local servers
//! speaking the Chat Completions API).

pub mod client;

pub use client::OpenAiCompatibleClient;
