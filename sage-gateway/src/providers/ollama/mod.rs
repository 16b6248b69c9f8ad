//! Ollama provider implementation.

pub mod client;

pub use client::OllamaClient;
