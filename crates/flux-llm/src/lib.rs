//! # flux-llm
//!
//! Chat provider abstraction for Flux.
//!
//! - [`ChatProvider`]: capability trait returning a cancellable stream of
//!   text deltas
//! - [`ProviderRegistry`]: identifier → provider lookup
//! - Vendor adapters for Anthropic, `OpenAI` and Gemini over a shared SSE parser
//! - [`testing::ScriptedProvider`] for exercising callers without a network

#![deny(unsafe_code)]

pub mod anthropic;
pub mod gemini;
pub mod openai;
pub mod provider;
pub mod registry;
pub mod sse;
pub mod testing;

pub use provider::{
    ChatProvider, ProviderError, ProviderResult, TextStream, cancellable, collect_text,
};
pub use registry::ProviderRegistry;
