//! # flux-selfmod
//!
//! Turns a natural-language change request into a reviewable patch set and
//! applies it once approved.
//!
//! - [`ChangeEngine`]: request store, history, and the
//!   `pending → approved | rejected` state machine
//! - [`validation`]: protected-path, traversal, action and size checks
//! - [`diff`]: deterministic unified diffs against the working tree
//! - [`context`]: working-tree summary fed to the model
//! - [`response`]: extraction of the model's JSON proposal

#![deny(unsafe_code)]

pub mod context;
pub mod diff;
pub mod engine;
pub mod errors;
pub mod prompt;
pub mod response;
pub mod types;
pub mod validation;

pub use engine::{ChangeEngine, EngineConfig};
pub use errors::{Result, SelfModError};
pub use types::{ChangeAction, ChangeRequest, ChangeStatus, FileChange};
