//! # flux-server
//!
//! Axum HTTP and WebSocket server for the Flux assistant.
//!
//! - **WebSocket**: connection hub with bounded per-client queues, ping
//!   liveness and idle timeouts
//! - **Session handler**: routes chat and self-modification envelopes
//! - **Publish**: branch, apply, commit, push and pull request for approved
//!   change requests
//! - **HTTP**: health, provider listing, change history, read-only code
//!   browsing and Prometheus metrics
//! - **Shutdown**: graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod code;
pub mod config;
pub mod handler;
pub mod health;
pub mod metrics;
pub mod publish;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use handler::SessionHandler;
pub use publish::{PublishOrchestrator, PublishTarget, StatusReporter};
pub use server::{AppState, FluxServer, ServerDeps};
pub use shutdown::{DEFAULT_DRAIN_TIMEOUT, ShutdownCoordinator};
pub use websocket::hub::{ConnectionHub, HubError};
