//! shepherd-core library.
//!
//! Everything the supervisor needs below the command line: the delay queue,
//! the issue and advisory state machines, the transition rule evaluator, the
//! xunit comparison engine and the baseline reproduction workflow.
//!
//! # Conventions
//!
//! - **Errors**: `anyhow::Result` at collaborator boundaries, `thiserror` enums
//!   for failures callers match on.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`).

pub mod baseline;
pub mod cache;
pub mod collect;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod model;
pub mod queue;
pub mod rules;
pub mod services;
pub mod xunit;
