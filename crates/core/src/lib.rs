//! # Membank Core
//!
//! Orchestration core that turns a source repository into a memory bank:
//! markdown and JSON documentation written by LLM agents.
//!
//! ## Architecture
//!
//! - `invoker/` - the agent backend seam (Claude CLI, offline) and turn tracking
//! - `manifest/` - architecture manifest model and markdown parser
//! - `agents/` - architecture, component and validation agents
//! - `swarm/` - bounded fan-out, orchestrators, builders and progress events
//! - `state/` - build configuration, persisted settings, jobs, artifact IO
//! - `cost` / `models` - token accounting and model pricing
//!
//! ## Usage
//!
//! ```rust,ignore
//! use membank_core::invoker::ClaudeCliInvoker;
//! use membank_core::state::BuildConfig;
//! use membank_core::swarm::{run_build, Progress};
//! use std::sync::Arc;
//!
//! let config = BuildConfig::new("./my-repo", "./my-repo-memory-bank");
//! let result = run_build(&config, Arc::new(ClaudeCliInvoker::default()), &Progress::silent()).await;
//! ```

pub mod agents;
pub mod cost;
pub mod error;
pub mod invoker;
pub mod manifest;
pub mod models;
pub mod state;
pub mod swarm;

pub use error::{BuildError, InvokerError, Result};
