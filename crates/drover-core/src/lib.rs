//! drover-core: Core library for drover
//!
//! drover drives a sequence of declarative page-interaction steps,
//! written in a small textual command language, against a live web page.
//! Scripts survive interruptions — including full page reloads and
//! navigations triggered by the steps themselves — because every state
//! transition is flushed to a durable store before any side effect that
//! could tear the process down.
//!
//! # Architecture
//!
//! ```text
//! Script text → Parser → Queue (persisted in Store)
//!                             ↓
//!                    Engine pulls next pending
//!                             ↓
//!                PageAdapter executes on the page
//!                             ↓
//!                Engine updates Queue in Store → loop
//! ```
//!
//! Navigation-type steps may terminate the host process; on the next
//! process start, [`session::resume_session`] re-enters the engine
//! against the same store, resuming exactly at the first not-done step.
//!
//! # Modules
//!
//! - `script`: Command parser and the instruction queue model
//! - `store`: Durable queue/draft storage (SQLite and in-memory)
//! - `adapter`: Page interaction seam and a deterministic simulated page
//! - `engine`: Retry scheduler — the core state machine
//! - `session`: Process-start bootstrap and resume policy
//! - `config`: Configuration management
//! - `logging`: Structured logging setup
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod adapter;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod script;
pub mod session;
pub mod store;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
