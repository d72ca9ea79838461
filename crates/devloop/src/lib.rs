//! devloop: an autonomous coding-agent loop
//!
//! The run loop asks a model for the next action, dispatches the tool calls
//! it requests against a sandboxed workspace and folds every result back
//! into a durable session, round after round.

pub mod agent;
pub mod browser;
pub mod config;
pub mod sandbox;
pub mod session;
pub mod terminal;
pub mod tools;
pub mod walk;
