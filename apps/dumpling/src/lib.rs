//! # dumpling
//!
//! Command-line adapter for the dumpling crash-triage engine.
//!
//! Opens one store handle per process, bounds every store access with a
//! timeout and renders query results as text or JSON.

pub mod cli;
pub mod config;
