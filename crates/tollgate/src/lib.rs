//! Tollgate - recording LLM proxy with subagent routing
//!
//! This crate provides a transparent HTTP proxy that sits between a CLI
//! coding assistant and LLM APIs. Every request/response pair is written to
//! SQLite, and subagent requests can be routed to other providers by the
//! fingerprint of their system prompt.

pub mod config;
pub mod encoding;
pub mod error;
pub mod provider;
pub mod proxy;
pub mod record;
pub mod router;
pub mod storage;
pub mod testing;
pub mod translate;

pub use error::TollgateError;
