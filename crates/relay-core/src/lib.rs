//! Core forwarding/relay engine.
//!
//! This crate is intentionally framework-agnostic. The chat platform, the rule
//! store and the job runner live behind ports (traits); the Telegram adapter
//! lives in `relay-telegram`.

pub mod config;
pub mod dispatch;
pub mod domain;
pub mod entities;
pub mod errors;
pub mod executor;
pub mod filter;
pub mod jobs;
pub mod ledger;
pub mod logging;
pub mod media;
pub mod media_group;
pub mod orchestrator;
pub mod retry;
pub mod rules;
pub mod task;
pub mod text;
pub mod throttled;
pub mod transform;
pub mod transport;

pub use errors::{Error, Result};
