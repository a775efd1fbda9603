//! # Patrol core
//!
//! The job orchestration core behind the web-scan platform: a durable job
//! queue with lease/heartbeat/retry semantics, a coalescing pub/sub notifier
//! sitting in front of a periodic poll, a generic runner loop shared by every
//! worker role, a scheduler that materializes periodic tasks into jobs, a
//! reaper that reclaims expired leases and purges old terminal jobs, and the
//! small pieces (failure notification, dedupe, cache versioning, allowlist
//! caching) that the rules/alert jobs build on.
//!
//! This crate is storage-agnostic: [`store::JobStore`] and [`store::Waiter`]
//! are the seam a concrete backend implements. `patrol-postgres` is the
//! production implementation; `patrol-testing` provides in-memory fakes for
//! unit tests.

pub mod error;
pub mod failure_notifier;
pub mod lease;
pub mod lifecycle;
pub mod model;
pub mod notify;
pub mod reaper;
pub mod rules_glue;
pub mod runner;
pub mod scheduler;
pub mod service;
pub mod store;

pub use error::{Error, Result};
