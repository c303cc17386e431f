//! Sequential step orchestration against eventually-consistent systems.
//!
//! `stepflow` drives multi-step infrastructure procedures. Each step applies
//! a change, observes external state until a condition holds or a deadline
//! passes, retries flaky operations a bounded number of times, and leaves
//! behind teardown work that runs however the flow ends.
//!
//! # Architecture
//!
//! The engine knows nothing about the systems it drives. Steps are built
//! from closures and small collaborator traits, so the same sequencer runs a
//! cluster upgrade against a real API client or against a mock in tests.
//! Steps never run concurrently; one flow is one logical procedure.
//!
//! # Modules
//!
//! - [`api`]: Running flows and building the operator/Ironic upgrade plan
//! - [`cluster`]: Collaborator contracts for the cluster being upgraded
//! - [`config`]: Configuration system with layered precedence (env > file > defaults)
//! - [`engine`]: Poller, retry executor, state waiter, sequencer and cleanup guard
//! - [`error`]: Semantic error types for the library

pub mod api;
pub mod cluster;
pub mod config;
pub mod engine;
pub mod error;
