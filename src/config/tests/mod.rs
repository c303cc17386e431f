//! Unit tests for stepflow configuration types.
//!
//! This module contains tests organised into:
//! - [`helpers`] - Shared fixtures and helper functions
//! - [`types_tests`] - Defaults and TOML deserialisation
//! - [`resolution_tests`] - Resolving configuration into engine types
//! - [`layer_precedence_tests`] - `MergeComposer` layer precedence tests

mod helpers;
