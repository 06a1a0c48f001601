//! Resilient command timeouts for the Shell-RPC execution layer.
//!
//! Package-manager commands (installs, uninstalls, environment activation)
//! run with unpredictable output. This crate decides when such a command is
//! still working, when it is hung, and when it is failing:
//!
//! ```text
//! executor ──chunk──→ ShellTimeout ──→ ResilientTimeout ──→ PatternMatcher
//!    ↑                                        │
//!    └───────── termination event ────────────┘
//! ```
//!
//! The executor stays responsible for killing the process.

pub mod config;
pub mod integration;
pub mod logging;
pub mod timeout;
