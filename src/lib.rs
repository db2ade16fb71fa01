//! Fidelity brokerage automation.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod actions;
pub mod browser;
pub mod config;
pub mod login;
pub mod positions;
pub mod retry;
pub mod session;
pub mod shell;
pub mod storage;
pub mod store;
pub mod totp;
pub mod types;
