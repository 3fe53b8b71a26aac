// ABOUTME: Library root for parley: re-exports all modules for integration testing.
// ABOUTME: The binary entry point is in main.rs, which uses this crate as a library.

pub mod app;
pub mod config;
pub mod conversation;
pub mod dialogue;
pub mod error;
pub mod logging;
pub mod model;
pub mod persistence;
pub mod session;
pub mod tools;
