//! Playdeck CLI
//!
//! Operator commands: discover tests on disk, inspect and stop runs through
//! the dashboard, and kill coordinators straight from the local state dir.

pub mod client;
pub mod commands;
pub mod output;
