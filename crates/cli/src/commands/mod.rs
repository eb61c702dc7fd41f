//! CLI Commands

pub mod discover;
pub mod kill;
pub mod runs;
