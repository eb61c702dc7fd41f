//! Playdeck Common Library
//!
//! Shared types, the SQLite run store, test discovery, failure humanizing
//! and coordinator process lifecycle for the Playdeck dashboard.

pub mod db;
pub mod discovery;
pub mod error;
pub mod folders;
pub mod humanize;
pub mod lifecycle;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use db::Database;
pub use discovery::{TestDiscovery, DEFAULT_TEST_SUFFIX};
pub use error::{Error, Result};
pub use folders::FolderTable;
pub use humanize::humanize;
pub use lifecycle::{LifecycleManager, ProcessRecord, ProcessRecordStore, SpawnCommand, StopReport};
pub use store::RunStore;
pub use types::*;

/// Playdeck version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Header carrying the caller's user id on dashboard requests.
pub const OWNER_HEADER: &str = "x-playdeck-user";

/// Default state directory
pub fn default_state_dir() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".playdeck")
}

/// Default database path
pub fn default_db_path() -> std::path::PathBuf {
    default_state_dir().join("state.db")
}

/// Default pid record directory
pub fn default_pid_dir() -> std::path::PathBuf {
    default_state_dir().join("pids")
}

/// Home directory helper
mod dirs {
    pub fn home_dir() -> Option<std::path::PathBuf> {
        std::env::var_os("HOME").map(std::path::PathBuf::from)
    }
}
