//! Playdeck dashboard
//!
//! HTTP API for suites and runs. Triggering a run spawns a `playdeck-runner`
//! coordinator process, which reports back through the callback routes.

pub mod auth;
pub mod config;
pub mod error;
pub mod server;

pub use config::DashboardConfig;
pub use error::{ApiError, ApiResult};
pub use server::{router, serve, AppState};
