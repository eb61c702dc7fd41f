//! Playdeck Run Coordinator
//!
//! Executes one test run outside the dashboard process:
//! - Resolves the suite's tests from the bundled directory or a cached clone
//! - Runs each selected test in its own Playwright process
//! - Reports per-test and final results back through a [`RunStore`]
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                 playdeck-runner <RUN_ID>                   │
//! ├───────────────────────────────────────────────────────────┤
//! │  Coordinator                                              │
//! │    ├── SourceResolver -> ResolvedSource { root, folder }  │
//! │    │     └── RepoFetcher (git clone / refresh)            │
//! │    ├── TestDiscovery -> [DiscoveredTest]                   │
//! │    ├── TestExecutor (playwright test --reporter=json)     │
//! │    │     └── PlaywrightReport -> Verdict                  │
//! │    ├── ArtifactStore (videos)                             │
//! │    └── RunStore (HTTP callbacks to the dashboard)         │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! [`RunStore`]: playdeck_common::RunStore

pub mod artifacts;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod playwright;
pub mod report;
pub mod source;

pub use client::HttpRunStore;
pub use config::CoordinatorConfig;
pub use coordinator::{Coordinator, RunPlan, RunSummary};
pub use error::{RunnerError, RunnerResult};
pub use playwright::{CapturedOutput, PlaywrightCli, TestExecutor};
pub use source::{GitRepoFetcher, RepoFetcher, ResolvedSource, SourceResolver, SuiteSource};
