//! Root orchestration crate: ties the per-concern crates (catalog, blob
//! store, enumerator, loader, diagnostics, copy worker, archiver) into the
//! §4.8 orchestrator state machine and the §6/§11.5 CLI.

pub mod cli;
pub mod error;
pub mod imaging;
pub mod mount;
pub mod orchestrator;

pub use error::{NttError, Result};
pub use orchestrator::{OrchestrationReport, Orchestrator, Stage};
