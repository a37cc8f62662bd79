//! Catalog of third-party dependencies across every project on a machine.
//!
//! [`scanner::ScannerEngine`] turns directories into project and package
//! facts, [`catalog::CatalogStore`] keeps them, [`updater::UpdateOrchestrator`]
//! checks registries and drives the native package managers, and
//! [`git::SourceUpdateChecker`] tracks upstream revisions of working copies.

pub mod cache;
pub mod catalog;
pub mod config;
pub mod ecosystem;
pub mod error;
pub mod filter;
pub mod git;
pub mod progress;
pub mod runner;
pub mod scanner;
pub mod sources;
pub mod types;
pub mod updater;

pub use crate::catalog::CatalogStore;
pub use crate::error::{DepcatError, Result};
pub use crate::progress::{Progress, ProgressSink};
pub use crate::types::{Ecosystem, Package, Project};
