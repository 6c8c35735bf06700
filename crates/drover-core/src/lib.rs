//! # drover-core
//!
//! Shared kernel for the drover task scheduler:
//!
//! - **Typed identifiers**: [`JobId`], [`TaskId`], [`WorkerName`]
//! - **Errors**: the shared [`Error`] enum and [`Result`] alias
//! - **Observability**: logging initialization and span constructors
//!
//! This crate carries no scheduling logic; it exists so identifier and
//! error conventions are uniform across the workspace.

pub mod error;
pub mod id;
pub mod observability;

pub use error::{Error, Result};
pub use id::{JobId, TaskId, WorkerName};
