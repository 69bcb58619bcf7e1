//! # nr-core
//!
//! Shared error and result types for the NuRecon workspace.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;

pub use error::{Error, Result};
