// SPDX-License-Identifier: MIT

//! Error types and helpers shared by all the crates in the workspace
use snafu::Snafu;

pub mod fmt;

pub use fmt::{CompactError, FmtCompact};

pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;
pub type BoxedErrorResult<T> = std::result::Result<T, BoxedError>;
pub type WhateverResult<T> = std::result::Result<T, Whatever>;

/// Catch-all error for test harnesses and collaborators (broadcasters,
/// consensus engines) that report failures as plain messages
///
/// Unlike `snafu::Whatever` it can cross task boundaries.
#[derive(Debug, Snafu)]
#[snafu(whatever, display("{message}"))]
pub struct Whatever {
    #[snafu(source(from(Box<dyn std::error::Error + Send + Sync>, Some)))]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,

    message: String,
}
