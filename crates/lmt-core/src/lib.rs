//! Core types for the LMT statistics engine: usage records, grouping
//! dimensions, statistics, diagnostics, configuration and errors.

pub mod config;
pub mod error;
pub mod models;
pub mod time_utils;

pub use error::{LmtError, Result};
