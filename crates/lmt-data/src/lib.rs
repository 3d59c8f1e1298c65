//! Processing pipeline for LMT license-usage exports.
//!
//! Reads delimited export files into usage records, normalizes and
//! deduplicates them, applies user filters, groups them along a dimension
//! and assembles the summary tables consumed by reporting front ends.

pub mod aggregator;
pub mod analysis;
pub mod filter;
pub mod normalizer;
pub mod reader;
pub mod summary;

pub use lmt_core as core;
