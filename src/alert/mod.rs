//! Report-level warnings derived from finished aggregates.
//!
//! Neither check changes any value; they only describe the data.
//!
//! Submodules:
//! - `exceedance`: daily means against the national 24-hour limits.
//! - `staleness`:  whether a municipal feed has caught up with the report hour.

pub mod exceedance;
pub mod staleness;
