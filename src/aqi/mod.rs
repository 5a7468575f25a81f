//! Air quality index derivation.
//!
//! Submodules:
//! - `breakpoints`: the fixed concentration ↔ index tables and interpolation.
//! - `calculator`: sub-indices, overall index, category and primary pollutant.

pub mod breakpoints;
pub mod calculator;

pub use breakpoints::{Breakpoint, BreakpointKey, BreakpointTable};
pub use calculator::IndexCalculator;
