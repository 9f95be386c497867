//! Core types and constants for shared-anchor alignment

pub mod types;
pub mod constants;

pub use types::*;
pub use constants::*;
