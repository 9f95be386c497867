//! Alignment algorithms

pub mod reconciliation;

pub use reconciliation::{alignment_delta, reconcile, residual, Reconciliation};
