//! # Corvée Assignment Engine
//!
//! Decides, for any annotator requesting work, which data item they receive
//! next: configurable strategies, completion targets, and fairness/diversity
//! constraints under concurrent access, with pluggable prioritization
//! signals recomputed in the background.

pub mod api;
pub mod dataset;
pub mod db;
pub mod engine;
pub mod error;

pub use error::{Error, Result};
