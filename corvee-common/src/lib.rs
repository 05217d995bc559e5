//! # Corvée Common Library
//!
//! Shared code for the corvée assignment engine:
//! - Error types
//! - Event types (EngineEvent enum) and the EventBus
//! - Engine configuration loading

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};

/// Annotatable item identifier
pub type ItemId = uuid::Uuid;

/// Annotator identifier
pub type UserId = uuid::Uuid;
