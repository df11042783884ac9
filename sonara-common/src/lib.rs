//! # Sonara Common Library
//!
//! Shared code for the Sonara similarity-search service:
//! - Error taxonomy
//! - Response envelope (code / message / payload)
//! - Instrument category flags
//! - Configuration loading

pub mod config;
pub mod error;
pub mod instruments;
pub mod response;

pub use error::{Error, Result};
pub use instruments::{InstrumentFlags, InstrumentKind};
pub use response::{ApiResponse, ResponseType};
