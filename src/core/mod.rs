//! Core types shared by the pipeline and the price sources

pub mod config;
pub mod error;
pub mod log;
pub mod price;

// Re-export main types for cleaner imports
pub use error::{ErrorKind, PriceDbError};
pub use price::{PriceData, PriceRecord, PriceSource};
