// Core modules
pub mod api;
pub mod config;
pub mod error;
pub mod execution;
pub mod models;
pub mod persistence;
pub mod redeem;

// Re-export commonly used types
pub use error::{Error, Result};
pub use models::*;
