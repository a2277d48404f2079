//! guardwatch: passive traffic monitor that flags conversations with hosts
//! missing from the Tor guard relay directory.
//!
//! The binary (main.rs) wires these modules together; integration tests and
//! benches drive them through this library target.

pub mod capture;
pub mod config;
pub mod constants;
pub mod directory;
pub mod error;
pub mod events;
pub mod logging;
pub mod membership;
pub mod pipeline;
pub mod reputation;
pub mod shutdown;
pub mod tagger;
pub mod topology;

pub use error::AppError;
