//! # Core Runtime Module
//!
//! Runtime infrastructure shared by the speech streaming crates:
//! - Logging and tracing setup
//! - Service configuration
//! - Event bus for stream and synthesis notifications
//!
//! Everything here is host-agnostic; platform capabilities come in through
//! `bridge-traits`.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
