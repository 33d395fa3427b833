//! Utilities Module
//!
//! Common utilities used across the crate.

mod http;
pub mod logging;

pub use http::*;
pub use logging::{init_logging, LogFormat};
