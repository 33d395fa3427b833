//! API Module
//!
//! Clients for the external token policy cosigner.

mod policy;

pub use policy::*;
