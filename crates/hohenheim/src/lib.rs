//! Hohenheim - a personal assistant with layered memory
//!
//! Input is classified into an intent, answered from short- and long-term
//! memory plus a tiered set of reasoning backends, and recorded back into
//! memory. [`Assistant::submit`] is the single entry point.

pub mod assistant;
pub mod config;
pub mod embedding;
pub mod error;
pub mod evolution;
pub mod memory;
pub mod reasoning;
pub mod router;
pub mod server;
pub mod session;
pub mod storage;
pub mod testing;

pub use assistant::{Assistant, RenderableResult};
pub use error::{HohenheimError, Result};
