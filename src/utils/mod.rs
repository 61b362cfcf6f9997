//! Utility modules for the control plane
//!
//! - **error**: crate-wide error type and `Result` alias
//! - **logging**: tracing subscriber setup

pub mod error;
pub mod logging;

pub use error::{ControlPlaneError, Result};
