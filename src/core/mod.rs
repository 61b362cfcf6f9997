//! Core domain of the control plane
//!
//! - **models**: application, function and resource identity types
//! - **controller**: RPC client to the external deployment controller
//! - **lifecycle**: the application deployment state machine
//! - **pending**: shared ledger of in-flight transitions
//! - **locks**: named non-blocking lock leases

pub mod controller;
pub mod lifecycle;
pub mod locks;
pub mod models;
pub mod pending;

pub use lifecycle::ApplicationService;
pub use models::{Application, Function, FunctionStatus};
