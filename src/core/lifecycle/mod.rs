//! Application lifecycle service
//!
//! Owns the application entity, its function deployment state machine
//! (`UNDEPLOYED → DEPLOYING → DEPLOYED → UNDEPLOYING → UNDEPLOYED`, with
//! `FAILED` on error), and the reconciliation sweep that recovers stuck
//! transitions.

mod deployment;
mod service;

pub use deployment::STUCK_DEPLOYMENT_ERROR;
pub use service::ApplicationService;
