//! Deployment controller client
//!
//! RPC client to the external orchestration service that builds container
//! images and runs deployments.

mod client;
mod types;

pub use client::{DeploymentController, HttpDeploymentController};
pub use types::{
    CallContext, CreateDeploymentRequest, CreateDeploymentResponse, CreateImageRequest, LogEntry,
    LogsResponse,
};
