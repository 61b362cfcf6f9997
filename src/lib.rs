//! # Gateway Control Plane
//!
//! Control plane for an AI gateway: manages the lifecycle of user-deployable
//! applications, resource sharing and publication workflows, and
//! notifications, all layered on an etag-guarded blob store with distributed
//! locking.
//!
//! The two load-bearing pieces are the application deployment state machine
//! ([`core::lifecycle::ApplicationService`]) and the atomic read-modify-write
//! primitive ([`storage::resource::ResourceService::compute_resource`]) that
//! every subsystem mutates shared documents through.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use gateway_control_plane::config::Config;
//! use gateway_control_plane::core::controller::{CallContext, HttpDeploymentController};
//! use gateway_control_plane::core::lifecycle::ApplicationService;
//! use gateway_control_plane::core::locks::InMemoryLockService;
//! use gateway_control_plane::core::pending::InMemoryPendingSet;
//! use gateway_control_plane::storage::{InMemoryBlobStore, ResourceService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let resources = Arc::new(ResourceService::new(Arc::new(InMemoryBlobStore::new())));
//!     let controller = Arc::new(HttpDeploymentController::new(
//!         config.applications.controller_url.clone(),
//!         Duration::from_millis(config.applications.controller_timeout_ms),
//!     ));
//!     let applications = Arc::new(ApplicationService::new(
//!         resources,
//!         Arc::new(InMemoryPendingSet::new()),
//!         Arc::new(InMemoryLockService::new()),
//!         controller,
//!         config.applications.clone(),
//!         config.storage.clone(),
//!     ));
//!     let _sweep = applications.spawn_reconciliation();
//!
//!     let app = applications
//!         .deploy_application(CallContext::default(), "files/bkt1/app1")
//!         .await?;
//!     println!("status: {:?}", app.function_status());
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod core;
pub mod services;
pub mod storage;
pub mod utils;

// Re-export main types
pub use config::Config;
pub use core::lifecycle::ApplicationService;
pub use core::models::{Application, Function, FunctionStatus};
pub use storage::{EtagPrecondition, ResourceService};
pub use utils::error::{ControlPlaneError, Result};
