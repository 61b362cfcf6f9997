//! Deploy / undeploy / redeploy state machine
//!
//! The synchronous part of each operation is a single atomic compute on the
//! application resource: it validates the precondition, commits the
//! transitional status and records the recovery deadline. The controller
//! interaction then runs as a detached task under the per-application lock,
//! and every failure in that phase funnels into the compensating
//! `terminate_application`, which is idempotent and also driven by the
//! reconciliation sweep.

use super::service::ApplicationService;
use crate::core::controller::{CallContext, CreateDeploymentRequest, CreateImageRequest, LogsResponse};
use crate::core::models::{Application, ApplicationFeatures, Function, FunctionStatus, ResourceRef};
use crate::storage::blob::{CopyOutcome, EtagPrecondition};
use crate::utils::error::{ControlPlaneError, Result};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Failure message recorded when the sweep forces a stuck deploy to `FAILED`
pub const STUCK_DEPLOYMENT_ERROR: &str = "The application failed to start in the expected interval";

impl ApplicationService {
    /// Start deploying an application's function.
    ///
    /// Returns the transitional `DEPLOYING` state; the controller interaction
    /// continues in the background and its outcome is observable on next read.
    pub async fn deploy_application(
        self: &Arc<Self>,
        ctx: CallContext,
        url: &str,
    ) -> Result<Application> {
        let deadline = Utc::now() + Duration::milliseconds(self.applications.check_delay_ms as i64);
        let created = self.pending.add(url, deadline).await?;

        let transitional = match self.begin_deploy(url).await {
            Ok(app) => app,
            Err(e) => {
                // A pre-existing entry belongs to the in-flight transition
                // that rejected us; withdraw only what this call created.
                if created {
                    if let Err(remove_err) = self.pending.remove(url).await {
                        warn!("Failed to remove {} from pending set: {}", url, remove_err);
                    }
                }
                return Err(e);
            }
        };

        if !created {
            self.refresh_pending(url, deadline).await;
        }

        let service = Arc::clone(self);
        let url = url.to_string();
        tokio::spawn(async move {
            if let Err(e) = service.deploy_stage(&ctx, &url).await {
                error!("Deployment of {} failed: {}", url, e);
                service.spawn_terminate(ctx, url, Some(e.to_string()));
            }
        });

        Ok(transitional)
    }

    async fn begin_deploy(&self, url: &str) -> Result<Application> {
        let mut transitional: Option<Application> = None;
        self.resources
            .compute_resource(url, EtagPrecondition::Any, |current| {
                let Some(body) = current else {
                    return Err(ControlPlaneError::not_found(url));
                };
                let mut app: Application = serde_json::from_str(body)?;
                let Some(function) = app.function.as_mut() else {
                    return Err(ControlPlaneError::conflict(format!(
                        "application {} has no function",
                        url
                    )));
                };
                if function.status.is_active() {
                    return Err(ControlPlaneError::conflict(format!(
                        "application {} is already {:?}",
                        url, function.status
                    )));
                }
                function.status = FunctionStatus::Deploying;
                function.error = None;
                app.endpoint = None;
                app.features = None;
                let body = serde_json::to_string(&app)?;
                transitional = Some(app);
                Ok(Some(body))
            })
            .await?;
        transitional.ok_or_else(|| ControlPlaneError::Internal("deploy transition lost".to_string()))
    }

    /// Controller-interaction phase of a deploy, run under the application lock
    pub(crate) async fn deploy_stage(&self, ctx: &CallContext, url: &str) -> Result<()> {
        let app_ref = ResourceRef::parse(url)?;
        let Some(_guard) = self.locks.try_lock(&app_ref.absolute_path()).await? else {
            return Err(ControlPlaneError::LockContention(format!(
                "another lifecycle operation is in flight for {}",
                url
            )));
        };

        let app = self.get_application(url).await?;
        let snapshot = app.function.clone().ok_or_else(|| {
            ControlPlaneError::Internal(format!("application {} lost its function", url))
        })?;
        if snapshot.status != FunctionStatus::Deploying {
            return Err(ControlPlaneError::Concurrency(format!(
                "application {} is no longer deploying: {:?}",
                url, snapshot.status
            )));
        }

        if !self.storage.is_public_or_review(&app_ref.bucket) {
            match self
                .resources
                .copy_folder(&snapshot.source_folder, &snapshot.target_folder, false)
                .await?
            {
                CopyOutcome::Copied => {}
                CopyOutcome::EmptySource => {
                    return Err(ControlPlaneError::validation(format!(
                        "source folder {} is empty",
                        snapshot.source_folder
                    )));
                }
                CopyOutcome::OccupiedDestination => {
                    return Err(ControlPlaneError::Storage(format!(
                        "target folder {} already has content",
                        snapshot.target_folder
                    )));
                }
            }
        }

        self.controller
            .create_image(
                ctx,
                &snapshot.id,
                CreateImageRequest {
                    runtime: snapshot.runtime.clone(),
                    sources: snapshot.target_folder.clone(),
                },
            )
            .await?;

        let base_url = self
            .controller
            .create_deployment(
                ctx,
                &snapshot.id,
                CreateDeploymentRequest {
                    env: Some(snapshot.env.clone()),
                    ..Default::default()
                },
            )
            .await?;

        self.commit_deploy(url, &snapshot, &base_url).await?;

        if let Err(e) = self.pending.remove(url).await {
            warn!("Failed to remove {} from pending set: {}", url, e);
        }
        info!("Application {} deployed at {}", url, base_url);
        Ok(())
    }

    async fn commit_deploy(&self, url: &str, snapshot: &Function, base_url: &str) -> Result<()> {
        self.resources
            .compute_resource(url, EtagPrecondition::Any, |current| {
                let Some(body) = current else {
                    return Err(ControlPlaneError::not_found(url));
                };
                let mut app: Application = serde_json::from_str(body)?;
                let Some(function) = app.function.as_mut() else {
                    return Err(ControlPlaneError::Concurrency(format!(
                        "function of {} vanished during deploy",
                        url
                    )));
                };
                if *function != *snapshot {
                    return Err(ControlPlaneError::Concurrency(format!(
                        "function of {} changed during deploy",
                        url
                    )));
                }
                function.status = FunctionStatus::Deployed;
                function.error = None;
                let mapping = &function.mapping;
                app.endpoint = Some(join_endpoint(base_url, &mapping.chat_completion));
                app.features = Some(ApplicationFeatures {
                    rate_endpoint: mapping.rate.as_deref().map(|p| join_endpoint(base_url, p)),
                    tokenize_endpoint: mapping
                        .tokenize
                        .as_deref()
                        .map(|p| join_endpoint(base_url, p)),
                    truncate_prompt_endpoint: mapping
                        .truncate_prompt
                        .as_deref()
                        .map(|p| join_endpoint(base_url, p)),
                    configuration_endpoint: mapping
                        .configuration
                        .as_deref()
                        .map(|p| join_endpoint(base_url, p)),
                });
                Ok(Some(serde_json::to_string(&app)?))
            })
            .await?;
        Ok(())
    }

    /// Start undeploying a deployed application.
    ///
    /// Returns the transitional `UNDEPLOYING` state; the controller cleanup
    /// runs in the background through `terminate_application`.
    pub async fn undeploy_application(
        self: &Arc<Self>,
        ctx: CallContext,
        url: &str,
    ) -> Result<Application> {
        let transitional = self.begin_undeploy(url).await?;
        self.spawn_terminate(ctx, url.to_string(), None);
        Ok(transitional)
    }

    async fn begin_undeploy(&self, url: &str) -> Result<Application> {
        let deadline = Utc::now() + Duration::milliseconds(self.applications.check_delay_ms as i64);
        let created = self.pending.add(url, deadline).await?;

        let mut transitional: Option<Application> = None;
        let outcome = self
            .resources
            .compute_resource(url, EtagPrecondition::Any, |current| {
                let Some(body) = current else {
                    return Err(ControlPlaneError::not_found(url));
                };
                let mut app: Application = serde_json::from_str(body)?;
                let Some(function) = app.function.as_mut() else {
                    return Err(ControlPlaneError::conflict(format!(
                        "application {} has no function",
                        url
                    )));
                };
                if function.status != FunctionStatus::Deployed {
                    return Err(ControlPlaneError::conflict(format!(
                        "application {} is not deployed: {:?}",
                        url, function.status
                    )));
                }
                function.status = FunctionStatus::Undeploying;
                function.error = None;
                app.endpoint = None;
                app.features = None;
                let body = serde_json::to_string(&app)?;
                transitional = Some(app);
                Ok(Some(body))
            })
            .await;

        if let Err(e) = outcome {
            if created {
                if let Err(remove_err) = self.pending.remove(url).await {
                    warn!("Failed to remove {} from pending set: {}", url, remove_err);
                }
            }
            return Err(e);
        }

        if !created {
            self.refresh_pending(url, deadline).await;
        }
        transitional
            .ok_or_else(|| ControlPlaneError::Internal("undeploy transition lost".to_string()))
    }

    /// Restart the recovery clock of an entry left over from an earlier
    /// terminated transition. Safe only after the transitional status has
    /// committed, which rules out any other transition being in flight.
    async fn refresh_pending(&self, url: &str, deadline: DateTime<Utc>) {
        if let Err(e) = self.pending.remove(url).await {
            warn!("Failed to refresh pending entry for {}: {}", url, e);
            return;
        }
        if let Err(e) = self.pending.add(url, deadline).await {
            warn!("Failed to refresh pending entry for {}: {}", url, e);
        }
    }

    /// Undeploy, then deploy again once the undeploy has fully completed.
    ///
    /// When the undeploy phase fails in the background the deploy is not
    /// attempted; the reconciliation sweep is the recovery path.
    pub async fn redeploy_application(
        self: &Arc<Self>,
        ctx: CallContext,
        url: &str,
    ) -> Result<Application> {
        let transitional = self.begin_undeploy(url).await?;

        let service = Arc::clone(self);
        let url = url.to_string();
        tokio::spawn(async move {
            match service.terminate_application(&ctx, &url, None).await {
                Ok(()) => {
                    if let Err(e) = service.deploy_application(ctx, &url).await {
                        error!("Redeploy of {} failed to start: {}", url, e);
                    }
                }
                Err(e) => {
                    warn!("Redeploy of {} aborted, undeploy failed: {}", url, e);
                }
            }
        });

        Ok(transitional)
    }

    /// Force an in-flight transition to its terminal state.
    ///
    /// Idempotent compensating action shared by failed deploys, undeploys and
    /// the reconciliation sweep. Lock contention and missing resources are
    /// silent no-ops; only an optimistic mismatch at the final write surfaces
    /// as an error.
    pub async fn terminate_application(
        &self,
        ctx: &CallContext,
        url: &str,
        error: Option<String>,
    ) -> Result<()> {
        let app_ref = ResourceRef::parse(url)?;
        let Some(_guard) = self.locks.try_lock(&app_ref.absolute_path()).await? else {
            debug!("Terminate of {} skipped, lock contended", url);
            return Ok(());
        };

        let app = match self.get_application(url).await {
            Ok(app) => Some(app),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };
        let snapshot = app.and_then(|a| a.function);

        let outcome = match snapshot {
            Some(function) if function.status.is_pending() => {
                self.finalize_termination(ctx, &app_ref, url, function, error)
                    .await
            }
            _ => Ok(()),
        };

        if let Err(e) = self.pending.remove(url).await {
            warn!("Failed to remove {} from pending set: {}", url, e);
        }
        outcome
    }

    async fn finalize_termination(
        &self,
        ctx: &CallContext,
        app_ref: &ResourceRef,
        url: &str,
        snapshot: Function,
        error: Option<String>,
    ) -> Result<()> {
        if !self.storage.is_public_or_review(&app_ref.bucket) {
            if let Err(e) = self.resources.delete_folder(&snapshot.target_folder).await {
                warn!(
                    "Failed to clean up target folder {}: {}",
                    snapshot.target_folder, e
                );
            }
        }

        // Remote cleanup is best-effort; the local terminal state wins.
        if let Err(e) = self.controller.delete_image(ctx, &snapshot.id).await {
            warn!("Failed to delete image of {}: {}", url, e);
        }
        if let Err(e) = self.controller.delete_deployment(ctx, &snapshot.id).await {
            warn!("Failed to delete deployment of {}: {}", url, e);
        }

        self.resources
            .compute_resource(url, EtagPrecondition::Any, |current| {
                let Some(body) = current else {
                    return Err(ControlPlaneError::not_found(url));
                };
                let mut app: Application = serde_json::from_str(body)?;
                let Some(function) = app.function.as_mut() else {
                    return Err(ControlPlaneError::Concurrency(format!(
                        "function of {} vanished during terminate",
                        url
                    )));
                };
                if *function != snapshot {
                    return Err(ControlPlaneError::Concurrency(format!(
                        "function of {} changed during terminate",
                        url
                    )));
                }
                if function.status == FunctionStatus::Undeploying {
                    function.status = FunctionStatus::Undeployed;
                    function.error = None;
                } else {
                    function.status = FunctionStatus::Failed;
                    function.error = Some(
                        error
                            .clone()
                            .unwrap_or_else(|| STUCK_DEPLOYMENT_ERROR.to_string()),
                    );
                }
                app.endpoint = None;
                app.features = None;
                Ok(Some(serde_json::to_string(&app)?))
            })
            .await?;

        info!("Application {} terminated", url);
        Ok(())
    }

    /// Fetch logs of a deployed application's function
    pub async fn application_logs(&self, ctx: &CallContext, url: &str) -> Result<LogsResponse> {
        let app = self.get_application(url).await?;
        let function = app.function.as_ref().ok_or_else(|| {
            ControlPlaneError::conflict(format!("application {} has no function", url))
        })?;
        if function.status != FunctionStatus::Deployed {
            return Err(ControlPlaneError::conflict(format!(
                "application {} is not deployed: {:?}",
                url, function.status
            )));
        }
        self.controller.logs(ctx, &function.id).await
    }

    /// One reconciliation pass: force-terminate every expired transition.
    ///
    /// Per-entry errors are swallowed so one stuck entry cannot block the
    /// sweep. Returns the number of entries handled.
    pub async fn reconcile_once(&self) -> Result<usize> {
        let expired = self
            .pending
            .expired(Utc::now(), self.applications.check_size)
            .await?;
        let count = expired.len();
        for url in expired {
            debug!("Reconciling stuck deployment: {}", url);
            if let Err(e) = self
                .terminate_application(
                    &CallContext::default(),
                    &url,
                    Some(STUCK_DEPLOYMENT_ERROR.to_string()),
                )
                .await
            {
                warn!("Reconciliation of {} failed: {}", url, e);
            }
        }
        Ok(count)
    }

    /// Run the reconciliation sweep on a fixed period until aborted
    pub fn spawn_reconciliation(self: &Arc<Self>) -> JoinHandle<()> {
        let service = Arc::clone(self);
        let period = std::time::Duration::from_millis(service.applications.check_period_ms);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                match service.reconcile_once().await {
                    Ok(0) => {}
                    Ok(n) => info!("Reconciliation sweep handled {} stuck deployments", n),
                    Err(e) => warn!("Reconciliation sweep failed: {}", e),
                }
            }
        })
    }

    pub(crate) fn spawn_terminate(
        self: &Arc<Self>,
        ctx: CallContext,
        url: String,
        error: Option<String>,
    ) {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = service.terminate_application(&ctx, &url, error).await {
                error!("Terminate of {} failed: {}", url, e);
            }
        });
    }
}

fn join_endpoint(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}
