//! Deployment controller RPC client
//!
//! The controller answers each request with an SSE-style body carrying exactly
//! one semantic event: `event: result` with a JSON payload on success, or
//! `event: error` with `{"message": ...}` on failure. Anything else, including
//! a non-200 status or a truncated stream, is a protocol violation. One
//! configured timeout bounds the whole round trip; dropping the in-flight
//! future cancels the HTTP request.

use super::types::{
    CallContext, CreateDeploymentRequest, CreateDeploymentResponse, CreateImageRequest,
    LogsResponse,
};
use crate::utils::error::{ControlPlaneError, Result};
use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

const API_KEY_HEADER: &str = "api-key";

/// Remote orchestration service creating images and deployments
#[async_trait]
pub trait DeploymentController: Send + Sync {
    /// Build a container image for the function sources
    async fn create_image(
        &self,
        ctx: &CallContext,
        function_id: &str,
        request: CreateImageRequest,
    ) -> Result<()>;

    /// Create a deployment, returning its base endpoint URL
    async fn create_deployment(
        &self,
        ctx: &CallContext,
        function_id: &str,
        request: CreateDeploymentRequest,
    ) -> Result<String>;

    /// Delete the function's image; absence on the controller side is not an error
    async fn delete_image(&self, ctx: &CallContext, function_id: &str) -> Result<()>;

    /// Delete the function's deployment; absence on the controller side is not an error
    async fn delete_deployment(&self, ctx: &CallContext, function_id: &str) -> Result<()>;

    /// Fetch per-instance logs of a deployment
    async fn logs(&self, ctx: &CallContext, function_id: &str) -> Result<LogsResponse>;
}

/// HTTP implementation of the controller contract
pub struct HttpDeploymentController {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpDeploymentController {
    /// Create a client for the given controller endpoint
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    async fn call(
        &self,
        method: Method,
        path: &str,
        ctx: &CallContext,
        body: Option<Value>,
    ) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        debug!("Controller call: {} {}", method, url);

        let mut request = self
            .http
            .request(method, &url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(api_key) = &ctx.api_key {
            request = request.header(API_KEY_HEADER, api_key);
        }
        if let Some(authorization) = &ctx.authorization {
            request = request.header(reqwest::header::AUTHORIZATION, authorization);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let round_trip = async {
            let response = request.send().await?;
            let status = response.status();
            let text = response.text().await?;
            Ok::<_, reqwest::Error>((status, text))
        };

        let (status, text) = tokio::time::timeout(self.timeout, round_trip)
            .await
            .map_err(|_| {
                ControlPlaneError::Controller(format!(
                    "controller call to {} timed out after {:?}",
                    url, self.timeout
                ))
            })?
            .map_err(|e| ControlPlaneError::Controller(format!("controller call failed: {}", e)))?;

        if !status.is_success() {
            return Err(ControlPlaneError::Controller(format!(
                "controller returned status {} for {}",
                status, url
            )));
        }

        parse_event_stream(&text)
    }
}

/// Extract the single semantic event from an SSE-style response body
pub(crate) fn parse_event_stream(body: &str) -> Result<Value> {
    let mut event: Option<&str> = None;
    let mut data: Option<&str> = None;

    for line in body.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(name) = line.strip_prefix("event:") {
            if event.is_none() {
                event = Some(name.trim());
            }
        } else if let Some(payload) = line.strip_prefix("data:") {
            if event.is_some() && data.is_none() {
                data = Some(payload.trim());
            }
        }
    }

    let (event, data) = match (event, data) {
        (Some(event), Some(data)) => (event, data),
        _ => {
            return Err(ControlPlaneError::Controller(
                "malformed controller response: missing event or data".to_string(),
            ));
        }
    };

    match event {
        "result" => serde_json::from_str(data).map_err(|e| {
            ControlPlaneError::Controller(format!("malformed controller result payload: {}", e))
        }),
        "error" => {
            let payload: Value = serde_json::from_str(data).unwrap_or(Value::Null);
            let message = payload
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown controller error")
                .to_string();
            Err(ControlPlaneError::Controller(message))
        }
        other => Err(ControlPlaneError::Controller(format!(
            "unexpected controller event: {}",
            other
        ))),
    }
}

#[async_trait]
impl DeploymentController for HttpDeploymentController {
    async fn create_image(
        &self,
        ctx: &CallContext,
        function_id: &str,
        request: CreateImageRequest,
    ) -> Result<()> {
        let body = serde_json::to_value(&request)?;
        self.call(
            Method::POST,
            &format!("/v1/image/{}", function_id),
            ctx,
            Some(body),
        )
        .await?;
        Ok(())
    }

    async fn create_deployment(
        &self,
        ctx: &CallContext,
        function_id: &str,
        request: CreateDeploymentRequest,
    ) -> Result<String> {
        let body = serde_json::to_value(&request)?;
        let result = self
            .call(
                Method::POST,
                &format!("/v1/deployment/{}", function_id),
                ctx,
                Some(body),
            )
            .await?;
        let response: CreateDeploymentResponse = serde_json::from_value(result).map_err(|e| {
            ControlPlaneError::Controller(format!("malformed deployment response: {}", e))
        })?;
        Ok(response.url)
    }

    async fn delete_image(&self, ctx: &CallContext, function_id: &str) -> Result<()> {
        self.call(
            Method::DELETE,
            &format!("/v1/image/{}", function_id),
            ctx,
            None,
        )
        .await?;
        Ok(())
    }

    async fn delete_deployment(&self, ctx: &CallContext, function_id: &str) -> Result<()> {
        self.call(
            Method::DELETE,
            &format!("/v1/deployment/{}", function_id),
            ctx,
            None,
        )
        .await?;
        Ok(())
    }

    async fn logs(&self, ctx: &CallContext, function_id: &str) -> Result<LogsResponse> {
        let result = self
            .call(
                Method::GET,
                &format!("/v1/deployment/{}/logs", function_id),
                ctx,
                None,
            )
            .await?;
        let response: LogsResponse = serde_json::from_value(result).map_err(|e| {
            ControlPlaneError::Controller(format!("malformed logs response: {}", e))
        })?;
        Ok(response)
    }
}
