//! Deployment controller wire types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Caller headers forwarded verbatim to the controller
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    /// Caller's API key header value
    pub api_key: Option<String>,
    /// Caller's `Authorization` header value
    pub authorization: Option<String>,
}

/// Body of `POST /v1/image/{functionId}`
#[derive(Debug, Clone, Serialize)]
pub struct CreateImageRequest {
    /// Runtime identifier, e.g. `python3.11`
    pub runtime: String,
    /// Folder URL holding the function sources
    pub sources: String,
}

/// Body of `POST /v1/deployment/{functionId}`
#[derive(Debug, Clone, Default, Serialize)]
pub struct CreateDeploymentRequest {
    /// Environment variables
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,
    /// Image reference
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Initial replica count
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_scale: Option<u32>,
    /// Minimum replica count
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_scale: Option<u32>,
    /// Maximum replica count
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_scale: Option<u32>,
}

/// Response of `POST /v1/deployment/{functionId}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDeploymentResponse {
    /// Base endpoint URL of the created deployment
    pub url: String,
}

/// One log record of a deployment instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Instance identifier
    pub instance: String,
    /// Log content
    pub content: String,
}

/// Response of `GET /v1/deployment/{functionId}/logs`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsResponse {
    /// Per-instance logs
    pub logs: Vec<LogEntry>,
}
