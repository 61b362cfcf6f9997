//! Application domain model
//!
//! An application is a named deployable unit. It carries either a static
//! `endpoint` (custom applications) or a managed [`Function`] deployment,
//! never both. Applications with a custom property schema carry neither.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Deployment status of a managed function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FunctionStatus {
    /// Not deployed; deploy may start from here
    Undeployed,
    /// Deploy in flight
    Deploying,
    /// Serving traffic
    Deployed,
    /// Undeploy in flight
    Undeploying,
    /// Last deploy or undeploy failed; deploy may start from here
    Failed,
}

impl FunctionStatus {
    /// Deployed or mid-transition; blocks application deletion
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Deploying | Self::Deployed | Self::Undeploying)
    }

    /// Mid-transition; the only statuses terminate acts on
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Deploying | Self::Undeploying)
    }
}

/// Endpoint paths exposed by a deployed function
///
/// `chat_completion` is mandatory; the rest are optional and must be absolute
/// encoded paths when present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionMapping {
    /// Chat completion path
    pub chat_completion: String,
    /// Rate endpoint path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate: Option<String>,
    /// Tokenize endpoint path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokenize: Option<String>,
    /// Truncate-prompt endpoint path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncate_prompt: Option<String>,
    /// Configuration endpoint path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configuration: Option<String>,
}

/// Managed deployment sub-entity of an application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    /// Assigned once at creation, stable across updates
    pub id: String,
    /// Current deployment status
    pub status: FunctionStatus,
    /// Runtime identifier, e.g. `python3.11`
    pub runtime: String,
    /// Environment variables passed to the deployment
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Endpoint paths the deployment exposes
    pub mapping: FunctionMapping,
    /// User-owned folder holding the function sources
    pub source_folder: String,
    /// System-managed folder the deployment actually runs from
    pub target_folder: String,
    /// Bucket of the application owner, immutable once set
    pub author_bucket: String,
    /// Last failure message; only present in `Failed`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Optional secondary endpoints of an application
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationFeatures {
    /// Rate endpoint URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_endpoint: Option<String>,
    /// Tokenize endpoint URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokenize_endpoint: Option<String>,
    /// Truncate-prompt endpoint URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncate_prompt_endpoint: Option<String>,
    /// Configuration endpoint URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configuration_endpoint: Option<String>,
}

/// A named deployable unit fronted by the gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    /// Resource URL identity
    pub name: String,
    /// Human-readable name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Free-form description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Opaque stable identifier surviving renames and moves
    pub reference: String,
    /// Static external URL; mutually exclusive with `function`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Secondary endpoints derived on deploy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub features: Option<ApplicationFeatures>,
    /// Managed deployment; mutually exclusive with `endpoint`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<Function>,
    /// Custom property schema; excludes both `endpoint` and `function`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_type_schema_id: Option<String>,
}

impl Application {
    /// Function status, or `None` when the application has no function
    pub fn function_status(&self) -> Option<FunctionStatus> {
        self.function.as_ref().map(|f| f.status)
    }

    /// True while the function is deployed or mid-transition
    pub fn is_active(&self) -> bool {
        self.function_status().is_some_and(|s| s.is_active())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(FunctionStatus::Deploying.is_active());
        assert!(FunctionStatus::Deployed.is_active());
        assert!(FunctionStatus::Undeploying.is_active());
        assert!(!FunctionStatus::Undeployed.is_active());
        assert!(!FunctionStatus::Failed.is_active());

        assert!(FunctionStatus::Deploying.is_pending());
        assert!(FunctionStatus::Undeploying.is_pending());
        assert!(!FunctionStatus::Deployed.is_pending());
    }

    #[test]
    fn status_serializes_screaming() {
        let json = serde_json::to_string(&FunctionStatus::Undeployed).unwrap();
        assert_eq!(json, "\"UNDEPLOYED\"");
        let status: FunctionStatus = serde_json::from_str("\"DEPLOYING\"").unwrap();
        assert_eq!(status, FunctionStatus::Deploying);
    }

    #[test]
    fn function_round_trips_through_json() {
        let function = Function {
            id: "0123".to_string(),
            status: FunctionStatus::Undeployed,
            runtime: "python3.11".to_string(),
            env: HashMap::new(),
            mapping: FunctionMapping {
                chat_completion: "/application".to_string(),
                rate: Some("/rate".to_string()),
                tokenize: None,
                truncate_prompt: None,
                configuration: None,
            },
            source_folder: "files/bkt1/sources/".to_string(),
            target_folder: "files/bkt1/appdata/abc123/".to_string(),
            author_bucket: "bkt1".to_string(),
            error: None,
        };
        let json = serde_json::to_string(&function).unwrap();
        assert!(!json.contains("tokenize"));
        assert!(!json.contains("error"));
        let parsed: Function = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, function);
    }
}
