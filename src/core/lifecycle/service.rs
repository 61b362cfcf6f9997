//! Application CRUD and validation
//!
//! All writes go through the compute primitive; there is no unguarded
//! read-then-write anywhere in this service.

use crate::config::{ApplicationsConfig, StorageConfig};
use crate::core::controller::DeploymentController;
use crate::core::locks::LockService;
use crate::core::models::{Application, Function, FunctionStatus, ResourceRef};
use crate::core::pending::PendingDeploymentSet;
use crate::storage::blob::EtagPrecondition;
use crate::storage::resource::ResourceService;
use crate::utils::error::{ControlPlaneError, Result};
use rand::RngCore;
use std::sync::Arc;
use uuid::Uuid;

const LIST_PAGE_SIZE: usize = 1000;

/// Owner of the application entity and its deployment state machine
pub struct ApplicationService {
    pub(crate) resources: Arc<ResourceService>,
    pub(crate) pending: Arc<dyn PendingDeploymentSet>,
    pub(crate) locks: Arc<dyn LockService>,
    pub(crate) controller: Arc<dyn DeploymentController>,
    pub(crate) applications: ApplicationsConfig,
    pub(crate) storage: StorageConfig,
}

impl ApplicationService {
    /// Wire the service to its collaborators
    pub fn new(
        resources: Arc<ResourceService>,
        pending: Arc<dyn PendingDeploymentSet>,
        locks: Arc<dyn LockService>,
        controller: Arc<dyn DeploymentController>,
        applications: ApplicationsConfig,
        storage: StorageConfig,
    ) -> Self {
        Self {
            resources,
            pending,
            locks,
            controller,
            applications,
            storage,
        }
    }

    /// Fetch an application; absence is a distinct not-found error
    pub async fn get_application(&self, url: &str) -> Result<Application> {
        let body = self
            .resources
            .get(url)
            .await?
            .ok_or_else(|| ControlPlaneError::not_found(url))?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Create or update an application under the given etag precondition
    pub async fn put_application(
        &self,
        url: &str,
        payload: Application,
        precondition: EtagPrecondition,
    ) -> Result<Application> {
        let app_ref = ResourceRef::parse(url)?;
        let mut stored: Option<Application> = None;

        self.resources
            .compute_resource(url, precondition, |current| {
                let existing: Option<Application> = current
                    .map(serde_json::from_str)
                    .transpose()?;
                let app =
                    prepare_application(&app_ref, payload.clone(), existing.as_ref(), &self.storage)?;
                let body = serde_json::to_string(&app)?;
                stored = Some(app);
                Ok(Some(body))
            })
            .await?;

        stored.ok_or_else(|| ControlPlaneError::Internal("application write lost".to_string()))
    }

    /// Delete an application; conflicts while its function is active
    pub async fn delete_application(&self, url: &str, precondition: EtagPrecondition) -> Result<()> {
        self.resources
            .compute_resource(url, precondition, |current| {
                let Some(body) = current else {
                    return Err(ControlPlaneError::not_found(url));
                };
                let app: Application = serde_json::from_str(body)?;
                if app.is_active() {
                    return Err(ControlPlaneError::conflict(format!(
                        "application {} has an active deployment",
                        url
                    )));
                }
                Ok(None)
            })
            .await?;
        Ok(())
    }

    /// Enumerate the files an application's function depends on
    ///
    /// Used by share/publish validation to check that everything the
    /// application needs lives in the owner's bucket.
    pub async fn list_dependent_resources(&self, app: &Application) -> Result<Vec<String>> {
        let Some(function) = &app.function else {
            return Ok(Vec::new());
        };

        let mut keys = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self
                .resources
                .list_folder(&function.source_folder, token.as_deref(), LIST_PAGE_SIZE)
                .await?;
            keys.extend(page.keys);
            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(keys)
    }
}

pub(crate) fn generate_function_id() -> String {
    let mut bytes = [0u8; 6];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn generate_target_folder(app_ref: &ResourceRef) -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    ResourceRef::new(
        app_ref.bucket.clone(),
        format!("appdata/{}/", hex::encode(bytes)),
    )
    .url()
}

fn validate_mapping_path(name: &str, path: &str) -> Result<()> {
    if !path.starts_with('/') {
        return Err(ControlPlaneError::validation(format!(
            "mapping path {} must start with '/': {}",
            name, path
        )));
    }
    let probe = format!("http://localhost{}", path);
    if url::Url::parse(&probe).is_err() || path.contains(char::is_whitespace) {
        return Err(ControlPlaneError::validation(format!(
            "mapping path {} is not a valid encoded path: {}",
            name, path
        )));
    }
    Ok(())
}

fn validate_function(app_ref: &ResourceRef, function: &Function) -> Result<()> {
    if function.runtime.is_empty() {
        return Err(ControlPlaneError::validation("function runtime is required"));
    }

    validate_mapping_path("chat_completion", &function.mapping.chat_completion)?;
    for (name, path) in [
        ("rate", &function.mapping.rate),
        ("tokenize", &function.mapping.tokenize),
        ("truncate_prompt", &function.mapping.truncate_prompt),
        ("configuration", &function.mapping.configuration),
    ] {
        if let Some(path) = path {
            validate_mapping_path(name, path)?;
        }
    }

    let source = ResourceRef::parse(&function.source_folder)?;
    if !source.is_folder() {
        return Err(ControlPlaneError::validation(format!(
            "source folder must be a folder resource: {}",
            function.source_folder
        )));
    }
    if source.bucket != app_ref.bucket {
        return Err(ControlPlaneError::validation(format!(
            "source folder must be in the application bucket {}: {}",
            app_ref.bucket, function.source_folder
        )));
    }
    Ok(())
}

/// Merge an incoming application payload with the stored one, enforcing the
/// entity invariants and preserving the immutable function fields.
pub(crate) fn prepare_application(
    app_ref: &ResourceRef,
    mut payload: Application,
    existing: Option<&Application>,
    storage: &StorageConfig,
) -> Result<Application> {
    payload.name = app_ref.url();

    if payload.application_type_schema_id.is_some() {
        if payload.endpoint.is_some() || payload.function.is_some() {
            return Err(ControlPlaneError::validation(
                "application with a custom schema cannot set endpoint or function",
            ));
        }
    } else if payload.endpoint.is_some() == payload.function.is_some() {
        return Err(ControlPlaneError::validation(
            "application must set exactly one of endpoint or function",
        ));
    }

    payload.reference = existing
        .map(|e| e.reference.clone())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    if let Some(function) = payload.function.as_mut() {
        validate_function(app_ref, function)?;

        match existing.and_then(|e| e.function.as_ref()) {
            Some(previous) => {
                // Once assigned, these never change.
                function.id = previous.id.clone();
                function.target_folder = previous.target_folder.clone();
                function.author_bucket = previous.author_bucket.clone();
                function.status = previous.status;
                function.error = previous.error.clone();
            }
            None => {
                function.id = generate_function_id();
                function.status = FunctionStatus::Undeployed;
                function.error = None;
                function.author_bucket = app_ref.bucket.clone();
                function.target_folder = if storage.is_public_or_review(&app_ref.bucket) {
                    function.source_folder.clone()
                } else {
                    generate_target_folder(app_ref)
                };
            }
        }

        // Endpoints are derived on deploy, never accepted from the payload.
        payload.endpoint = existing.and_then(|e| e.endpoint.clone());
        payload.features = existing.and_then(|e| e.features.clone());
    }

    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::FunctionMapping;
    use std::collections::HashMap;

    fn app_ref() -> ResourceRef {
        ResourceRef::new("bkt1", "app1")
    }

    fn function_payload() -> Function {
        Function {
            id: String::new(),
            status: FunctionStatus::Undeployed,
            runtime: "python3.11".to_string(),
            env: HashMap::new(),
            mapping: FunctionMapping {
                chat_completion: "/application".to_string(),
                rate: None,
                tokenize: None,
                truncate_prompt: None,
                configuration: None,
            },
            source_folder: "files/bkt1/sources/".to_string(),
            target_folder: String::new(),
            author_bucket: String::new(),
            error: None,
        }
    }

    fn payload_with_function() -> Application {
        Application {
            name: String::new(),
            display_name: None,
            description: None,
            reference: String::new(),
            endpoint: None,
            features: None,
            function: Some(function_payload()),
            application_type_schema_id: None,
        }
    }

    #[test]
    fn creation_assigns_id_and_target_folder() {
        let app =
            prepare_application(&app_ref(), payload_with_function(), None, &StorageConfig::default())
                .unwrap();
        let function = app.function.unwrap();
        assert_eq!(function.id.len(), 12);
        assert!(function.target_folder.starts_with("files/bkt1/appdata/"));
        assert!(function.target_folder.ends_with('/'));
        assert_eq!(function.author_bucket, "bkt1");
        assert_eq!(function.status, FunctionStatus::Undeployed);
        assert!(!app.reference.is_empty());
    }

    #[test]
    fn update_preserves_immutable_function_fields() {
        let storage = StorageConfig::default();
        let created =
            prepare_application(&app_ref(), payload_with_function(), None, &storage).unwrap();

        let mut update = payload_with_function();
        update.function.as_mut().unwrap().runtime = "python3.12".to_string();
        let updated = prepare_application(&app_ref(), update, Some(&created), &storage).unwrap();

        let before = created.function.as_ref().unwrap();
        let after = updated.function.as_ref().unwrap();
        assert_eq!(after.id, before.id);
        assert_eq!(after.target_folder, before.target_folder);
        assert_eq!(after.author_bucket, before.author_bucket);
        assert_eq!(after.runtime, "python3.12");
        assert_eq!(updated.reference, created.reference);
    }

    #[test]
    fn public_bucket_reuses_source_folder() {
        let public_ref = ResourceRef::new("public", "app1");
        let mut payload = payload_with_function();
        payload.function.as_mut().unwrap().source_folder = "files/public/sources/".to_string();

        let app =
            prepare_application(&public_ref, payload, None, &StorageConfig::default()).unwrap();
        let function = app.function.unwrap();
        assert_eq!(function.target_folder, "files/public/sources/");
    }

    #[test]
    fn schema_application_excludes_endpoint_and_function() {
        let mut payload = payload_with_function();
        payload.application_type_schema_id = Some("schema-1".to_string());
        let err = prepare_application(&app_ref(), payload, None, &StorageConfig::default())
            .unwrap_err();
        assert!(matches!(err, ControlPlaneError::Validation(_)));
    }

    #[test]
    fn endpoint_and_function_are_mutually_exclusive() {
        let mut payload = payload_with_function();
        payload.endpoint = Some("http://example.com/app".to_string());
        assert!(
            prepare_application(&app_ref(), payload, None, &StorageConfig::default()).is_err()
        );

        let mut neither = payload_with_function();
        neither.function = None;
        assert!(
            prepare_application(&app_ref(), neither, None, &StorageConfig::default()).is_err()
        );
    }

    #[test]
    fn mapping_paths_must_be_absolute() {
        let mut payload = payload_with_function();
        payload.function.as_mut().unwrap().mapping.rate = Some("rate".to_string());
        let err = prepare_application(&app_ref(), payload, None, &StorageConfig::default())
            .unwrap_err();
        assert!(matches!(err, ControlPlaneError::Validation(_)));

        let mut bad_chat = payload_with_function();
        bad_chat.function.as_mut().unwrap().mapping.chat_completion = "/with space".to_string();
        assert!(
            prepare_application(&app_ref(), bad_chat, None, &StorageConfig::default()).is_err()
        );
    }

    #[test]
    fn source_folder_must_match_bucket() {
        let mut payload = payload_with_function();
        payload.function.as_mut().unwrap().source_folder = "files/other/sources/".to_string();
        let err = prepare_application(&app_ref(), payload, None, &StorageConfig::default())
            .unwrap_err();
        assert!(matches!(err, ControlPlaneError::Validation(_)));

        let mut not_folder = payload_with_function();
        not_folder.function.as_mut().unwrap().source_folder = "files/bkt1/sources".to_string();
        assert!(
            prepare_application(&app_ref(), not_folder, None, &StorageConfig::default()).is_err()
        );
    }

    #[test]
    fn payload_cannot_set_endpoint_on_function_application() {
        let storage = StorageConfig::default();
        let created =
            prepare_application(&app_ref(), payload_with_function(), None, &storage).unwrap();
        assert!(created.endpoint.is_none());
        assert!(created.features.is_none());
    }
}
