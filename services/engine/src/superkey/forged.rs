//! Forged Application
//!
//! The in-memory result of a forge attempt.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;

use super::{CreateRequest, DestroyRequest, StepKind, StepOutputs, StepsCompleted};
use crate::provider::SuperkeyProvider;

/// Authentication record shipped to the inventory service after a forge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuperkeyAuthentication {
    pub authtype: String,
    pub username: String,
    pub resource_type: String,
    pub resource_id: String,
}

/// Everything the inventory service needs to know about a forged application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub source_id: String,
    pub extra: Value,
    #[serde(rename = "authentication_payload")]
    pub authentication: SuperkeyAuthentication,
}

/// State of one forge attempt, owned by a single request's task.
pub struct ForgedApplication {
    /// Short correlation id embedded in every resource name
    pub guid: String,
    pub request: CreateRequest,
    pub steps_completed: StepsCompleted,
    /// Orchestrator that forged (or will tear down) this application
    pub provider: Option<Arc<dyn SuperkeyProvider>>,
    /// Populated once every step succeeded
    pub product: Option<Product>,
}

impl std::fmt::Debug for ForgedApplication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForgedApplication")
            .field("guid", &self.guid)
            .field("tenant_id", &self.request.tenant_id)
            .field("provider", &self.request.provider)
            .field("steps_completed", &self.steps_completed)
            .field("product", &self.product)
            .finish()
    }
}

impl ForgedApplication {
    pub fn new(request: CreateRequest, guid: String) -> Self {
        Self {
            guid,
            request,
            steps_completed: StepsCompleted::new(),
            provider: None,
            product: None,
        }
    }

    /// Rebuild an application from a destroy request, for teardown only.
    pub fn reconstruct(request: &DestroyRequest) -> Self {
        Self {
            guid: request.guid.clone(),
            request: CreateRequest {
                identity_header: request.identity_header.clone(),
                org_id_header: request.org_id_header.clone(),
                tenant_id: request.tenant_id.clone(),
                superkey: request.superkey.clone(),
                provider: request.provider.clone(),
                ..Default::default()
            },
            steps_completed: request.steps_completed.clone(),
            provider: None,
            product: None,
        }
    }

    /// Destroy request that would tear down exactly what this application holds.
    pub fn destroy_request(&self) -> DestroyRequest {
        DestroyRequest {
            identity_header: self.request.identity_header.clone(),
            org_id_header: self.request.org_id_header.clone(),
            tenant_id: self.request.tenant_id.clone(),
            superkey: self.request.superkey.clone(),
            guid: self.guid.clone(),
            provider: self.request.provider.clone(),
            steps_completed: self.steps_completed.clone(),
        }
    }

    pub fn mark_completed(&mut self, step: &str, outputs: StepOutputs) {
        self.steps_completed.mark_completed(step, outputs);
    }

    /// Populate the `Product` from the completed steps.
    pub fn create_payload(&mut self, username: &str) {
        let authtype = self
            .request
            .extra
            .get("result_type")
            .cloned()
            .unwrap_or_default();

        self.product = Some(Product {
            source_id: self.request.source_id.clone(),
            extra: self.extra_payload(),
            authentication: SuperkeyAuthentication {
                authtype,
                username: username.to_string(),
                resource_type: "Application".to_string(),
                resource_id: self.request.application_id.clone(),
            },
        });
    }

    /// Application `extra` blob: the superkey audit record plus the bucket name.
    pub fn extra_payload(&self) -> Value {
        let mut extra = Map::new();
        extra.insert(
            "_superkey".to_string(),
            json!({
                "steps": self.steps_completed,
                "guid": self.guid,
                "provider": self.request.provider,
            }),
        );

        if let Some(bucket) = self.steps_completed.output(StepKind::Bucket.as_str(), "output") {
            extra.insert("bucket".to_string(), Value::String(bucket.to_string()));
        }

        Value::Object(extra)
    }
}
