//! Forge outcome delivery
//!
//! `deliver` ships a fully forged application to the inventory service;
//! `mark_unavailable` records a failed create against the application and
//! its source.

use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

use super::types::{
    ApplicationAuthenticationCreateRequest, AuthenticationCreateRequest, PatchApplicationRequest,
    PatchSourceRequest,
};
use super::InventoryApi;
use crate::error::ReportingError;
use crate::superkey::{CreateRequest, ForgedApplication};

const UNAVAILABLE: &str = "unavailable";

pub struct Reporter {
    inventory: Arc<dyn InventoryApi>,
}

impl Reporter {
    pub fn new(inventory: Arc<dyn InventoryApi>) -> Self {
        Self { inventory }
    }

    /// Patch the application extra, create and link the authentication, then
    /// request an availability check. Stops at the first failing call.
    pub async fn deliver(&self, app: &ForgedApplication) -> Result<(), ReportingError> {
        let product = app.product.as_ref().ok_or_else(|| {
            ReportingError::new("deliver", None, "forged application has no product payload")
        })?;
        let request = &app.request;
        let auth = request.auth_context();

        let patch = PatchApplicationRequest {
            extra: Some(product.extra.clone()),
            ..Default::default()
        };
        self.inventory
            .patch_application(&auth, &request.application_id, &patch)
            .await?;
        debug!("Stored superkey data on the application");

        let mut extra = Map::new();
        if let Some(external_id) = request.extra.get("external_id") {
            extra.insert("external_id".to_string(), Value::String(external_id.clone()));
        }
        let authentication = AuthenticationCreateRequest {
            authtype: product.authentication.authtype.clone(),
            username: product.authentication.username.clone(),
            resource_type: product.authentication.resource_type.clone(),
            resource_id: product.authentication.resource_id.clone(),
            extra: Value::Object(extra),
        };
        let created = self
            .inventory
            .create_authentication(&auth, &authentication)
            .await?;

        let link = ApplicationAuthenticationCreateRequest {
            application_id: request.application_id.clone(),
            authentication_id: created.id.clone(),
        };
        self.inventory
            .create_application_authentication(&auth, &link)
            .await?;
        info!(authentication_id = %created.id, "Authentication created and linked");

        self.inventory
            .trigger_availability_check(&auth, &product.source_id)
            .await?;
        info!("Availability check requested");

        Ok(())
    }

    /// Mark the application and its source "unavailable" with a readable cause.
    ///
    /// `app` carries whatever progress was made so the inventory keeps a record
    /// of it; it is `None` when the request failed before forging started.
    pub async fn mark_unavailable(
        &self,
        request: &CreateRequest,
        cause: &str,
        app: Option<&ForgedApplication>,
    ) -> Result<(), ReportingError> {
        let auth = request.auth_context();
        let extra = app
            .map(ForgedApplication::extra_payload)
            .unwrap_or_else(|| Value::Object(Map::new()));

        let patch = PatchApplicationRequest {
            availability_status: Some(UNAVAILABLE.to_string()),
            availability_status_error: Some(unavailable_reason(&request.provider, cause)),
            extra: Some(extra),
        };
        self.inventory
            .patch_application(&auth, &request.application_id, &patch)
            .await?;
        info!("Application marked as \"unavailable\"");

        let patch = PatchSourceRequest {
            availability_status: UNAVAILABLE.to_string(),
        };
        self.inventory
            .patch_source(&auth, &request.source_id, &patch)
            .await?;
        info!("Source marked as \"unavailable\"");

        Ok(())
    }
}

fn unavailable_reason(provider: &str, cause: &str) -> String {
    format!(
        "Resource Creation error: failed to create resources in {}. Error: {}",
        display_name(provider),
        cause
    )
}

/// `amazon` -> `Amazon`
fn display_name(provider: &str) -> String {
    let mut chars = provider.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::superkey::outputs;
    use crate::testing::{Call, FakeInventory};

    fn request() -> CreateRequest {
        CreateRequest {
            identity_header: "aWQ=".to_string(),
            tenant_id: "1234".to_string(),
            source_id: "10".to_string(),
            application_id: "20".to_string(),
            application_type: "/insights/platform/cost-management".to_string(),
            superkey: "30".to_string(),
            provider: "amazon".to_string(),
            extra: [
                ("result_type".to_string(), "arn".to_string()),
                ("external_id".to_string(), "ext-1".to_string()),
            ]
            .into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_unavailable_reason() {
        assert_eq!(
            unavailable_reason("amazon", "boom"),
            "Resource Creation error: failed to create resources in Amazon. Error: boom"
        );
        assert_eq!(display_name(""), "");
    }

    #[tokio::test]
    async fn test_deliver_runs_calls_in_order() {
        let inventory = Arc::new(FakeInventory::default());
        let reporter = Reporter::new(inventory.clone());

        let mut app = ForgedApplication::new(request(), "abcd".to_string());
        app.mark_completed("role", outputs([("output", "r"), ("arn", "arn:aws:iam::1:role/r")]));
        app.create_payload("arn:aws:iam::1:role/r");

        reporter.deliver(&app).await.unwrap();

        let calls = inventory.calls();
        assert_eq!(
            calls,
            vec![
                Call::PatchApplication("20".to_string()),
                Call::CreateAuthentication("arn:aws:iam::1:role/r".to_string()),
                Call::LinkAuthentication("20".to_string(), "auth-1".to_string()),
                Call::CheckAvailability("10".to_string()),
            ]
        );

        let created = inventory.created_authentications();
        assert_eq!(created[0].extra["external_id"], "ext-1");
        assert_eq!(created[0].resource_type, "Application");
    }

    #[tokio::test]
    async fn test_deliver_stops_at_first_failure() {
        let inventory = Arc::new(FakeInventory::default());
        inventory.fail_on("create authentication");
        let reporter = Reporter::new(inventory.clone());

        let mut app = ForgedApplication::new(request(), "abcd".to_string());
        app.create_payload("arn");

        let err = reporter.deliver(&app).await.unwrap_err();
        assert_eq!(err.operation, "create authentication");
        assert_eq!(inventory.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_deliver_without_product_fails() {
        let inventory = Arc::new(FakeInventory::default());
        let reporter = Reporter::new(inventory.clone());
        let app = ForgedApplication::new(request(), "abcd".to_string());

        assert!(reporter.deliver(&app).await.is_err());
        assert!(inventory.calls().is_empty());
    }

    #[tokio::test]
    async fn test_mark_unavailable_patches_application_then_source() {
        let inventory = Arc::new(FakeInventory::default());
        let reporter = Reporter::new(inventory.clone());

        let mut app = ForgedApplication::new(request(), "abcd".to_string());
        app.mark_completed("s3", outputs([("output", "bucket-abcd")]));

        reporter
            .mark_unavailable(&request(), "role creation failed", Some(&app))
            .await
            .unwrap();

        assert_eq!(
            inventory.calls(),
            vec![
                Call::PatchApplication("20".to_string()),
                Call::PatchSource("10".to_string()),
            ]
        );
        let patch = &inventory.application_patches()[0];
        assert_eq!(patch.availability_status.as_deref(), Some("unavailable"));
        assert_eq!(
            patch.availability_status_error.as_deref(),
            Some("Resource Creation error: failed to create resources in Amazon. Error: role creation failed")
        );
        assert_eq!(patch.extra.as_ref().unwrap()["bucket"], "bucket-abcd");
    }

    #[tokio::test]
    async fn test_mark_unavailable_without_progress() {
        let inventory = Arc::new(FakeInventory::default());
        let reporter = Reporter::new(inventory.clone());

        reporter
            .mark_unavailable(&request(), "missing credential", None)
            .await
            .unwrap();

        let patch = &inventory.application_patches()[0];
        assert_eq!(patch.extra, Some(serde_json::json!({})));
    }
}
