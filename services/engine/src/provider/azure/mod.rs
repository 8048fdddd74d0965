//! Azure Provider
//!
//! Single-deployment orchestrator: one named subscription-level lighthouse
//! deployment per request, run through an `az` session that is logged in
//! for the duration of the operation.

mod cli;
mod template;

pub use cli::{AzCli, AzCliLauncher, AzureCli, AzureCliLauncher};
pub use template::{prepare_template, TemplateSource, DEFAULT_TEMPLATE_PATH};

use anyhow::anyhow;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use super::{ProviderFactory, SuperkeyProvider};
use crate::error::SuperkeyError;
use crate::inventory::InternalAuthentication;
use crate::superkey::ForgedApplication;

pub const PROVIDER_NAME: &str = "azure";

/// Step name the deployment is recorded under
pub const LIGHTHOUSE_STEP: &str = "az-lighthouse";

/// Service principal used to log in
#[derive(Clone)]
pub struct ServicePrincipal {
    pub username: String,
    pub password: String,
    pub tenant: String,
}

pub struct AzureProvider {
    principal: ServicePrincipal,
    launcher: Arc<dyn AzureCliLauncher>,
    template: Option<PathBuf>,
}

impl AzureProvider {
    pub fn new(
        principal: ServicePrincipal,
        launcher: Arc<dyn AzureCliLauncher>,
        template: Option<PathBuf>,
    ) -> Self {
        Self {
            principal,
            launcher,
            template,
        }
    }

    async fn deploy(&self, name: &str, template: &std::path::Path) -> anyhow::Result<String> {
        let session = self.launcher.open()?;
        session
            .login(&self.principal.username, &self.principal.password, &self.principal.tenant)
            .await?;

        let deployed = session.deploy_subscription_template(name, template).await;
        let logged_out = session.logout().await;

        let subscription_id = deployed?;
        logged_out?;
        Ok(subscription_id)
    }

    async fn delete(&self, name: &str) -> anyhow::Result<()> {
        let session = self.launcher.open()?;
        session
            .login(&self.principal.username, &self.principal.password, &self.principal.tenant)
            .await?;

        let deleted = session.delete_deployment(name).await;
        let logged_out = session.logout().await;

        deleted?;
        logged_out
    }
}

#[async_trait]
impl SuperkeyProvider for AzureProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn forge(&self, app: &mut ForgedApplication) -> Result<(), SuperkeyError> {
        let template = self.template.as_deref().ok_or_else(|| {
            SuperkeyError::Configuration(
                "Azure deployment template is not prepared, resource creation impossible".to_string(),
            )
        })?;

        let name = format!("redhat-cloudmeter-{}", app.guid);
        // Recorded up front so a failed deployment can still be cleaned up
        app.steps_completed.set_output(LIGHTHOUSE_STEP, "name", &name);
        info!(deployment = %name, "Deploying Azure lighthouse template");

        match self.deploy(&name, template).await {
            Ok(subscription_id) => {
                app.steps_completed
                    .set_output(LIGHTHOUSE_STEP, "subscriptionID", &subscription_id);
                app.create_payload(&subscription_id);
                info!(deployment = %name, subscription_id = %subscription_id, "Azure deployment finished");
                Ok(())
            }
            Err(e) => {
                warn!(deployment = %name, error = %format!("{:#}", e), "Azure deployment failed");
                Err(SuperkeyError::Deployment(e))
            }
        }
    }

    async fn tear_down(&self, app: &ForgedApplication) -> Vec<SuperkeyError> {
        let Some(name) = app.steps_completed.output(LIGHTHOUSE_STEP, "name") else {
            return Vec::new();
        };

        match self.delete(name).await {
            Ok(()) => {
                info!(deployment = %name, "Azure deployment deleted");
                Vec::new()
            }
            Err(e) => vec![SuperkeyError::compensation(LIGHTHOUSE_STEP, name, e)],
        }
    }
}

/// Builds an `AzureProvider` from a tenant's service principal
pub struct AzureProviderFactory {
    launcher: Arc<dyn AzureCliLauncher>,
    template: Option<PathBuf>,
}

impl AzureProviderFactory {
    pub fn new(launcher: Arc<dyn AzureCliLauncher>, template: Option<PathBuf>) -> Self {
        Self { launcher, template }
    }
}

#[async_trait]
impl ProviderFactory for AzureProviderFactory {
    async fn build(
        &self,
        credential: &InternalAuthentication,
    ) -> Result<Arc<dyn SuperkeyProvider>, SuperkeyError> {
        let tenant = credential
            .extra_str(&[&["azure", "tenant_id"], &["tenant_id"]])
            .ok_or_else(|| {
                SuperkeyError::step(
                    LIGHTHOUSE_STEP,
                    anyhow!("authentication \"{}\" has no Azure tenant id", credential.id),
                )
            })?;

        let principal = ServicePrincipal {
            username: credential.username.clone(),
            password: credential.password.clone(),
            tenant,
        };
        Ok(Arc::new(AzureProvider::new(
            principal,
            self.launcher.clone(),
            self.template.clone(),
        )))
    }
}
