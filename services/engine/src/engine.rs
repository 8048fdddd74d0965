//! Superkey Engine
//!
//! Drives a request end to end: provider selection, forging, delivery to
//! the inventory service, and teardown plus "unavailable" marking whenever
//! any of it fails.

use std::sync::Arc;
use tracing::{error, info, info_span, Instrument};

use crate::config::ForgeConfig;
use crate::error::{SuperkeyError, TeardownError};
use crate::inventory::{AuthContext, InventoryApi, Reporter};
use crate::provider::{generate_guid, ForgeFailure, ProviderRegistry, SuperkeyProvider};
use crate::superkey::{CreateRequest, DestroyRequest, ForgedApplication};

pub struct SuperkeyEngine {
    registry: ProviderRegistry,
    inventory: Arc<dyn InventoryApi>,
    reporter: Reporter,
    config: ForgeConfig,
}

impl SuperkeyEngine {
    pub fn new(registry: ProviderRegistry, inventory: Arc<dyn InventoryApi>, config: ForgeConfig) -> Self {
        Self {
            registry,
            reporter: Reporter::new(inventory.clone()),
            inventory,
            config,
        }
    }

    /// Build a provider bound to the tenant's stored credential.
    ///
    /// The provider name is checked before the credential is fetched.
    async fn provider_for(
        &self,
        provider: &str,
        superkey: &str,
        auth: &AuthContext,
    ) -> Result<Arc<dyn SuperkeyProvider>, SuperkeyError> {
        let factory = self.registry.get(provider)?;

        let credential = self
            .inventory
            .get_internal_authentication(auth, superkey)
            .await?;
        if !credential.is_complete() {
            return Err(SuperkeyError::MissingCredential {
                authentication_id: credential.id.clone(),
                superkey: superkey.to_string(),
            });
        }

        factory.build(&credential).await
    }

    /// Forge the request's resources with a freshly built provider.
    pub async fn forge(&self, request: &CreateRequest) -> Result<ForgedApplication, ForgeFailure> {
        let mut app = ForgedApplication::new(request.clone(), generate_guid());
        match self.forge_into(&mut app).await {
            Ok(()) => Ok(app),
            Err(error) if app.provider.is_none() => Err(ForgeFailure::early(error)),
            Err(error) => Err(ForgeFailure::new(app, error)),
        }
    }

    /// Build the provider and forge into `app`, which keeps every step
    /// recorded so far whatever happens to this future.
    async fn forge_into(&self, app: &mut ForgedApplication) -> Result<(), SuperkeyError> {
        let provider = self
            .provider_for(&app.request.provider, &app.request.superkey, &app.request.auth_context())
            .await?;
        app.provider = Some(provider.clone());
        provider.forge(app).await
    }

    async fn forge_and_deliver(&self, app: &mut ForgedApplication) -> Result<(), SuperkeyError> {
        self.forge_into(app).await?;
        info!(guid = %app.guid, "Finished forging request");

        if !self.config.iam_settle_wait.is_zero() {
            tokio::time::sleep(self.config.iam_settle_wait).await;
        }

        self.reporter.deliver(app).await?;
        Ok(())
    }

    /// Undo whatever `app` recorded. A reconstructed application gets its
    /// provider built here.
    pub async fn tear_down(&self, app: &mut ForgedApplication) -> Vec<SuperkeyError> {
        let provider = match &app.provider {
            Some(provider) => provider.clone(),
            None => {
                let auth = app.request.auth_context();
                match self
                    .provider_for(&app.request.provider, &app.request.superkey, &auth)
                    .await
                {
                    Ok(provider) => {
                        app.provider = Some(provider.clone());
                        provider
                    }
                    Err(e) => return vec![e],
                }
            }
        };

        provider.tear_down(app).await
    }

    /// Handle a `create_application` request.
    pub async fn create_resources(&self, request: CreateRequest) -> Result<(), SuperkeyError> {
        let span = info_span!(
            "create_application",
            tenant_id = %request.tenant_id,
            source_id = %request.source_id,
            application_id = %request.application_id,
            application_type = %request.application_type,
            provider = %request.provider,
        );

        async move {
            info!("Processing \"create_application\" request");

            let deadline = self.config.request_deadline;
            let mut app = ForgedApplication::new(request.clone(), generate_guid());
            let outcome = tokio::time::timeout(deadline, self.forge_and_deliver(&mut app))
                .await
                .unwrap_or(Err(SuperkeyError::DeadlineExceeded(deadline)));

            match outcome {
                Ok(()) => {
                    info!(guid = %app.guid, "Finished processing \"create_application\" request");
                    Ok(())
                }
                Err(error) => {
                    error!(guid = %app.guid, error = %error, "Tearing down superkey request");
                    // Cleanup runs outside the deadline
                    let progress = if app.steps_completed.is_empty() {
                        None
                    } else {
                        log_teardown(self.tear_down(&mut app).await);
                        Some(&app)
                    };
                    self.mark_unavailable(&request, &error, progress).await;
                    Err(error)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Handle a `destroy_application` request.
    pub async fn destroy_resources(&self, request: DestroyRequest) -> Result<(), SuperkeyError> {
        let span = info_span!(
            "destroy_application",
            tenant_id = %request.tenant_id,
            provider = %request.provider,
            guid = %request.guid,
        );

        async move {
            info!(steps = request.steps_completed.len(), "Processing \"destroy_application\" request");

            let deadline = self.config.request_deadline;
            let mut app = ForgedApplication::reconstruct(&request);
            let errors = tokio::time::timeout(deadline, self.tear_down(&mut app))
                .await
                .map_err(|_| SuperkeyError::DeadlineExceeded(deadline))?;
            for e in &errors {
                error!(error = %e, "Error during teardown");
            }

            match TeardownError::from_failures(errors) {
                Some(e) => Err(e.into()),
                None => {
                    info!("Finished destroying resources");
                    Ok(())
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn mark_unavailable(
        &self,
        request: &CreateRequest,
        cause: &SuperkeyError,
        app: Option<&ForgedApplication>,
    ) {
        if let Err(e) = self
            .reporter
            .mark_unavailable(request, &cause.to_string(), app)
            .await
        {
            error!(error = %e, "Error while marking the source and application as \"unavailable\"");
        }
    }
}

fn log_teardown(errors: Vec<SuperkeyError>) {
    for e in errors {
        error!(error = %e, "Unable to tear down application");
    }
}
