//! Superkey Providers
//!
//! Trait-based abstraction over the cloud providers a superkey can be forged
//! in. Each provider is constructed per request from the tenant's own
//! credential and never shared.

pub mod amazon;
pub mod azure;
mod registry;

pub use registry::{ProviderFactory, ProviderRegistry};

use async_trait::async_trait;
use rand::RngCore;
use std::path::Path;

use crate::error::SuperkeyError;
use crate::superkey::{CreateRequest, ForgedApplication};

/// A cloud provider able to forge and tear down superkey applications
#[async_trait]
pub trait SuperkeyProvider: Send + Sync {
    /// Registry name (`amazon`, `azure`)
    fn name(&self) -> &'static str;

    /// Run `app.request` against the provider, recording each completed
    /// step on `app` as it finishes. The caller owns `app`, so whatever was
    /// recorded survives an error or a dropped future.
    async fn forge(&self, app: &mut ForgedApplication) -> Result<(), SuperkeyError>;

    /// Forge a fresh application for `request`.
    ///
    /// On failure the partially forged application is returned inside the
    /// error so the caller can tear down exactly what completed.
    async fn forge_application(
        &self,
        request: &CreateRequest,
    ) -> Result<ForgedApplication, ForgeFailure> {
        let mut app = ForgedApplication::new(request.clone(), generate_guid());
        match self.forge(&mut app).await {
            Ok(()) => Ok(app),
            Err(error) => Err(ForgeFailure::new(app, error)),
        }
    }

    /// Undo every completed step. Every compensation is attempted; all
    /// failures are returned.
    async fn tear_down(&self, app: &ForgedApplication) -> Vec<SuperkeyError>;
}

/// A failed forge, with whatever progress was made before the failure
#[derive(Debug)]
pub struct ForgeFailure {
    pub partial: Option<Box<ForgedApplication>>,
    pub error: SuperkeyError,
}

impl ForgeFailure {
    pub fn new(partial: ForgedApplication, error: SuperkeyError) -> Self {
        Self {
            partial: Some(Box::new(partial)),
            error,
        }
    }

    /// Failure before any application state existed
    pub fn early(error: SuperkeyError) -> Self {
        Self {
            partial: None,
            error,
        }
    }
}

impl From<SuperkeyError> for ForgeFailure {
    fn from(error: SuperkeyError) -> Self {
        Self::early(error)
    }
}

/// Short random id embedded in every resource name of one create request
pub fn generate_guid() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// `/insights/platform/cost-management` -> `redhat-cost-management`
pub fn short_name(application_type: &str) -> String {
    let base = Path::new(application_type.trim_end_matches('/'))
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(application_type);
    format!("redhat-{}", base)
}
