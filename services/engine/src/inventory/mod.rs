//! Sources Inventory Reporting
//!
//! The inventory service is the system of record for sources, applications
//! and authentications. This module fetches tenant credentials from it and
//! reports forge outcomes back to it.

mod client;
mod reporter;
mod types;

pub use client::{synthesize_identity, InventoryClient};
pub use reporter::Reporter;
pub use types::{
    ApplicationAuthenticationCreateRequest, AuthContext, AuthenticationCreateRequest,
    AuthenticationResponse, InternalAuthentication, PatchApplicationRequest, PatchSourceRequest,
};

use async_trait::async_trait;

use crate::error::ReportingError;

/// Inventory service operations consumed by the engine
#[async_trait]
pub trait InventoryApi: Send + Sync {
    /// Fetch a stored authentication with its secret exposed
    async fn get_internal_authentication(
        &self,
        auth: &AuthContext,
        authentication_id: &str,
    ) -> Result<InternalAuthentication, ReportingError>;

    async fn patch_application(
        &self,
        auth: &AuthContext,
        application_id: &str,
        patch: &PatchApplicationRequest,
    ) -> Result<(), ReportingError>;

    async fn patch_source(
        &self,
        auth: &AuthContext,
        source_id: &str,
        patch: &PatchSourceRequest,
    ) -> Result<(), ReportingError>;

    async fn create_authentication(
        &self,
        auth: &AuthContext,
        authentication: &AuthenticationCreateRequest,
    ) -> Result<AuthenticationResponse, ReportingError>;

    async fn create_application_authentication(
        &self,
        auth: &AuthContext,
        link: &ApplicationAuthenticationCreateRequest,
    ) -> Result<(), ReportingError>;

    /// Ask the inventory service to re-check a source asynchronously
    async fn trigger_availability_check(
        &self,
        auth: &AuthContext,
        source_id: &str,
    ) -> Result<(), ReportingError>;
}
