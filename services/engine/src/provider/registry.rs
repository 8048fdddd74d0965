//! Provider Registry
//!
//! Read-only lookup table from provider name to the factory that builds a
//! fresh provider for each request.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use super::SuperkeyProvider;
use crate::error::SuperkeyError;
use crate::inventory::InternalAuthentication;

/// Builds a provider bound to one tenant credential
#[async_trait]
pub trait ProviderFactory: Send + Sync {
    async fn build(
        &self,
        credential: &InternalAuthentication,
    ) -> Result<Arc<dyn SuperkeyProvider>, SuperkeyError>;
}

#[derive(Default, Clone)]
pub struct ProviderRegistry {
    factories: HashMap<String, Arc<dyn ProviderFactory>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, name: &str, factory: Arc<dyn ProviderFactory>) -> Self {
        self.factories.insert(name.to_string(), factory);
        self
    }

    /// Factory for `name`, or `UnsupportedProvider`
    pub fn get(&self, name: &str) -> Result<Arc<dyn ProviderFactory>, SuperkeyError> {
        self.factories
            .get(name)
            .cloned()
            .ok_or_else(|| SuperkeyError::UnsupportedProvider(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}
