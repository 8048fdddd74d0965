//! Superkey Engine Library
//!
//! Provisions per-tenant cloud access from a stored superkey credential,
//! reports the result to the sources inventory service, and tears the
//! resources down again on request or failure.

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod inventory;
pub mod provider;
pub mod superkey;

#[cfg(test)]
mod testing;

pub use config::{AzureConfig, ForgeConfig, InventoryConfig};
pub use dispatch::{Dispatcher, DispatcherConfig, Event, Message};
pub use engine::SuperkeyEngine;
pub use error::{ReportingError, SuperkeyError, TeardownError};
pub use inventory::{InventoryApi, InventoryClient};
pub use provider::{ProviderFactory, ProviderRegistry, SuperkeyProvider};
