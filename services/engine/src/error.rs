//! Superkey error taxonomy
//!
//! Every failure the engine can surface, from malformed inbound messages to
//! partially failed teardowns.

use thiserror::Error;

/// Errors that can occur while forging or tearing down a superkey application
#[derive(Debug, Error)]
pub enum SuperkeyError {
    /// Inbound message could not be decoded
    #[error("Invalid superkey request: {0}")]
    Validation(String),

    /// No orchestrator is registered under the requested provider name
    #[error("Unsupported auth provider \"{0}\"")]
    UnsupportedProvider(String),

    /// The tenant's stored credential has an empty identity or secret
    #[error(
        "Missing username or password from authentication ID \"{authentication_id}\" and superkey credential \"{superkey}\""
    )]
    MissingCredential {
        authentication_id: String,
        superkey: String,
    },

    /// A provisioning step failed against the cloud provider
    #[error("Superkey step \"{step}\" failed: {cause:#}")]
    StepExecution {
        step: String,
        #[source]
        cause: anyhow::Error,
    },

    /// The step name is outside the provider's closed vocabulary
    #[error("Superkey step \"{0}\" not implemented")]
    UnimplementedStep(String),

    /// A call against the inventory service failed
    #[error(transparent)]
    Reporting(#[from] ReportingError),

    /// The single-deployment provider failed to deploy or clean up
    #[error("Deployment error: {0:#}")]
    Deployment(anyhow::Error),

    /// A single compensation inside a teardown failed
    #[error("Failed to tear down {step} \"{resource}\": {cause:#}")]
    Compensation {
        step: String,
        resource: String,
        #[source]
        cause: anyhow::Error,
    },

    /// Aggregate of every compensation that failed
    #[error(transparent)]
    Teardown(#[from] TeardownError),

    /// Startup or runtime configuration is unusable
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The request did not finish within its deadline
    #[error("Request deadline of {0:?} exceeded")]
    DeadlineExceeded(std::time::Duration),
}

impl SuperkeyError {
    pub fn step(step: impl Into<String>, cause: anyhow::Error) -> Self {
        SuperkeyError::StepExecution {
            step: step.into(),
            cause,
        }
    }

    pub fn compensation(
        step: impl Into<String>,
        resource: impl Into<String>,
        cause: anyhow::Error,
    ) -> Self {
        SuperkeyError::Compensation {
            step: step.into(),
            resource: resource.into(),
            cause,
        }
    }
}

/// Failure of a retry-protected call against the inventory service.
///
/// `status` is `None` when no response was ever received, in which case
/// `body` carries the transport error.
#[derive(Debug, Clone, Error)]
#[error("{operation} failed (status: {}): {body}", status_label(.status))]
pub struct ReportingError {
    pub operation: String,
    pub status: Option<u16>,
    pub body: String,
}

impl ReportingError {
    pub fn new(operation: impl Into<String>, status: Option<u16>, body: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            status,
            body: body.into(),
        }
    }
}

/// Every error collected by a teardown. May be empty.
#[derive(Debug, Default, Error)]
#[error("{} teardown error(s): {}", .failures.len(), join(.failures))]
pub struct TeardownError {
    pub failures: Vec<SuperkeyError>,
}

impl TeardownError {
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Wrap collected failures, or `None` when the teardown was clean.
    pub fn from_failures(failures: Vec<SuperkeyError>) -> Option<Self> {
        if failures.is_empty() {
            None
        } else {
            Some(Self { failures })
        }
    }
}

fn status_label(status: &Option<u16>) -> String {
    status
        .map(|s| s.to_string())
        .unwrap_or_else(|| "none".to_string())
}

fn join(failures: &[SuperkeyError]) -> String {
    failures
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
