//! Superkey Request Types
//!
//! Wire types for create/destroy requests and the step vocabulary shared by
//! the providers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One unit of provisioning work, as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// Position assigned by the caller. Informational only: steps run in the
    /// order they appear in the request.
    #[serde(rename = "step", default)]
    pub order: i64,
    /// Step kind (`s3`, `policy`, `role`, `bind_role`, `cost_report`)
    pub name: String,
    /// Payload template (policy documents, report definitions, ...)
    #[serde(default)]
    pub payload: String,
    /// Placeholder -> substitution kind
    #[serde(default)]
    pub substitutions: BTreeMap<String, String>,
}

impl Step {
    pub fn new(order: i64, name: &str, payload: &str) -> Self {
        Self {
            order,
            name: name.to_string(),
            payload: payload.to_string(),
            substitutions: BTreeMap::new(),
        }
    }

    /// Add a placeholder substitution
    pub fn substitute(mut self, placeholder: &str, kind: &str) -> Self {
        self.substitutions
            .insert(placeholder.to_string(), kind.to_string());
        self
    }
}

/// The closed set of step kinds the step-sequenced provider understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Storage bucket (wire name `s3`)
    #[serde(rename = "s3")]
    Bucket,
    Policy,
    Role,
    /// Policy attached to role
    BindRole,
    /// Cost and usage report definition
    CostReport,
}

impl StepKind {
    /// Fixed, dependency-safe teardown order.
    pub const TEARDOWN_ORDER: [StepKind; 5] = [
        StepKind::BindRole,
        StepKind::Policy,
        StepKind::Role,
        StepKind::CostReport,
        StepKind::Bucket,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Bucket => "s3",
            StepKind::Policy => "policy",
            StepKind::Role => "role",
            StepKind::BindRole => "bind_role",
            StepKind::CostReport => "cost_report",
        }
    }

    /// Resolve a wire step name. Unknown names yield `None`.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "s3" => Some(StepKind::Bucket),
            "policy" => Some(StepKind::Policy),
            "role" => Some(StepKind::Role),
            "bind_role" => Some(StepKind::BindRole),
            "cost_report" => Some(StepKind::CostReport),
            _ => None,
        }
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a placeholder in a step payload gets its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubstitutionKind {
    /// `get_account`: the `account` entry of the request's extra bag
    Account,
    /// `s3`: the recorded output of the bucket step
    BucketName,
    /// `generate_external_id`: the `external_id` extra, only when present
    ExternalId,
}

impl SubstitutionKind {
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "get_account" => Some(SubstitutionKind::Account),
            "s3" => Some(SubstitutionKind::BucketName),
            "generate_external_id" => Some(SubstitutionKind::ExternalId),
            _ => None,
        }
    }
}

/// Request to provision a superkey application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRequest {
    /// Forwarded caller identity (`x-rh-identity` message header)
    #[serde(default)]
    pub identity_header: String,
    /// Caller org id (`x-rh-sources-org-id` message header)
    #[serde(default)]
    pub org_id_header: String,
    pub tenant_id: String,
    #[serde(default)]
    pub source_id: String,
    #[serde(default)]
    pub application_id: String,
    #[serde(default)]
    pub application_type: String,
    /// Id of the tenant's stored superkey authentication
    #[serde(rename = "super_key", default)]
    pub superkey: String,
    pub provider: String,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
    #[serde(rename = "superkey_steps", default)]
    pub steps: Vec<Step>,
}

impl CreateRequest {
    /// Inventory authentication context travelling with the request.
    pub fn auth_context(&self) -> crate::inventory::AuthContext {
        crate::inventory::AuthContext {
            identity_header: self.identity_header.clone(),
            org_id: self.org_id_header.clone(),
            account_number: self.extra.get("account").cloned().unwrap_or_default(),
        }
    }
}

/// Request to tear down a previously forged application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestroyRequest {
    #[serde(default)]
    pub identity_header: String,
    #[serde(default)]
    pub org_id_header: String,
    pub tenant_id: String,
    #[serde(rename = "super_key", default)]
    pub superkey: String,
    pub guid: String,
    pub provider: String,
    #[serde(default)]
    pub steps_completed: super::StepsCompleted,
}
