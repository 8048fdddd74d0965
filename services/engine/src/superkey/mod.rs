//! Superkey Data Model
//!
//! Requests, the durable `steps_completed` record and the in-memory
//! `ForgedApplication` that flows from forging to reporting or teardown.

mod forged;
mod types;

pub use forged::{ForgedApplication, Product, SuperkeyAuthentication};
pub use types::{CreateRequest, DestroyRequest, Step, StepKind, SubstitutionKind};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Output key -> value recorded for one completed step.
pub type StepOutputs = BTreeMap<String, String>;

/// Record of which steps finished and what they produced.
///
/// Serializes to the open `{"<step>": {"<key>": "<value>"}}` shape the
/// inventory service stores and hands back on destroy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepsCompleted(BTreeMap<String, StepOutputs>);

impl StepsCompleted {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed step. A repeated name overwrites the prior record.
    pub fn mark_completed(&mut self, step: &str, outputs: StepOutputs) {
        self.0.insert(step.to_string(), outputs);
    }

    pub fn contains(&self, step: &str) -> bool {
        self.0.contains_key(step)
    }

    pub fn get(&self, step: &str) -> Option<&StepOutputs> {
        self.0.get(step)
    }

    /// A single recorded output value, e.g. `output("role", "arn")`.
    pub fn output(&self, step: &str, key: &str) -> Option<&str> {
        self.0.get(step)?.get(key).map(String::as_str)
    }

    pub fn set_output(&mut self, step: &str, key: &str, value: &str) {
        self.0
            .entry(step.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn step_names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

/// Build a `StepOutputs` map from key/value pairs.
pub fn outputs<const N: usize>(pairs: [(&str, &str); N]) -> StepOutputs {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
