//! Amazon cloud primitives
//!
//! The operations the Amazon orchestrator invokes. Implementations must treat
//! deleting an already absent resource as success so teardown can be
//! repeated.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Bucket policy allowing the billing service to deliver cost reports.
/// `S3BUCKET` is replaced with the bucket name.
pub const COST_S3_POLICY: &str = r#"{
    "Version": "2012-10-17",
    "Statement": [
        {
            "Effect": "Allow",
            "Principal": {"Service": "billingreports.amazonaws.com"},
            "Action": ["s3:GetBucketAcl", "s3:GetBucketPolicy"],
            "Resource": "arn:aws:s3:::S3BUCKET"
        },
        {
            "Effect": "Allow",
            "Principal": {"Service": "billingreports.amazonaws.com"},
            "Action": "s3:PutObject",
            "Resource": "arn:aws:s3:::S3BUCKET/*"
        }
    ]
}"#;

/// Cost and usage report definition, as carried in a `cost_report` step payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CostReport {
    pub report_name: String,
    pub time_unit: String,
    pub format: String,
    pub compression: String,
    #[serde(default)]
    pub additional_schema_elements: Vec<String>,
    pub s3_bucket: String,
    #[serde(default)]
    pub s3_prefix: String,
    pub s3_region: String,
    #[serde(default)]
    pub additional_artifacts: Vec<String>,
}

#[async_trait]
pub trait AmazonApi: Send + Sync {
    async fn create_bucket(&self, name: &str) -> Result<()>;

    async fn put_bucket_policy(&self, bucket: &str, policy: &str) -> Result<()>;

    /// Delete every object in the bucket, then the bucket itself
    async fn delete_bucket(&self, name: &str) -> Result<()>;

    /// Returns the policy ARN
    async fn create_policy(&self, name: &str, document: &str) -> Result<String>;

    async fn delete_policy(&self, arn: &str) -> Result<()>;

    /// Returns the role ARN
    async fn create_role(&self, name: &str, assume_role_document: &str) -> Result<String>;

    async fn delete_role(&self, name: &str) -> Result<()>;

    async fn attach_role_policy(&self, role: &str, policy_arn: &str) -> Result<()>;

    async fn detach_role_policy(&self, role: &str, policy_arn: &str) -> Result<()>;

    async fn put_report_definition(&self, report: &CostReport) -> Result<()>;

    async fn delete_report_definition(&self, name: &str) -> Result<()>;
}
