//! AWS SDK backed primitives
//!
//! Clients are built from the tenant's static access key pair and live only
//! as long as the provider built for that request.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_costandusagereport::types::{
    AdditionalArtifact, AwsRegion, CompressionFormat, ReportDefinition, ReportFormat, SchemaElement,
    TimeUnit,
};
use aws_sdk_iam::error::ProvideErrorMetadata;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use std::sync::Arc;
use tracing::debug;

use super::api::{AmazonApi, CostReport};
use super::AmazonProvider;
use crate::error::SuperkeyError;
use crate::inventory::InternalAuthentication;
use crate::provider::{ProviderFactory, SuperkeyProvider};

const CREDENTIALS_SOURCE: &str = "SourcesSuperkeyWorker";

/// Error codes meaning the resource is already gone
const NOT_FOUND_CODES: &[&str] = &["NoSuchBucket", "NoSuchEntity", "NoSuchKey"];

pub struct SdkAmazonApi {
    s3: aws_sdk_s3::Client,
    iam: aws_sdk_iam::Client,
    cost: aws_sdk_costandusagereport::Client,
    region: String,
}

impl SdkAmazonApi {
    pub async fn connect(access_key: &str, secret_key: &str, region: &str) -> Self {
        let credentials = Credentials::new(access_key, secret_key, None, None, CREDENTIALS_SOURCE);
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .credentials_provider(credentials)
            .load()
            .await;

        Self {
            s3: aws_sdk_s3::Client::new(&config),
            iam: aws_sdk_iam::Client::new(&config),
            cost: aws_sdk_costandusagereport::Client::new(&config),
            region: region.to_string(),
        }
    }
}

fn is_not_found<E: ProvideErrorMetadata>(err: &E) -> bool {
    err.code()
        .map(|code| NOT_FOUND_CODES.contains(&code))
        .unwrap_or(false)
}

#[async_trait]
impl AmazonApi for SdkAmazonApi {
    async fn create_bucket(&self, name: &str) -> Result<()> {
        let mut request = self.s3.create_bucket().bucket(name);
        // us-east-1 rejects an explicit location constraint
        if self.region != "us-east-1" {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }
        request.send().await.context("CreateBucket")?;
        Ok(())
    }

    async fn put_bucket_policy(&self, bucket: &str, policy: &str) -> Result<()> {
        self.s3
            .put_bucket_policy()
            .bucket(bucket)
            .policy(policy)
            .send()
            .await
            .context("PutBucketPolicy")?;
        Ok(())
    }

    async fn delete_bucket(&self, name: &str) -> Result<()> {
        let mut pages = self
            .s3
            .list_objects_v2()
            .bucket(name)
            .into_paginator()
            .send();

        while let Some(page) = pages.next().await {
            let page = match page {
                Ok(page) => page,
                Err(e) if is_not_found(&e) => return Ok(()),
                Err(e) => return Err(e).context("ListObjectsV2"),
            };
            for object in page.contents() {
                let Some(key) = object.key() else { continue };
                debug!(bucket = %name, key = %key, "Deleting object");
                self.s3
                    .delete_object()
                    .bucket(name)
                    .key(key)
                    .send()
                    .await
                    .context("DeleteObject")?;
            }
        }

        match self.s3.delete_bucket().bucket(name).send().await {
            Err(e) if !is_not_found(&e) => Err(e).context("DeleteBucket"),
            _ => Ok(()),
        }
    }

    async fn create_policy(&self, name: &str, document: &str) -> Result<String> {
        let output = self
            .iam
            .create_policy()
            .policy_name(name)
            .policy_document(document)
            .send()
            .await
            .context("CreatePolicy")?;

        output
            .policy()
            .and_then(|policy| policy.arn())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("CreatePolicy returned no policy ARN"))
    }

    async fn delete_policy(&self, arn: &str) -> Result<()> {
        match self.iam.delete_policy().policy_arn(arn).send().await {
            Err(e) if !is_not_found(&e) => Err(e).context("DeletePolicy"),
            _ => Ok(()),
        }
    }

    async fn create_role(&self, name: &str, assume_role_document: &str) -> Result<String> {
        let output = self
            .iam
            .create_role()
            .role_name(name)
            .assume_role_policy_document(assume_role_document)
            .send()
            .await
            .context("CreateRole")?;

        output
            .role()
            .map(|role| role.arn().to_string())
            .ok_or_else(|| anyhow!("CreateRole returned no role"))
    }

    async fn delete_role(&self, name: &str) -> Result<()> {
        match self.iam.delete_role().role_name(name).send().await {
            Err(e) if !is_not_found(&e) => Err(e).context("DeleteRole"),
            _ => Ok(()),
        }
    }

    async fn attach_role_policy(&self, role: &str, policy_arn: &str) -> Result<()> {
        self.iam
            .attach_role_policy()
            .role_name(role)
            .policy_arn(policy_arn)
            .send()
            .await
            .context("AttachRolePolicy")?;
        Ok(())
    }

    async fn detach_role_policy(&self, role: &str, policy_arn: &str) -> Result<()> {
        match self
            .iam
            .detach_role_policy()
            .role_name(role)
            .policy_arn(policy_arn)
            .send()
            .await
        {
            Err(e) if !is_not_found(&e) => Err(e).context("DetachRolePolicy"),
            _ => Ok(()),
        }
    }

    async fn put_report_definition(&self, report: &CostReport) -> Result<()> {
        let definition = ReportDefinition::builder()
            .report_name(&report.report_name)
            .time_unit(TimeUnit::from(report.time_unit.as_str()))
            .format(ReportFormat::from(report.format.as_str()))
            .compression(CompressionFormat::from(report.compression.as_str()))
            .set_additional_schema_elements(Some(
                report
                    .additional_schema_elements
                    .iter()
                    .map(|e| SchemaElement::from(e.as_str()))
                    .collect(),
            ))
            .s3_bucket(&report.s3_bucket)
            .s3_prefix(&report.s3_prefix)
            .s3_region(AwsRegion::from(report.s3_region.as_str()))
            .set_additional_artifacts(Some(
                report
                    .additional_artifacts
                    .iter()
                    .map(|a| AdditionalArtifact::from(a.as_str()))
                    .collect(),
            ))
            .build()
            .context("invalid report definition")?;

        self.cost
            .put_report_definition()
            .report_definition(definition)
            .send()
            .await
            .context("PutReportDefinition")?;
        Ok(())
    }

    async fn delete_report_definition(&self, name: &str) -> Result<()> {
        // DeleteReportDefinition succeeds for unknown report names
        self.cost
            .delete_report_definition()
            .report_name(name)
            .send()
            .await
            .context("DeleteReportDefinition")?;
        Ok(())
    }
}

/// Builds an `AmazonProvider` from a tenant's access key pair
pub struct AmazonProviderFactory {
    region: String,
}

impl AmazonProviderFactory {
    pub fn new(region: &str) -> Self {
        Self {
            region: region.to_string(),
        }
    }
}

#[async_trait]
impl ProviderFactory for AmazonProviderFactory {
    async fn build(
        &self,
        credential: &InternalAuthentication,
    ) -> Result<Arc<dyn SuperkeyProvider>, SuperkeyError> {
        let api = SdkAmazonApi::connect(&credential.username, &credential.password, &self.region).await;
        Ok(Arc::new(AmazonProvider::new(Arc::new(api))))
    }
}
