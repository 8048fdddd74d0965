//! Amazon Provider
//!
//! Step-sequenced orchestrator: runs the request's steps in caller order
//! against the Amazon primitives, and tears them down in a fixed,
//! dependency-safe order.

mod api;
#[cfg(feature = "aws")]
mod sdk;
mod substitution;

pub use api::{AmazonApi, CostReport, COST_S3_POLICY};
#[cfg(feature = "aws")]
pub use sdk::{AmazonProviderFactory, SdkAmazonApi};
pub use substitution::substitute;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{short_name, SuperkeyProvider};
use crate::error::SuperkeyError;
use crate::superkey::{outputs, ForgedApplication, Step, StepKind, StepOutputs, StepsCompleted};

pub const PROVIDER_NAME: &str = "amazon";

/// Bucket step payload asking for the cost-report bucket policy
const CREATE_COST_POLICY: &str = "\"create_cost_policy\"";

pub struct AmazonProvider {
    api: Arc<dyn AmazonApi>,
}

impl AmazonProvider {
    pub fn new(api: Arc<dyn AmazonApi>) -> Self {
        Self { api }
    }

    async fn run_step(&self, app: &mut ForgedApplication, step: &Step) -> Result<(), SuperkeyError> {
        let kind = StepKind::parse(&step.name)
            .ok_or_else(|| SuperkeyError::UnimplementedStep(step.name.clone()))?;
        let prefix = short_name(&app.request.application_type);
        let fail = |cause: anyhow::Error| SuperkeyError::step(kind.as_str(), cause);

        match kind {
            StepKind::Bucket => {
                let name = format!("{}-bucket-{}", prefix, app.guid);
                debug!(bucket = %name, "Creating S3 bucket");
                self.api
                    .create_bucket(&name)
                    .await
                    .with_context(|| format!("failed to create S3 bucket \"{}\"", name))
                    .map_err(fail)?;
                app.mark_completed(kind.as_str(), outputs([("output", name.as_str())]));
                info!(bucket = %name, "S3 bucket created");

                // Cost reporting needs a bucket policy so the billing service can write to it
                if step.payload == CREATE_COST_POLICY {
                    let policy =
                        substitute(COST_S3_POLICY, &step.substitutions, &app.request, &app.steps_completed);
                    self.api
                        .put_bucket_policy(&name, &policy)
                        .await
                        .with_context(|| {
                            format!("failed to attach bucket policy to S3 bucket \"{}\"", name)
                        })
                        .map_err(fail)?;
                    info!(bucket = %name, "S3 bucket policy attached");
                }
            }
            StepKind::CostReport => {
                let payload =
                    substitute(&step.payload, &step.substitutions, &app.request, &app.steps_completed);
                let mut report: CostReport = serde_json::from_str(&payload)
                    .with_context(|| format!("failed to build cost report with payload \"{}\"", payload))
                    .map_err(fail)?;
                report.report_name = format!("{}-{}", report.report_name, app.guid);

                debug!(report = %report.report_name, "Creating cost and usage report");
                self.api
                    .put_report_definition(&report)
                    .await
                    .with_context(|| {
                        format!("failed to create cost and usage report \"{}\"", report.report_name)
                    })
                    .map_err(fail)?;
                app.mark_completed(kind.as_str(), outputs([("output", report.report_name.as_str())]));
                info!(report = %report.report_name, "Cost and usage report created");
            }
            StepKind::Policy => {
                let name = format!("{}-policy-{}", prefix, app.guid);
                let payload =
                    substitute(&step.payload, &step.substitutions, &app.request, &app.steps_completed);

                debug!(policy = %name, "Creating policy");
                let arn = self
                    .api
                    .create_policy(&name, &payload)
                    .await
                    .with_context(|| format!("failed to create policy \"{}\"", name))
                    .map_err(fail)?;
                app.mark_completed(kind.as_str(), outputs([("output", arn.as_str())]));
                info!(policy = %name, arn = %arn, "Policy created");
            }
            StepKind::Role => {
                let name = format!("{}-role-{}", prefix, app.guid);
                let payload =
                    substitute(&step.payload, &step.substitutions, &app.request, &app.steps_completed);

                debug!(role = %name, "Creating role");
                let arn = self
                    .api
                    .create_role(&name, &payload)
                    .await
                    .with_context(|| format!("failed to create role \"{}\"", name))
                    .map_err(fail)?;
                // The role ARN becomes the authentication username
                app.mark_completed(
                    kind.as_str(),
                    outputs([("output", name.as_str()), ("arn", arn.as_str())]),
                );
                info!(role = %name, arn = %arn, "Role created");
            }
            StepKind::BindRole => {
                let completed = &app.steps_completed;
                let (role, policy_arn) = match (
                    completed.output(StepKind::Role.as_str(), "output"),
                    completed.output(StepKind::Policy.as_str(), "output"),
                ) {
                    (Some(role), Some(policy_arn)) => (role.to_string(), policy_arn.to_string()),
                    _ => {
                        return Err(fail(anyhow!(
                            "binding requires completed \"role\" and \"policy\" steps"
                        )))
                    }
                };

                debug!(role = %role, policy = %policy_arn, "Binding policy to role");
                self.api
                    .attach_role_policy(&role, &policy_arn)
                    .await
                    .with_context(|| {
                        format!("failed to bind policy \"{}\" to role \"{}\"", policy_arn, role)
                    })
                    .map_err(fail)?;
                app.mark_completed(kind.as_str(), StepOutputs::new());
                info!(role = %role, policy = %policy_arn, "Policy bound to role");
            }
        }

        Ok(())
    }

    async fn compensate(&self, kind: StepKind, completed: &StepsCompleted) -> Result<(), SuperkeyError> {
        match kind {
            StepKind::BindRole => {
                let policy_arn = recorded(completed, StepKind::Policy, "output")?;
                let role = recorded(completed, StepKind::Role, "output")?;
                self.api
                    .detach_role_policy(role, policy_arn)
                    .await
                    .map_err(|e| {
                        SuperkeyError::compensation(kind.as_str(), format!("{} from {}", policy_arn, role), e)
                    })?;
                info!(role = %role, policy = %policy_arn, "Policy unbound from role");
            }
            StepKind::Policy => {
                let arn = recorded(completed, kind, "output")?;
                self.api
                    .delete_policy(arn)
                    .await
                    .map_err(|e| SuperkeyError::compensation(kind.as_str(), arn, e))?;
                info!(policy = %arn, "Policy destroyed");
            }
            StepKind::Role => {
                let name = recorded(completed, kind, "output")?;
                self.api
                    .delete_role(name)
                    .await
                    .map_err(|e| SuperkeyError::compensation(kind.as_str(), name, e))?;
                info!(role = %name, "Role destroyed");
            }
            StepKind::CostReport => {
                let name = recorded(completed, kind, "output")?;
                self.api
                    .delete_report_definition(name)
                    .await
                    .map_err(|e| SuperkeyError::compensation(kind.as_str(), name, e))?;
                info!(report = %name, "Cost and usage report destroyed");
            }
            StepKind::Bucket => {
                let name = recorded(completed, kind, "output")?;
                self.api
                    .delete_bucket(name)
                    .await
                    .map_err(|e| SuperkeyError::compensation(kind.as_str(), name, e))?;
                info!(bucket = %name, "S3 bucket destroyed");
            }
        }

        Ok(())
    }
}

/// Output recorded by a completed step, needed to undo it
fn recorded<'a>(
    completed: &'a StepsCompleted,
    step: StepKind,
    key: &str,
) -> Result<&'a str, SuperkeyError> {
    completed.output(step.as_str(), key).ok_or_else(|| {
        SuperkeyError::compensation(
            step.as_str(),
            "",
            anyhow!("no \"{}\" recorded for step \"{}\"", key, step),
        )
    })
}

#[async_trait]
impl SuperkeyProvider for AmazonProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn forge(&self, app: &mut ForgedApplication) -> Result<(), SuperkeyError> {
        let steps = app.request.steps.clone();
        info!(guid = %app.guid, steps = steps.len(), "Forging Amazon application");

        for step in &steps {
            if let Err(error) = self.run_step(app, step).await {
                warn!(step = %step.name, error = %error, "Superkey step failed");
                return Err(error);
            }
        }

        let username = app
            .steps_completed
            .output(StepKind::Role.as_str(), "arn")
            .unwrap_or_default()
            .to_string();
        app.create_payload(&username);

        Ok(())
    }

    async fn tear_down(&self, app: &ForgedApplication) -> Vec<SuperkeyError> {
        let mut errors = Vec::new();

        for kind in StepKind::TEARDOWN_ORDER {
            if !app.steps_completed.contains(kind.as_str()) {
                continue;
            }
            if let Err(error) = self.compensate(kind, &app.steps_completed).await {
                warn!(step = %kind, error = %error, "Compensation failed");
                errors.push(error);
            }
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::superkey::CreateRequest;
    use crate::testing::{AwsCall, FakeAmazon};

    fn request(steps: Vec<Step>) -> CreateRequest {
        CreateRequest {
            tenant_id: "1234".to_string(),
            source_id: "10".to_string(),
            application_id: "20".to_string(),
            application_type: "/insights/platform/cost-management".to_string(),
            superkey: "30".to_string(),
            provider: "amazon".to_string(),
            extra: [
                ("account".to_string(), "000011112222".to_string()),
                ("result_type".to_string(), "arn".to_string()),
            ]
            .into(),
            steps,
            ..Default::default()
        }
    }

    fn cost_management_steps() -> Vec<Step> {
        vec![
            Step::new(1, "s3", CREATE_COST_POLICY).substitute("S3BUCKET", "s3"),
            Step::new(
                2,
                "cost_report",
                r#"{"ReportName": "koku", "TimeUnit": "HOURLY", "Format": "textORcsv",
                    "Compression": "GZIP", "S3Bucket": "S3BUCKET", "S3Region": "us-east-1"}"#,
            )
            .substitute("S3BUCKET", "s3"),
            Step::new(3, "policy", r#"{"Resource": "arn:aws:s3:::S3BUCKET"}"#)
                .substitute("S3BUCKET", "s3"),
            Step::new(4, "role", r#"{"Principal": "ACCOUNT"}"#).substitute("ACCOUNT", "get_account"),
            Step::new(5, "bind_role", ""),
        ]
    }

    #[tokio::test]
    async fn test_forge_runs_every_step_and_builds_product() {
        let fake = Arc::new(FakeAmazon::default());
        let provider = AmazonProvider::new(fake.clone());

        let app = provider
            .forge_application(&request(cost_management_steps()))
            .await
            .unwrap();

        let guid = app.guid.clone();
        let bucket = format!("redhat-cost-management-bucket-{}", guid);
        let completed = &app.steps_completed;
        assert_eq!(completed.len(), 5);
        assert_eq!(completed.output("s3", "output"), Some(bucket.as_str()));
        assert_eq!(
            completed.output("cost_report", "output"),
            Some(format!("koku-{}", guid).as_str())
        );
        assert_eq!(
            completed.output("role", "output"),
            Some(format!("redhat-cost-management-role-{}", guid).as_str())
        );
        assert!(completed.get("bind_role").unwrap().is_empty());

        let product = app.product.as_ref().unwrap();
        assert_eq!(product.authentication.username, fake.role_arn(&format!("redhat-cost-management-role-{}", guid)));
        assert_eq!(product.extra["bucket"], bucket);

        // substitutions flowed into the payloads
        let policies = fake.bucket_policies();
        assert!(policies[0].1.contains(&format!("arn:aws:s3:::{}", bucket)));
        assert_eq!(fake.reports()[0].s3_bucket, bucket);
        assert!(fake.role_documents()[0].contains("000011112222"));
    }

    #[tokio::test]
    async fn test_role_failure_stops_forge_and_teardown_skips_it() {
        let fake = Arc::new(FakeAmazon::default());
        fake.fail_on("create_role");
        let provider = AmazonProvider::new(fake.clone());

        let steps = vec![
            Step::new(1, "s3", ""),
            Step::new(2, "policy", "{}"),
            Step::new(3, "role", "{}"),
            Step::new(4, "bind_role", ""),
        ];
        let failure = provider.forge_application(&request(steps)).await.unwrap_err();

        assert!(matches!(failure.error, SuperkeyError::StepExecution { ref step, .. } if step == "role"));
        let app = failure.partial.unwrap();
        let names: Vec<&str> = app.steps_completed.step_names().collect();
        assert_eq!(names, vec!["policy", "s3"]);
        assert!(app.product.is_none());
        assert!(!fake.calls().contains(&AwsCall::AttachRolePolicy));

        fake.clear_calls();
        let errors = provider.tear_down(&app).await;
        assert!(errors.is_empty());
        assert_eq!(fake.calls(), vec![AwsCall::DeletePolicy, AwsCall::DeleteBucket]);
    }

    #[tokio::test]
    async fn test_teardown_order_is_fixed() {
        let fake = Arc::new(FakeAmazon::default());
        let provider = AmazonProvider::new(fake.clone());

        // bucket last in creation order, but role before policy
        let steps = vec![
            Step::new(1, "role", "{}"),
            Step::new(2, "policy", "{}"),
            Step::new(3, "bind_role", ""),
            Step::new(4, "cost_report", r#"{"ReportName": "r", "TimeUnit": "DAILY", "Format": "Parquet", "Compression": "Parquet", "S3Bucket": "b", "S3Region": "us-east-1"}"#),
            Step::new(5, "s3", ""),
        ];
        let app = provider.forge_application(&request(steps)).await.unwrap();

        fake.clear_calls();
        assert!(provider.tear_down(&app).await.is_empty());
        assert_eq!(
            fake.calls(),
            vec![
                AwsCall::DetachRolePolicy,
                AwsCall::DeletePolicy,
                AwsCall::DeleteRole,
                AwsCall::DeleteReportDefinition,
                AwsCall::DeleteBucket,
            ]
        );
        assert!(fake.is_empty());
    }

    #[tokio::test]
    async fn test_teardown_attempts_everything_and_collects_errors() {
        let fake = Arc::new(FakeAmazon::default());
        let provider = AmazonProvider::new(fake.clone());
        let steps = vec![
            Step::new(1, "s3", ""),
            Step::new(2, "policy", "{}"),
            Step::new(3, "role", "{}"),
        ];
        let app = provider.forge_application(&request(steps)).await.unwrap();

        fake.fail_on("delete_policy");
        fake.fail_on("delete_role");
        fake.clear_calls();
        let errors = provider.tear_down(&app).await;

        assert_eq!(errors.len(), 2);
        assert!(matches!(errors[0], SuperkeyError::Compensation { ref step, .. } if step == "policy"));
        assert!(matches!(errors[1], SuperkeyError::Compensation { ref step, .. } if step == "role"));
        assert_eq!(
            fake.calls(),
            vec![AwsCall::DeletePolicy, AwsCall::DeleteRole, AwsCall::DeleteBucket]
        );
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let fake = Arc::new(FakeAmazon::default());
        let provider = AmazonProvider::new(fake.clone());
        let app = provider
            .forge_application(&request(cost_management_steps()))
            .await
            .unwrap();

        assert!(provider.tear_down(&app).await.is_empty());
        assert!(fake.is_empty());
        assert!(provider.tear_down(&app).await.is_empty());
        assert!(fake.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_step_fails_fast() {
        let fake = Arc::new(FakeAmazon::default());
        let provider = AmazonProvider::new(fake.clone());
        let steps = vec![
            Step::new(1, "s3", ""),
            Step::new(2, "lambda", ""),
            Step::new(3, "policy", "{}"),
        ];

        let failure = provider.forge_application(&request(steps)).await.unwrap_err();
        assert!(matches!(failure.error, SuperkeyError::UnimplementedStep(ref name) if name == "lambda"));
        let app = failure.partial.unwrap();
        assert_eq!(app.steps_completed.len(), 1);
        assert!(!fake.calls().contains(&AwsCall::CreatePolicy));
    }

    #[tokio::test]
    async fn test_bind_without_role_fails_step() {
        let fake = Arc::new(FakeAmazon::default());
        let provider = AmazonProvider::new(fake.clone());
        let steps = vec![Step::new(1, "policy", "{}"), Step::new(2, "bind_role", "")];

        let failure = provider.forge_application(&request(steps)).await.unwrap_err();
        assert!(matches!(failure.error, SuperkeyError::StepExecution { ref step, .. } if step == "bind_role"));
        assert!(!fake.calls().contains(&AwsCall::AttachRolePolicy));
    }

    #[tokio::test]
    async fn test_invalid_cost_report_payload() {
        let fake = Arc::new(FakeAmazon::default());
        let provider = AmazonProvider::new(fake.clone());
        let steps = vec![Step::new(1, "cost_report", "not json")];

        let failure = provider.forge_application(&request(steps)).await.unwrap_err();
        assert!(failure.error.to_string().contains("failed to build cost report"));
        assert!(failure.partial.unwrap().steps_completed.is_empty());
    }
}
