//! In-memory fakes for the cloud primitives, the `az` CLI and the
//! inventory service.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::ForgeConfig;
use crate::engine::SuperkeyEngine;
use crate::error::{ReportingError, SuperkeyError};
use crate::inventory::{
    ApplicationAuthenticationCreateRequest, AuthContext, AuthenticationCreateRequest,
    AuthenticationResponse, InternalAuthentication, InventoryApi, PatchApplicationRequest,
    PatchSourceRequest,
};
use crate::provider::amazon::{AmazonApi, AmazonProvider, CostReport};
use crate::provider::azure::{AzureCli, AzureCliLauncher};
use crate::provider::{ProviderFactory, ProviderRegistry, SuperkeyProvider};

const FAKE_ACCOUNT: &str = "000000000000";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AwsCall {
    CreateBucket,
    PutBucketPolicy,
    DeleteBucket,
    CreatePolicy,
    DeletePolicy,
    CreateRole,
    DeleteRole,
    AttachRolePolicy,
    DetachRolePolicy,
    PutReportDefinition,
    DeleteReportDefinition,
}

#[derive(Default)]
struct AmazonState {
    calls: Vec<AwsCall>,
    failing: HashSet<String>,
    delay: Option<Duration>,
    buckets: BTreeSet<String>,
    bucket_policies: Vec<(String, String)>,
    policies: BTreeSet<String>,
    roles: BTreeMap<String, String>,
    role_documents: Vec<String>,
    attachments: BTreeSet<(String, String)>,
    reports: Vec<CostReport>,
}

/// Amazon primitives backed by in-memory sets. Deleting something absent
/// succeeds. Every call is recorded, including the ones made to fail.
#[derive(Default)]
pub struct FakeAmazon {
    state: Mutex<AmazonState>,
}

impl FakeAmazon {
    /// Make every call of operation `op` (e.g. `create_role`) fail
    pub fn fail_on(&self, op: &str) {
        self.state.lock().unwrap().failing.insert(op.to_string());
    }

    /// Stall every call by `delay`
    pub fn delay_by(&self, delay: Duration) {
        self.state.lock().unwrap().delay = Some(delay);
    }

    pub fn calls(&self) -> Vec<AwsCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn role_arn(&self, name: &str) -> String {
        format!("arn:aws:iam::{}:role/{}", FAKE_ACCOUNT, name)
    }

    fn policy_arn(name: &str) -> String {
        format!("arn:aws:iam::{}:policy/{}", FAKE_ACCOUNT, name)
    }

    pub fn bucket_policies(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().bucket_policies.clone()
    }

    pub fn reports(&self) -> Vec<CostReport> {
        self.state.lock().unwrap().reports.clone()
    }

    pub fn role_documents(&self) -> Vec<String> {
        self.state.lock().unwrap().role_documents.clone()
    }

    /// No resource is left behind
    pub fn is_empty(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.buckets.is_empty()
            && state.policies.is_empty()
            && state.roles.is_empty()
            && state.attachments.is_empty()
            && state.reports.is_empty()
    }

    async fn enter(&self, call: AwsCall, op: &str) -> Result<()> {
        let (delay, failing) = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(call);
            (state.delay, state.failing.contains(op))
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if failing {
            bail!("{} failed: AccessDenied", op);
        }
        Ok(())
    }
}

#[async_trait]
impl AmazonApi for FakeAmazon {
    async fn create_bucket(&self, name: &str) -> Result<()> {
        self.enter(AwsCall::CreateBucket, "create_bucket").await?;
        self.state.lock().unwrap().buckets.insert(name.to_string());
        Ok(())
    }

    async fn put_bucket_policy(&self, bucket: &str, policy: &str) -> Result<()> {
        self.enter(AwsCall::PutBucketPolicy, "put_bucket_policy").await?;
        self.state
            .lock()
            .unwrap()
            .bucket_policies
            .push((bucket.to_string(), policy.to_string()));
        Ok(())
    }

    async fn delete_bucket(&self, name: &str) -> Result<()> {
        self.enter(AwsCall::DeleteBucket, "delete_bucket").await?;
        self.state.lock().unwrap().buckets.remove(name);
        Ok(())
    }

    async fn create_policy(&self, name: &str, _document: &str) -> Result<String> {
        self.enter(AwsCall::CreatePolicy, "create_policy").await?;
        let arn = Self::policy_arn(name);
        self.state.lock().unwrap().policies.insert(arn.clone());
        Ok(arn)
    }

    async fn delete_policy(&self, arn: &str) -> Result<()> {
        self.enter(AwsCall::DeletePolicy, "delete_policy").await?;
        self.state.lock().unwrap().policies.remove(arn);
        Ok(())
    }

    async fn create_role(&self, name: &str, assume_role_document: &str) -> Result<String> {
        self.enter(AwsCall::CreateRole, "create_role").await?;
        let mut state = self.state.lock().unwrap();
        state.roles.insert(name.to_string(), assume_role_document.to_string());
        state.role_documents.push(assume_role_document.to_string());
        Ok(self.role_arn(name))
    }

    async fn delete_role(&self, name: &str) -> Result<()> {
        self.enter(AwsCall::DeleteRole, "delete_role").await?;
        self.state.lock().unwrap().roles.remove(name);
        Ok(())
    }

    async fn attach_role_policy(&self, role: &str, policy_arn: &str) -> Result<()> {
        self.enter(AwsCall::AttachRolePolicy, "attach_role_policy").await?;
        self.state
            .lock()
            .unwrap()
            .attachments
            .insert((role.to_string(), policy_arn.to_string()));
        Ok(())
    }

    async fn detach_role_policy(&self, role: &str, policy_arn: &str) -> Result<()> {
        self.enter(AwsCall::DetachRolePolicy, "detach_role_policy").await?;
        self.state
            .lock()
            .unwrap()
            .attachments
            .remove(&(role.to_string(), policy_arn.to_string()));
        Ok(())
    }

    async fn put_report_definition(&self, report: &CostReport) -> Result<()> {
        self.enter(AwsCall::PutReportDefinition, "put_report_definition").await?;
        self.state.lock().unwrap().reports.push(report.clone());
        Ok(())
    }

    async fn delete_report_definition(&self, name: &str) -> Result<()> {
        self.enter(AwsCall::DeleteReportDefinition, "delete_report_definition").await?;
        self.state
            .lock()
            .unwrap()
            .reports
            .retain(|report| report.report_name != name);
        Ok(())
    }
}

/// Builds `AmazonProvider`s over one shared `FakeAmazon`
pub struct FakeAmazonFactory {
    api: Arc<FakeAmazon>,
    builds: AtomicUsize,
}

impl FakeAmazonFactory {
    pub fn new(api: Arc<FakeAmazon>) -> Self {
        Self {
            api,
            builds: AtomicUsize::new(0),
        }
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

impl Default for FakeAmazonFactory {
    fn default() -> Self {
        Self::new(Arc::new(FakeAmazon::default()))
    }
}

#[async_trait]
impl ProviderFactory for FakeAmazonFactory {
    async fn build(
        &self,
        _credential: &InternalAuthentication,
    ) -> Result<Arc<dyn SuperkeyProvider>, SuperkeyError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(AmazonProvider::new(self.api.clone())))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    FetchCredential(String),
    PatchApplication(String),
    PatchSource(String),
    CreateAuthentication(String),
    LinkAuthentication(String, String),
    CheckAvailability(String),
}

#[derive(Default)]
struct InventoryState {
    calls: Vec<Call>,
    failing: HashSet<String>,
    application_patches: Vec<PatchApplicationRequest>,
    created_authentications: Vec<AuthenticationCreateRequest>,
}

/// Inventory service that records every call and hands out one credential
pub struct FakeInventory {
    credential: InternalAuthentication,
    state: Mutex<InventoryState>,
}

impl Default for FakeInventory {
    fn default() -> Self {
        Self::with_credential("AKIAFAKE", "fake-secret")
    }
}

impl FakeInventory {
    pub fn with_credential(username: &str, password: &str) -> Self {
        Self {
            credential: InternalAuthentication {
                id: "30".to_string(),
                authtype: "access_key_secret_key".to_string(),
                username: username.to_string(),
                password: password.to_string(),
                extra: serde_json::json!({}),
            },
            state: Mutex::new(InventoryState::default()),
        }
    }

    /// Make operation `op` (e.g. "patch source") fail with a 500
    pub fn fail_on(&self, op: &str) {
        self.state.lock().unwrap().failing.insert(op.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn credential_fetches(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Call::FetchCredential(_)))
            .count()
    }

    pub fn application_patches(&self) -> Vec<PatchApplicationRequest> {
        self.state.lock().unwrap().application_patches.clone()
    }

    pub fn created_authentications(&self) -> Vec<AuthenticationCreateRequest> {
        self.state.lock().unwrap().created_authentications.clone()
    }

    fn enter(&self, call: Call, op: &str) -> Result<(), ReportingError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        if state.failing.contains(op) {
            return Err(ReportingError::new(op, Some(500), "internal server error"));
        }
        Ok(())
    }
}

#[async_trait]
impl InventoryApi for FakeInventory {
    async fn get_internal_authentication(
        &self,
        _auth: &AuthContext,
        authentication_id: &str,
    ) -> Result<InternalAuthentication, ReportingError> {
        self.enter(
            Call::FetchCredential(authentication_id.to_string()),
            "get internal authentication",
        )?;
        Ok(self.credential.clone())
    }

    async fn patch_application(
        &self,
        _auth: &AuthContext,
        application_id: &str,
        patch: &PatchApplicationRequest,
    ) -> Result<(), ReportingError> {
        self.state.lock().unwrap().application_patches.push(patch.clone());
        self.enter(Call::PatchApplication(application_id.to_string()), "patch application")
    }

    async fn patch_source(
        &self,
        _auth: &AuthContext,
        source_id: &str,
        _patch: &PatchSourceRequest,
    ) -> Result<(), ReportingError> {
        self.enter(Call::PatchSource(source_id.to_string()), "patch source")
    }

    async fn create_authentication(
        &self,
        _auth: &AuthContext,
        authentication: &AuthenticationCreateRequest,
    ) -> Result<AuthenticationResponse, ReportingError> {
        self.state
            .lock()
            .unwrap()
            .created_authentications
            .push(authentication.clone());
        self.enter(
            Call::CreateAuthentication(authentication.username.clone()),
            "create authentication",
        )?;
        Ok(AuthenticationResponse {
            id: "auth-1".to_string(),
        })
    }

    async fn create_application_authentication(
        &self,
        _auth: &AuthContext,
        link: &ApplicationAuthenticationCreateRequest,
    ) -> Result<(), ReportingError> {
        self.enter(
            Call::LinkAuthentication(link.application_id.clone(), link.authentication_id.clone()),
            "create application authentication",
        )
    }

    async fn trigger_availability_check(
        &self,
        _auth: &AuthContext,
        source_id: &str,
    ) -> Result<(), ReportingError> {
        self.enter(Call::CheckAvailability(source_id.to_string()), "check availability")
    }
}

/// Engine over the fakes, registered as "amazon", with no settle wait
pub fn engine_with(amazon: Arc<FakeAmazon>, inventory: Arc<FakeInventory>) -> SuperkeyEngine {
    let config = ForgeConfig {
        iam_settle_wait: Duration::ZERO,
        ..Default::default()
    };
    engine_with_config(amazon, inventory, config)
}

pub fn engine_with_config(
    amazon: Arc<FakeAmazon>,
    inventory: Arc<FakeInventory>,
    config: ForgeConfig,
) -> SuperkeyEngine {
    let registry =
        ProviderRegistry::new().register("amazon", Arc::new(FakeAmazonFactory::new(amazon)));
    SuperkeyEngine::new(registry, inventory, config)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AzCall {
    Login(String),
    Deploy(String),
    Delete(String),
    Logout,
}

struct AzState {
    subscription_id: String,
    deploy_error: Option<String>,
    calls: Mutex<Vec<AzCall>>,
    open_sessions: AtomicUsize,
}

/// Launcher for scripted `az` sessions sharing one call log
#[derive(Clone)]
pub struct FakeAzure {
    state: Arc<AzState>,
}

impl FakeAzure {
    fn build(subscription_id: &str, deploy_error: Option<String>) -> Self {
        Self {
            state: Arc::new(AzState {
                subscription_id: subscription_id.to_string(),
                deploy_error,
                calls: Mutex::new(Vec::new()),
                open_sessions: AtomicUsize::new(0),
            }),
        }
    }

    pub fn succeeding(subscription_id: &str) -> Self {
        Self::build(subscription_id, None)
    }

    pub fn failing_deploy(message: &str) -> Self {
        Self::build("", Some(message.to_string()))
    }

    pub fn calls(&self) -> Vec<AzCall> {
        self.state.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.state.calls.lock().unwrap().clear();
    }

    pub fn open_sessions(&self) -> usize {
        self.state.open_sessions.load(Ordering::SeqCst)
    }
}

impl AzureCliLauncher for FakeAzure {
    fn open(&self) -> Result<Box<dyn AzureCli>> {
        self.state.open_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeAzSession {
            state: self.state.clone(),
        }))
    }
}

struct FakeAzSession {
    state: Arc<AzState>,
}

impl FakeAzSession {
    fn record(&self, call: AzCall) {
        self.state.calls.lock().unwrap().push(call);
    }
}

impl Drop for FakeAzSession {
    fn drop(&mut self) {
        self.state.open_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl AzureCli for FakeAzSession {
    async fn login(&self, _username: &str, _password: &str, tenant: &str) -> Result<()> {
        self.record(AzCall::Login(tenant.to_string()));
        Ok(())
    }

    async fn deploy_subscription_template(&self, name: &str, _template: &Path) -> Result<String> {
        self.record(AzCall::Deploy(name.to_string()));
        match &self.state.deploy_error {
            Some(message) => bail!("error during deployment: {}", message),
            None => Ok(self.state.subscription_id.clone()),
        }
    }

    async fn delete_deployment(&self, name: &str) -> Result<()> {
        self.record(AzCall::Delete(name.to_string()));
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        self.record(AzCall::Logout);
        Ok(())
    }
}
