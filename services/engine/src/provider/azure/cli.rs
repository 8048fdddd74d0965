//! `az` CLI sessions
//!
//! Each session runs the CLI with a private scratch HOME so cached tokens
//! never outlive the session. The directory is removed when the session is
//! dropped.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::AzureConfig;

static SUBSCRIPTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/subscriptions/(.*)/providers/").unwrap());

/// First `{` through last `}`, across lines
static EMBEDDED_ERROR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)\{.*\}").unwrap());

/// One authenticated `az` session
#[async_trait]
pub trait AzureCli: Send + Sync {
    async fn login(&self, username: &str, password: &str, tenant: &str) -> Result<()>;

    /// Submit a subscription-level deployment and wait for it to finish.
    /// Returns the subscription id the deployment landed in.
    async fn deploy_subscription_template(&self, name: &str, template: &Path) -> Result<String>;

    async fn delete_deployment(&self, name: &str) -> Result<()>;

    async fn logout(&self) -> Result<()>;
}

/// Opens fresh `az` sessions
pub trait AzureCliLauncher: Send + Sync {
    fn open(&self) -> Result<Box<dyn AzureCli>>;
}

/// Launches sessions of the real `az` binary
#[derive(Debug, Clone)]
pub struct AzCliLauncher {
    config: AzureConfig,
}

impl AzCliLauncher {
    pub fn new(config: AzureConfig) -> Self {
        Self { config }
    }
}

impl AzureCliLauncher for AzCliLauncher {
    fn open(&self) -> Result<Box<dyn AzureCli>> {
        Ok(Box::new(AzCli::new(&self.config)?))
    }
}

pub struct AzCli {
    home: TempDir,
    location: String,
    command_timeout: Duration,
    poll_attempts: u32,
    poll_interval: Duration,
}

impl AzCli {
    pub fn new(config: &AzureConfig) -> Result<Self> {
        let home = tempfile::Builder::new()
            .prefix("az")
            .tempdir()
            .context("failed to create temporary home directory for az cli")?;
        debug!(home = ?home.path(), "Created az scratch home");

        Ok(Self {
            home,
            location: config.location.clone(),
            command_timeout: config.command_timeout,
            poll_attempts: config.poll_attempts.max(1),
            poll_interval: config.poll_interval,
        })
    }

    /// Run `az` with only HOME and PATH in its environment. `label` names
    /// the command in logs and errors, so arguments (secrets) never leak.
    async fn run(&self, label: &str, args: &[String]) -> Result<Vec<u8>> {
        info!("running [az {}]", label);

        let mut command = Command::new("az");
        command
            .args(args)
            .env_clear()
            .env("HOME", self.home.path())
            .env("PATH", std::env::var_os("PATH").unwrap_or_default())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.command_timeout, command.output())
            .await
            .map_err(|_| anyhow!("[az {}] timed out after {:?}", label, self.command_timeout))?
            .with_context(|| format!("failed to run [az {}]", label))?;

        if !output.status.success() {
            bail!(
                "[az {}] exited with {}: {}",
                label,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(output.stdout)
    }
}

#[async_trait]
impl AzureCli for AzCli {
    async fn login(&self, username: &str, password: &str, tenant: &str) -> Result<()> {
        let args = [
            "login".to_string(),
            "--service-principal".to_string(),
            format!("--username={}", username),
            format!("--password={}", password),
            format!("--tenant={}", tenant),
        ];
        self.run("login", &args)
            .await
            .context("failed to login with az credentials")?;
        Ok(())
    }

    async fn deploy_subscription_template(&self, name: &str, template: &Path) -> Result<String> {
        let create = [
            "deployment".to_string(),
            "sub".to_string(),
            "create".to_string(),
            "--no-wait".to_string(),
            format!("--location={}", self.location),
            format!("--name={}", name),
            format!("--template-file={}", template.display()),
        ];
        // The failure detail is read back from `show`
        if let Err(e) = self.run("deployment sub create", &create).await {
            warn!(deployment = %name, error = %e, "Deployment submission reported an error");
        }

        let show = [
            "deployment".to_string(),
            "sub".to_string(),
            "show".to_string(),
            format!("--name={}", name),
        ];
        for attempt in 1..=self.poll_attempts {
            let output = self
                .run("deployment sub show", &show)
                .await
                .context("failed to read deployment status")?;

            match deployment_state(&output)? {
                DeploymentState::Succeeded(subscription_id) => return Ok(subscription_id),
                DeploymentState::Failed(message) => bail!("error during deployment: {}", message),
                DeploymentState::Running(state) => {
                    debug!(deployment = %name, attempt, state = %state, "Deployment still running");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }

        bail!(
            "deployment \"{}\" did not finish after {} status checks",
            name,
            self.poll_attempts
        )
    }

    async fn delete_deployment(&self, name: &str) -> Result<()> {
        let args = [
            "deployment".to_string(),
            "sub".to_string(),
            "delete".to_string(),
            format!("--name={}", name),
        ];
        self.run("deployment sub delete", &args).await?;
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        self.run("logout", &["logout".to_string()])
            .await
            .context("failed to logout az cli")?;
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
struct Deployment {
    #[serde(default)]
    id: String,
    #[serde(default)]
    properties: DeploymentProperties,
}

#[derive(Debug, Default, Deserialize)]
struct DeploymentProperties {
    #[serde(rename = "provisioningState", default)]
    provisioning_state: String,
    #[serde(default)]
    error: Option<DeploymentError>,
}

#[derive(Debug, Default, Deserialize)]
struct DeploymentError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    details: Vec<DeploymentErrorDetail>,
}

#[derive(Debug, Default, Deserialize)]
struct DeploymentErrorDetail {
    #[serde(default)]
    message: String,
}

#[derive(Debug, PartialEq, Eq)]
enum DeploymentState {
    Running(String),
    Succeeded(String),
    Failed(String),
}

/// Interpret `az deployment sub show` output
fn deployment_state(output: &[u8]) -> Result<DeploymentState> {
    let deployment: Deployment =
        serde_json::from_slice(output).context("failed to parse deployment status")?;
    let properties = deployment.properties;

    if let Some(error) = properties.error.filter(|e| !e.code.is_empty()) {
        let message = error
            .details
            .first()
            .and_then(|detail| embedded_error_message(&detail.message))
            .unwrap_or(error.code);
        return Ok(DeploymentState::Failed(message));
    }

    let state = properties.provisioning_state;
    match state.as_str() {
        "Succeeded" => subscription_id(&deployment.id)
            .map(DeploymentState::Succeeded)
            .ok_or_else(|| anyhow!("failed to parse uuid from subscription ID: {}", deployment.id)),
        "Failed" | "Canceled" => Ok(DeploymentState::Failed(state.clone())),
        _ => Ok(DeploymentState::Running(state.clone())),
    }
}

/// Subscription id from an ARM resource id
fn subscription_id(resource_id: &str) -> Option<String> {
    SUBSCRIPTION_RE
        .captures(resource_id)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|id| !id.is_empty())
}

/// The `odata.error` message embedded as JSON inside an error detail
fn embedded_error_message(message: &str) -> Option<String> {
    let document: Value = serde_json::from_str(EMBEDDED_ERROR_RE.find(message)?.as_str()).ok()?;
    document
        .get("odata.error")?
        .get("message")?
        .get("value")?
        .as_str()
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
