//! Azure offer template preparation
//!
//! The lighthouse deployment template is made available once at startup,
//! either from a mounted file or from the cloud-meter sysconfig.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::error::SuperkeyError;

pub const DEFAULT_TEMPLATE_PATH: &str = "/tmp/az_payload.json";

#[derive(Debug, Clone)]
pub enum TemplateSource {
    /// Mounted template file
    Local(PathBuf),
    /// `azure_offer_template_path` advertised by the cloud-meter sysconfig
    CloudMeter {
        base_url: String,
        sysconfig_path: String,
    },
}

#[derive(Debug, Deserialize)]
struct CloudMeterSysConfig {
    #[serde(default)]
    azure_offer_template_path: String,
}

/// Put the template at `destination` and return its path.
pub async fn prepare_template(
    source: &TemplateSource,
    destination: &Path,
) -> Result<PathBuf, SuperkeyError> {
    match source {
        TemplateSource::Local(path) => {
            if tokio::fs::try_exists(destination).await.unwrap_or(false) {
                info!(path = ?destination, "Azure template already in place");
                return Ok(destination.to_path_buf());
            }
            info!(from = ?path, to = ?destination, "Copying Azure template");
            tokio::fs::copy(path, destination).await.map_err(|e| {
                SuperkeyError::Configuration(format!(
                    "failed to copy Azure template {}: {}",
                    path.display(),
                    e
                ))
            })?;
        }
        TemplateSource::CloudMeter {
            base_url,
            sysconfig_path,
        } => {
            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .map_err(|e| SuperkeyError::Configuration(e.to_string()))?;

            info!(url = %format!("{}{}", base_url, sysconfig_path), "Fetching cloud-meter sysconfig");
            let sysconfig: CloudMeterSysConfig =
                serde_json::from_str(&fetch(&client, base_url, sysconfig_path).await?).map_err(
                    |e| SuperkeyError::Configuration(format!("failed to parse cloud-meter sysconfig: {}", e)),
                )?;

            if sysconfig.azure_offer_template_path.is_empty() {
                return Err(SuperkeyError::Configuration(
                    "cloud-meter sysconfig has no azure_offer_template_path".to_string(),
                ));
            }

            info!(path = %sysconfig.azure_offer_template_path, "Fetching Azure offer template");
            let template = fetch(&client, base_url, &sysconfig.azure_offer_template_path).await?;
            tokio::fs::write(destination, template).await.map_err(|e| {
                SuperkeyError::Configuration(format!(
                    "failed to write Azure template {}: {}",
                    destination.display(),
                    e
                ))
            })?;
        }
    }

    Ok(destination.to_path_buf())
}

async fn fetch(client: &reqwest::Client, base_url: &str, path: &str) -> Result<String, SuperkeyError> {
    let url = format!("{}{}", base_url, path);
    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| SuperkeyError::Configuration(format!("failed to fetch {}: {}", url, e)))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| SuperkeyError::Configuration(format!("failed to read {}: {}", url, e)))?;
    if !status.is_success() {
        return Err(SuperkeyError::Configuration(format!(
            "fetching {} returned {}: {}",
            url, status, body
        )));
    }

    Ok(body)
}
