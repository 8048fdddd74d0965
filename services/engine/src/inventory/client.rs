//! Sources inventory HTTP client
//!
//! Every call goes through one retry-protected transport: the body is
//! serialized once and re-sent on each attempt, the response body is always
//! drained, and a 4xx other than 408/429 stops the loop immediately.

use async_trait::async_trait;
use base64::Engine;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use super::types::{
    ApplicationAuthenticationCreateRequest, AuthContext, AuthenticationCreateRequest,
    AuthenticationResponse, InternalAuthentication, PatchApplicationRequest, PatchSourceRequest,
};
use super::InventoryApi;
use crate::config::InventoryConfig;
use crate::error::ReportingError;

const API_PATH: &str = "/api/sources/v3.1";
const INTERNAL_API_PATH: &str = "/internal/v2.0";

const IDENTITY_HEADER: &str = "x-rh-identity";
const PSK_HEADER: &str = "x-rh-sources-psk";
const ORG_ID_HEADER: &str = "x-rh-org-id";
const ACCOUNT_NUMBER_HEADER: &str = "x-rh-sources-account-number";

/// reqwest-backed inventory client
#[derive(Debug, Clone)]
pub struct InventoryClient {
    http_client: Client,
    config: InventoryConfig,
}

impl InventoryClient {
    pub fn new(config: InventoryConfig) -> Result<Self, ReportingError> {
        let http_client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ReportingError::new("build http client", None, e.to_string()))?;

        Ok(Self {
            http_client,
            config,
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}{}", self.config.base_url, API_PATH, path)
    }

    /// Attach exactly one authentication scheme: PSK (plus org/account) or identity.
    fn authenticate(&self, builder: RequestBuilder, auth: &AuthContext) -> RequestBuilder {
        match &self.config.psk {
            Some(psk) => {
                let mut builder = builder.header(PSK_HEADER, psk);
                if !auth.org_id.is_empty() {
                    builder = builder.header(ORG_ID_HEADER, &auth.org_id);
                }
                if !auth.account_number.is_empty() {
                    builder = builder.header(ACCOUNT_NUMBER_HEADER, &auth.account_number);
                }
                builder
            }
            None if !auth.identity_header.is_empty() => {
                builder.header(IDENTITY_HEADER, &auth.identity_header)
            }
            None => builder.header(
                IDENTITY_HEADER,
                synthesize_identity(&auth.account_number, &auth.org_id),
            ),
        }
    }

    /// Send with retries. Returns the body of the first 2xx response.
    async fn send(
        &self,
        operation: &str,
        method: Method,
        url: &str,
        auth: &AuthContext,
        body: Option<Vec<u8>>,
    ) -> Result<Vec<u8>, ReportingError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            let mut request = self
                .http_client
                .request(method.clone(), url)
                .timeout(self.config.request_timeout);
            request = self.authenticate(request, auth);
            if let Some(bytes) = &body {
                request = request
                    .header(CONTENT_TYPE, "application/json")
                    .body(bytes.clone());
            }

            let error = match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    match response.bytes().await {
                        Ok(bytes) if status.is_success() => {
                            debug!(operation, attempt, status = status.as_u16(), "Inventory call succeeded");
                            return Ok(bytes.to_vec());
                        }
                        Ok(bytes) => {
                            let error = ReportingError::new(
                                operation,
                                Some(status.as_u16()),
                                String::from_utf8_lossy(&bytes),
                            );
                            if !is_retryable(status) {
                                warn!(operation, status = status.as_u16(), "Inventory call rejected, not retrying");
                                return Err(error);
                            }
                            error
                        }
                        Err(e) => ReportingError::new(
                            operation,
                            Some(status.as_u16()),
                            format!("failed to read response body: {}", e),
                        ),
                    }
                }
                Err(e) => ReportingError::new(operation, None, e.to_string()),
            };

            warn!(
                operation,
                attempt,
                max_attempts,
                error = %error,
                "Inventory call failed"
            );
            last_error = Some(error);

            if attempt < max_attempts {
                tokio::time::sleep(self.config.retry_delay).await;
            }
        }

        Err(last_error.unwrap_or_else(|| ReportingError::new(operation, None, "no attempt made")))
    }

    async fn send_json<B: Serialize + ?Sized>(
        &self,
        operation: &str,
        method: Method,
        url: &str,
        auth: &AuthContext,
        body: &B,
    ) -> Result<Vec<u8>, ReportingError> {
        let bytes = serde_json::to_vec(body).map_err(|e| {
            ReportingError::new(operation, None, format!("failed to encode request: {}", e))
        })?;
        self.send(operation, method, url, auth, Some(bytes)).await
    }
}

#[async_trait]
impl InventoryApi for InventoryClient {
    async fn get_internal_authentication(
        &self,
        auth: &AuthContext,
        authentication_id: &str,
    ) -> Result<InternalAuthentication, ReportingError> {
        let operation = "get internal authentication";
        let url = format!(
            "{}{}/authentications/{}?expose_encrypted_attribute[]=password",
            self.config.base_url,
            INTERNAL_API_PATH,
            urlencoding::encode(authentication_id)
        );

        let body = self.send(operation, Method::GET, &url, auth, None).await?;
        decode(operation, &body)
    }

    async fn patch_application(
        &self,
        auth: &AuthContext,
        application_id: &str,
        patch: &PatchApplicationRequest,
    ) -> Result<(), ReportingError> {
        let url = self.api_url(&format!("/applications/{}", urlencoding::encode(application_id)));
        self.send_json("patch application", Method::PATCH, &url, auth, patch)
            .await
            .map(|_| ())
    }

    async fn patch_source(
        &self,
        auth: &AuthContext,
        source_id: &str,
        patch: &PatchSourceRequest,
    ) -> Result<(), ReportingError> {
        let url = self.api_url(&format!("/sources/{}", urlencoding::encode(source_id)));
        self.send_json("patch source", Method::PATCH, &url, auth, patch)
            .await
            .map(|_| ())
    }

    async fn create_authentication(
        &self,
        auth: &AuthContext,
        authentication: &AuthenticationCreateRequest,
    ) -> Result<AuthenticationResponse, ReportingError> {
        let operation = "create authentication";
        let url = self.api_url("/authentications");
        let body = self
            .send_json(operation, Method::POST, &url, auth, authentication)
            .await?;
        decode(operation, &body)
    }

    async fn create_application_authentication(
        &self,
        auth: &AuthContext,
        link: &ApplicationAuthenticationCreateRequest,
    ) -> Result<(), ReportingError> {
        let url = self.api_url("/application_authentications");
        self.send_json("create application authentication", Method::POST, &url, auth, link)
            .await
            .map(|_| ())
    }

    async fn trigger_availability_check(
        &self,
        auth: &AuthContext,
        source_id: &str,
    ) -> Result<(), ReportingError> {
        let url = self.api_url(&format!(
            "/sources/{}/check_availability",
            urlencoding::encode(source_id)
        ));
        self.send("check availability", Method::POST, &url, auth, None)
            .await
            .map(|_| ())
    }
}

/// 4xx responses are caller errors, except 408 and 429.
fn is_retryable(status: StatusCode) -> bool {
    !status.is_client_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

fn decode<T: DeserializeOwned>(operation: &str, body: &[u8]) -> Result<T, ReportingError> {
    serde_json::from_slice(body).map_err(|e| {
        ReportingError::new(operation, None, format!("failed to decode response: {}", e))
    })
}

/// Base64 identity document used when no identity header was forwarded.
pub fn synthesize_identity(account_number: &str, org_id: &str) -> String {
    let identity = serde_json::json!({
        "identity": {
            "account_number": account_number,
            "org_id": org_id,
            "internal": {"org_id": org_id},
            "user": {"is_org_admin": true},
        }
    });
    base64::engine::general_purpose::STANDARD.encode(identity.to_string())
}
