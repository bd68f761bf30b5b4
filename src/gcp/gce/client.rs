//! # GCE API Client Logic
//!
//! Thin wrapper over the Compute Engine v1 REST API covering what a
//! provisioning run needs: instance lookup, insert, list, operation waits and
//! the HTTP firewall rule. [`GceClient`] is the production [`ComputeApi`].

use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::client::CLIENT;
use crate::gcp::gce::defaults::{HTTP_FIREWALL_RULE, create_instance_request, http_firewall_rule};
use crate::gcp::gce::types::{Firewall, InsertInstanceRequest, Instance, InstanceList, Operation};
use crate::gcp::get_access_token;
use crate::provision::{ComputeApi, InstanceRequest};

pub const GCE_API_BASE: &str = "https://compute.googleapis.com/compute/v1";

/// Pause between `operations.wait` calls that return before the operation is done.
const WAIT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Per-call limit for `operations.wait`. The server holds the call open for up
/// to two minutes, so this has to outlast the shared client's default.
pub const WAIT_REQUEST_TIMEOUT: Duration = Duration::from_secs(150);

/// Page size used by [`GceClient::list_instances`].
const LIST_PAGE_SIZE: u32 = 10;

/// Returns the last path segment of a resource URL (`.../zones/us-west1-b` -> `us-west1-b`).
pub fn last_segment(s: &str) -> &str {
    s.rsplit('/').next().unwrap_or(s)
}

/// Where the bearer token comes from.
#[derive(Debug, Clone)]
enum TokenSource {
    /// Service account file or metadata server, see [`get_access_token`].
    Default,
    Static(String),
}

/// Compute Engine client bound to one project.
#[derive(Debug, Clone)]
pub struct GceClient {
    http: reqwest::Client,
    base_url: String,
    project_id: String,
    token: TokenSource,
}

impl GceClient {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            http: CLIENT.clone(),
            base_url: GCE_API_BASE.to_string(),
            project_id: project_id.into(),
            token: TokenSource::Default,
        }
    }

    /// Points the client at another API root, e.g. a local test server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Uses a fixed bearer token instead of the default credential chain.
    pub fn with_static_token(mut self, token: impl Into<String>) -> Self {
        self.token = TokenSource::Static(token.into());
        self
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    async fn bearer(&self) -> Result<String> {
        let token = match &self.token {
            TokenSource::Default => get_access_token()
                .await
                .context("Failed to get access token")?,
            TokenSource::Static(token) => token.clone(),
        };
        Ok(format!("Bearer {}", token))
    }

    fn zonal_url(&self, zone: &str, suffix: &str) -> String {
        format!(
            "{}/projects/{}/zones/{}/{}",
            self.base_url, self.project_id, zone, suffix
        )
    }

    fn global_url(&self, suffix: &str) -> String {
        format!(
            "{}/projects/{}/global/{}",
            self.base_url, self.project_id, suffix
        )
    }

    /// GETs `url`, mapping 404 to `None`.
    async fn get_json<T: DeserializeOwned>(&self, url: &str, what: &str) -> Result<Option<T>> {
        let res = self
            .http
            .get(url)
            .header("Authorization", self.bearer().await?)
            .send()
            .await
            .with_context(|| format!("Failed to call GCE API ({})", what))?;

        if res.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            bail!("Failed to {} (status {}): {}", what, status, body);
        }
        let value = res
            .json()
            .await
            .with_context(|| format!("Failed to parse response JSON ({})", what))?;
        Ok(Some(value))
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        url: &str,
        body: Option<&B>,
        what: &str,
    ) -> Result<T> {
        self.post_json_with_timeout(url, body, None, what).await
    }

    async fn post_json_with_timeout<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        url: &str,
        body: Option<&B>,
        timeout: Option<Duration>,
        what: &str,
    ) -> Result<T> {
        let mut builder = self
            .http
            .post(url)
            .header("Authorization", self.bearer().await?);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let builder = match body {
            Some(body) => builder.json(body),
            None => builder.body(""),
        };
        let res = builder
            .send()
            .await
            .with_context(|| format!("Failed to call GCE API ({})", what))?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            bail!("Failed to {} (status {}): {}", what, status, body);
        }
        res.json()
            .await
            .with_context(|| format!("Failed to parse response JSON ({})", what))
    }

    /// Looks up an instance, returning `None` if it does not exist.
    pub async fn find_instance(&self, zone: &str, name: &str) -> Result<Option<Instance>> {
        let url = self.zonal_url(zone, &format!("instances/{}", name));
        self.get_json(&url, "get instance").await
    }

    /// Submits an `instances.insert` request and returns the pending operation.
    pub async fn insert_instance(&self, zone: &str, body: &InsertInstanceRequest) -> Result<Operation> {
        let url = self.zonal_url(zone, "instances");
        self.post_json(&url, Some(body), "create instance").await
    }

    /// Lists the instances in a zone, following pagination.
    pub async fn list_instances(&self, zone: &str) -> Result<Vec<Instance>> {
        let mut out = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut url = Url::parse(&self.zonal_url(zone, "instances"))
                .context("Failed to build instance list URL")?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("maxResults", &LIST_PAGE_SIZE.to_string());
                if let Some(ref t) = page_token {
                    query.append_pair("pageToken", t);
                }
            }
            let page: InstanceList = self
                .get_json(url.as_str(), "list instances")
                .await?
                .with_context(|| format!("Zone {} not found", zone))?;
            out.extend(page.items);
            page_token = page.next_page_token;
            if page_token.is_none() {
                break;
            }
        }
        Ok(out)
    }

    /// Blocks until `operation` reports `DONE`, using the server-side wait call.
    pub async fn wait(&self, operation: &Operation) -> Result<Operation> {
        let url = match operation.zone.as_deref() {
            Some(zone) => self.zonal_url(
                last_segment(zone),
                &format!("operations/{}/wait", operation.name),
            ),
            None => self.global_url(&format!("operations/{}/wait", operation.name)),
        };

        let mut current = operation.clone();
        while !current.is_done() {
            tracing::debug!(operation = %current.name, status = ?current.status, "waiting on operation");
            let next: Operation = self
                .post_json_with_timeout::<(), _>(
                    &url,
                    None,
                    Some(WAIT_REQUEST_TIMEOUT),
                    "wait for operation",
                )
                .await?;
            if !next.is_done() {
                tokio::time::sleep(WAIT_RETRY_DELAY).await;
            }
            current = next;
        }
        Ok(current)
    }

    /// Creates the `default-allow-http` rule unless it already exists.
    pub async fn ensure_http_firewall(&self) -> Result<()> {
        let url = self.global_url(&format!("firewalls/{}", HTTP_FIREWALL_RULE));
        if self
            .get_json::<Firewall>(&url, "get firewall")
            .await?
            .is_some()
        {
            tracing::debug!(rule = HTTP_FIREWALL_RULE, "firewall rule already present");
            return Ok(());
        }

        tracing::info!(rule = HTTP_FIREWALL_RULE, "creating firewall rule for port 80");
        let op: Operation = self
            .post_json(
                &self.global_url("firewalls"),
                Some(&http_firewall_rule()),
                "create firewall rule",
            )
            .await?;
        let done = self.wait(&op).await?;
        if let Some(message) = done.error_message() {
            bail!("Failed to create firewall rule {}: {}", HTTP_FIREWALL_RULE, message);
        }
        Ok(())
    }
}

#[async_trait]
impl ComputeApi for GceClient {
    async fn instance_exists(&self, zone: &str, name: &str) -> Result<bool> {
        Ok(self.find_instance(zone, name).await?.is_some())
    }

    async fn create_instance(&self, request: &InstanceRequest) -> Result<Operation> {
        if request.http_enabled {
            self.ensure_http_firewall().await?;
        }
        let body = create_instance_request(&self.project_id, request);
        self.insert_instance(&request.zone, &body).await
    }

    async fn wait_operation(&self, operation: &Operation) -> Result<Operation> {
        self.wait(operation).await
    }

    async fn get_instance(&self, zone: &str, name: &str) -> Result<Instance> {
        self.find_instance(zone, name)
            .await?
            .with_context(|| format!("Instance {} not found in zone {}", name, zone))
    }
}
