//! Generic webhook DNS provider
//!
//! ```text
//! POST   {url}/records   {"name": "...", "type": "TXT", "value": "...", "ttl": 60}
//! DELETE {url}/records   {"name": "...", "type": "TXT", "value": "...", "ttl": 60}
//! ```
//!
//! Any 2xx is success. A 404 on delete means the record is already gone.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Serialize;
use tracing::debug;

use crate::dns::credentials::Credentials;
use crate::dns::provider::{DnsProvider, DnsProviderError, DnsResult, CHALLENGE_TTL};

/// Webhook DNS provider for custom integrations
#[derive(Debug)]
pub struct WebhookProvider {
    client: Client,
    base_url: String,
    auth_header: Option<String>,
    credentials: Option<Credentials>,
    timeout_secs: u64,
}

#[derive(Debug, Serialize)]
struct RecordPayload<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    value: &'a str,
    ttl: u32,
}

impl WebhookProvider {
    pub fn new(
        base_url: &str,
        auth_header: Option<String>,
        credentials: Option<Credentials>,
        timeout: Duration,
    ) -> DnsResult<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            DnsProviderError::Configuration(format!("Failed to create HTTP client: {}", e))
        })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_header,
            credentials,
            timeout_secs: timeout.as_secs(),
        })
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        match (&self.auth_header, &self.credentials) {
            (Some(header), Some(creds)) => req.header(header.as_str(), creds.token()),
            (None, Some(creds)) => req.bearer_auth(creds.token()),
            _ => req,
        }
    }

    fn records_url(&self) -> String {
        format!("{}/records", self.base_url)
    }
}

#[async_trait]
impl DnsProvider for WebhookProvider {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn upsert_txt(&self, name: &str, value: &str) -> DnsResult<()> {
        debug!(record = %name, url = %self.base_url, "Upserting TXT record via webhook");

        let payload = RecordPayload {
            name,
            kind: "TXT",
            value,
            ttl: CHALLENGE_TTL,
        };
        let resp = self
            .authed(self.client.post(self.records_url()).json(&payload))
            .send()
            .await
            .map_err(|e| DnsProviderError::from_reqwest(e, self.timeout_secs))?;

        if !resp.status().is_success() {
            return Err(DnsProviderError::from_response("upsert record", resp).await);
        }
        Ok(())
    }

    async fn delete_txt(&self, name: &str, value: &str) -> DnsResult<()> {
        debug!(record = %name, url = %self.base_url, "Deleting TXT record via webhook");

        let payload = RecordPayload {
            name,
            kind: "TXT",
            value,
            ttl: CHALLENGE_TTL,
        };
        let resp = self
            .authed(self.client.delete(self.records_url()).json(&payload))
            .send()
            .await
            .map_err(|e| DnsProviderError::from_reqwest(e, self.timeout_secs))?;

        if resp.status() == StatusCode::NOT_FOUND {
            debug!(record = %name, "Record already deleted");
            return Ok(());
        }
        if !resp.status().is_success() {
            return Err(DnsProviderError::from_response("delete record", resp).await);
        }
        Ok(())
    }
}
