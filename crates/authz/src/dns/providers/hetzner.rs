//! Hetzner DNS provider
//!
//! API documentation: <https://dns.hetzner.com/api-docs>

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::dns::provider::{DnsProvider, DnsProviderError, DnsResult, CHALLENGE_TTL};

/// Hetzner DNS API base URL
pub const HETZNER_API_BASE: &str = "https://dns.hetzner.com/api/v1";

const AUTH_HEADER: &str = "Auth-API-Token";

/// Hetzner DNS provider
#[derive(Debug)]
pub struct HetznerProvider {
    client: Client,
    base_url: String,
    token: String,
    timeout_secs: u64,
    /// Zones of the account, fetched once
    zones: RwLock<Option<Vec<Zone>>>,
}

#[derive(Debug, Clone, Deserialize)]
struct Zone {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct ZonesResponse {
    zones: Vec<Zone>,
}

#[derive(Debug, Deserialize)]
struct Record {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    name: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct RecordsResponse {
    #[serde(default)]
    records: Vec<Record>,
}

#[derive(Debug, Serialize)]
struct RecordRequest<'a> {
    zone_id: &'a str,
    name: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    value: &'a str,
    ttl: u32,
}

/// Name of `fqdn` relative to `zone`, `@` for the apex
fn relative_name(fqdn: &str, zone: &str) -> String {
    if fqdn == zone {
        "@".to_string()
    } else {
        fqdn.strip_suffix(&format!(".{}", zone))
            .unwrap_or(fqdn)
            .to_string()
    }
}

/// TXT values may come back quoted
fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

impl HetznerProvider {
    pub fn new(token: &str, base_url: Option<&str>, timeout: Duration) -> DnsResult<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            DnsProviderError::Configuration(format!("Failed to create HTTP client: {}", e))
        })?;

        Ok(Self {
            client,
            base_url: base_url
                .unwrap_or(HETZNER_API_BASE)
                .trim_end_matches('/')
                .to_string(),
            token: token.to_string(),
            timeout_secs: timeout.as_secs(),
            zones: RwLock::new(None),
        })
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        req.header(AUTH_HEADER, &self.token)
    }

    async fn send(&self, operation: &'static str, req: RequestBuilder) -> DnsResult<reqwest::Response> {
        let resp = self
            .authed(req)
            .send()
            .await
            .map_err(|e| DnsProviderError::from_reqwest(e, self.timeout_secs))?;
        if resp.status().is_success() {
            Ok(resp)
        } else {
            Err(DnsProviderError::from_response(operation, resp).await)
        }
    }

    async fn list_zones(&self) -> DnsResult<Vec<Zone>> {
        if let Some(zones) = self.zones.read().as_ref() {
            return Ok(zones.clone());
        }

        let resp = self
            .send("list zones", self.client.get(format!("{}/zones", self.base_url)))
            .await?;
        let parsed: ZonesResponse = resp
            .json()
            .await
            .map_err(|e| DnsProviderError::InvalidResponse(format!("zones: {}", e)))?;

        *self.zones.write() = Some(parsed.zones.clone());
        Ok(parsed.zones)
    }

    /// Longest zone that is the name itself or one of its parents
    async fn find_zone(&self, name: &str) -> DnsResult<Zone> {
        let zones = self.list_zones().await?;

        let mut current = name;
        loop {
            if let Some(zone) = zones.iter().find(|z| z.name == current) {
                trace!(record = %name, zone = %zone.name, "Matched hosted zone");
                return Ok(zone.clone());
            }
            match current.split_once('.') {
                Some((_, parent)) if !parent.is_empty() => current = parent,
                _ => {
                    return Err(DnsProviderError::ZoneNotFound {
                        name: name.to_string(),
                    })
                }
            }
        }
    }

    async fn txt_records(&self, zone: &Zone, relative: &str) -> DnsResult<Vec<Record>> {
        let resp = self
            .send(
                "list records",
                self.client
                    .get(format!("{}/records", self.base_url))
                    .query(&[("zone_id", zone.id.as_str())]),
            )
            .await?;
        let parsed: RecordsResponse = resp
            .json()
            .await
            .map_err(|e| DnsProviderError::InvalidResponse(format!("records: {}", e)))?;

        Ok(parsed
            .records
            .into_iter()
            .filter(|r| r.kind == "TXT" && r.name == relative)
            .collect())
    }
}

#[async_trait]
impl DnsProvider for HetznerProvider {
    fn name(&self) -> &'static str {
        "hetzner"
    }

    async fn upsert_txt(&self, name: &str, value: &str) -> DnsResult<()> {
        let zone = self.find_zone(name).await?;
        let relative = relative_name(name, &zone.name);
        let body = RecordRequest {
            zone_id: &zone.id,
            name: &relative,
            kind: "TXT",
            value,
            ttl: CHALLENGE_TTL,
        };

        let existing = self.txt_records(&zone, &relative).await?;
        match existing.first() {
            Some(record) => {
                debug!(zone = %zone.name, record = %relative, record_id = %record.id, "Updating TXT record");
                self.send(
                    "update record",
                    self.client
                        .put(format!("{}/records/{}", self.base_url, record.id))
                        .json(&body),
                )
                .await?;
            }
            None => {
                debug!(zone = %zone.name, record = %relative, "Creating TXT record");
                self.send(
                    "create record",
                    self.client
                        .post(format!("{}/records", self.base_url))
                        .json(&body),
                )
                .await?;
            }
        }
        Ok(())
    }

    async fn delete_txt(&self, name: &str, value: &str) -> DnsResult<()> {
        let zone = self.find_zone(name).await?;
        let relative = relative_name(name, &zone.name);

        let matching = self
            .txt_records(&zone, &relative)
            .await?
            .into_iter()
            .filter(|r| unquote(&r.value) == value);

        for record in matching {
            debug!(zone = %zone.name, record = %relative, record_id = %record.id, "Deleting TXT record");
            let result = self
                .send(
                    "delete record",
                    self.client
                        .delete(format!("{}/records/{}", self.base_url, record.id)),
                )
                .await;
            match result {
                Ok(_) => {}
                Err(DnsProviderError::Api { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                    trace!(record_id = %record.id, "Record already deleted");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}
