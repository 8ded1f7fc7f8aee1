//! Shared fixtures: a simulated ACME authority and a recording DNS provider

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use acme_authz::dns::{DnsProvider, DnsProviderError, DnsResult};
use acme_authz::{MemoryFiler, PollPolicy, RetryPolicy, RunContext};

pub const EMAIL: &str = "ops@example.org";
pub const DOMAIN: &str = "example.org";
pub const TOKEN: &str = "abc123";

/// JWS payload of a challenge submission (`{}`)
const SUBMIT_PAYLOAD: &str = "e30";

pub struct Authority {
    pub server: MockServer,
}

fn nonced(status: u16) -> ResponseTemplate {
    ResponseTemplate::new(status).insert_header("Replay-Nonce", "test-nonce")
}

impl Authority {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn url(&self, p: &str) -> String {
        format!("{}{}", self.server.uri(), p)
    }

    pub fn directory_url(&self) -> String {
        self.url("/directory")
    }

    pub fn challenge_url(&self) -> String {
        self.url("/chall/1")
    }

    pub fn authz_url(&self) -> String {
        self.url("/authz/1")
    }

    pub fn challenge(&self, kind: &str, status: &str) -> Value {
        json!({
            "type": kind,
            "url": self.challenge_url(),
            "token": TOKEN,
            "status": status,
        })
    }

    pub fn authorization(&self, status: &str, challenges: Vec<Value>) -> Value {
        json!({
            "identifier": { "type": "dns", "value": DOMAIN },
            "status": status,
            "expires": "2030-01-01T00:00:00Z",
            "challenges": challenges,
        })
    }

    /// Directory, nonce and account endpoints
    pub async fn mount_account(&self, pre_authorization: bool) {
        let mut directory = json!({
            "newNonce": self.url("/new-nonce"),
            "newAccount": self.url("/new-acct"),
            "newOrder": self.url("/new-order"),
            "revokeCert": self.url("/revoke-cert"),
            "keyChange": self.url("/key-change"),
        });
        if pre_authorization {
            directory["newAuthz"] = json!(self.url("/new-authz"));
        }

        Mock::given(method("GET"))
            .and(path("/directory"))
            .respond_with(ResponseTemplate::new(200).set_body_json(directory))
            .mount(&self.server)
            .await;

        Mock::given(method("HEAD"))
            .and(path("/new-nonce"))
            .respond_with(nonced(200))
            .mount(&self.server)
            .await;

        Mock::given(method("POST"))
            .and(path("/new-acct"))
            .respond_with(
                nonced(201)
                    .insert_header("Location", self.url("/acct/1").as_str())
                    .set_body_json(json!({
                        "status": "valid",
                        "contact": [format!("mailto:{}", EMAIL)],
                    })),
            )
            .mount(&self.server)
            .await;
    }

    /// Pre-authorization returning a pending authorization with `challenges`
    pub async fn mount_new_authz(&self, challenges: Vec<Value>) {
        Mock::given(method("POST"))
            .and(path("/new-authz"))
            .respond_with(
                nonced(201)
                    .insert_header("Location", self.authz_url().as_str())
                    .set_body_json(self.authorization("pending", challenges)),
            )
            .mount(&self.server)
            .await;
    }

    pub async fn mount_new_authz_rejected(&self) {
        Mock::given(method("POST"))
            .and(path("/new-authz"))
            .respond_with(nonced(400).set_body_json(json!({
                "type": "urn:ietf:params:acme:error:rejectedIdentifier",
                "detail": "Domain is forbidden by policy",
                "status": 400,
            })))
            .mount(&self.server)
            .await;
    }

    /// Challenge submission answering `status`
    pub async fn mount_submit(&self, status: u16, body: Value) {
        Mock::given(method("POST"))
            .and(path("/chall/1"))
            .and(body_partial_json(json!({ "payload": SUBMIT_PAYLOAD })))
            .respond_with(nonced(status).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    /// Challenge polling answering `body`
    pub async fn mount_poll(&self, body: Value) {
        Mock::given(method("POST"))
            .and(path("/chall/1"))
            .and(body_partial_json(json!({ "payload": "" })))
            .respond_with(nonced(200).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    /// POST-as-GET of the authorization
    pub async fn mount_final_authz(&self, status: &str) {
        let challenge = self.challenge("dns-01", status);
        Mock::given(method("POST"))
            .and(path("/authz/1"))
            .respond_with(nonced(200).set_body_json(self.authorization(status, vec![challenge])))
            .mount(&self.server)
            .await;
    }

    /// Everything a successful DNS-01 run needs
    pub async fn mount_happy_path(&self) {
        self.mount_account(true).await;
        self.mount_new_authz(vec![self.challenge("dns-01", "pending")])
            .await;
        self.mount_submit(200, self.challenge("dns-01", "processing"))
            .await;
        self.mount_poll(self.challenge("dns-01", "valid")).await;
        self.mount_final_authz("valid").await;
    }
}

/// DNS provider that records every call
#[derive(Debug, Default)]
pub struct RecordingDnsProvider {
    pub upserts: Mutex<Vec<(String, String)>>,
    pub deletes: Mutex<Vec<(String, String)>>,
    pub fail_upsert: bool,
    pub fail_delete: bool,
}

#[async_trait]
impl DnsProvider for RecordingDnsProvider {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn upsert_txt(&self, name: &str, value: &str) -> DnsResult<()> {
        self.upserts.lock().push((name.to_string(), value.to_string()));
        if self.fail_upsert {
            return Err(DnsProviderError::ZoneNotFound {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    async fn delete_txt(&self, name: &str, value: &str) -> DnsResult<()> {
        self.deletes.lock().push((name.to_string(), value.to_string()));
        if self.fail_delete {
            return Err(DnsProviderError::Api {
                operation: "delete_txt",
                status: 500,
                message: "record store unavailable".to_string(),
            });
        }
        Ok(())
    }
}

pub fn fast_poll() -> PollPolicy {
    PollPolicy {
        interval: Duration::from_millis(10),
        timeout: Duration::from_secs(2),
    }
}

pub fn context(filer: Arc<MemoryFiler>, dns: Arc<RecordingDnsProvider>) -> RunContext {
    RunContext::new(reqwest::Client::new(), filer)
        .with_dns_provider(dns)
        .with_retry(RetryPolicy::none())
        .with_poll_policy(fast_poll())
}
