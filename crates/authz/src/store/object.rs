//! S3-compatible object storage filer
//!
//! Objects live at `<endpoint>/<bucket>/<key>` (path-style addressing).
//! When an encryption key id is supplied the write requests SSE-KMS.
//! Listing uses `ListObjectsV2`.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use tracing::{debug, trace};

use crate::error::FilerError;
use crate::retry::{with_retry, RetryPolicy};

use super::filer::{validate_key, Filer};

const SSE_HEADER: &str = "x-amz-server-side-encryption";
const SSE_KMS_KEY_HEADER: &str = "x-amz-server-side-encryption-aws-kms-key-id";

/// Object storage filer
#[derive(Debug, Clone)]
pub struct ObjectStoreFiler {
    http: reqwest::Client,
    endpoint: String,
    bucket: String,
    bearer_token: Option<String>,
    retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListBucketResult {
    #[serde(default)]
    contents: Vec<ObjectEntry>,
    #[serde(default)]
    is_truncated: bool,
    #[serde(default)]
    next_continuation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ObjectEntry {
    key: String,
}

fn transport(e: reqwest::Error) -> FilerError {
    FilerError::Transport(e.to_string())
}

impl ObjectStoreFiler {
    pub fn new(http: reqwest::Client, endpoint: &str, bucket: &str) -> Result<Self, FilerError> {
        let parsed = url::Url::parse(endpoint)
            .map_err(|e| FilerError::Configuration(format!("endpoint '{}': {}", endpoint, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FilerError::Configuration(format!(
                "endpoint '{}' must be http(s)",
                endpoint
            )));
        }
        if bucket.is_empty() || bucket.contains('/') {
            return Err(FilerError::Configuration(format!("invalid bucket '{}'", bucket)));
        }

        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            bucket: bucket.to_string(),
            bearer_token: None,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_bearer_token(mut self, token: Option<String>) -> Self {
        self.bearer_token = token;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn bucket_url(&self) -> String {
        format!("{}/{}", self.endpoint, self.bucket)
    }

    fn object_url(&self, key: &str) -> String {
        let encoded: Vec<String> = key
            .split('/')
            .map(|seg| urlencoding::encode(seg).into_owned())
            .collect();
        format!("{}/{}", self.bucket_url(), encoded.join("/"))
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let req = self.http.request(method, url);
        match &self.bearer_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn fetch(&self, key: &str, url: &str) -> Result<Vec<u8>, FilerError> {
        let resp = self.request(Method::GET, url).send().await.map_err(transport)?;
        let status = resp.status();

        if status == StatusCode::NOT_FOUND {
            return Err(FilerError::NotFound(key.to_string()));
        }
        if !status.is_success() {
            return Err(http_error(key, resp).await);
        }

        let body = resp.bytes().await.map_err(transport)?;
        Ok(body.to_vec())
    }

    async fn store(
        &self,
        key: &str,
        url: &str,
        data: &[u8],
        encryption_key_id: Option<&str>,
    ) -> Result<(), FilerError> {
        let mut req = self
            .request(Method::PUT, url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(data.to_vec());
        if let Some(kms_key_id) = encryption_key_id {
            req = req
                .header(SSE_HEADER, "aws:kms")
                .header(SSE_KMS_KEY_HEADER, kms_key_id);
        }

        let resp = req.send().await.map_err(transport)?;
        if !resp.status().is_success() {
            return Err(http_error(key, resp).await);
        }
        Ok(())
    }

    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<&str>,
    ) -> Result<ListBucketResult, FilerError> {
        let mut query = vec![("list-type", "2"), ("prefix", prefix)];
        if let Some(token) = continuation {
            query.push(("continuation-token", token));
        }

        let resp = self
            .request(Method::GET, &self.bucket_url())
            .query(&query)
            .send()
            .await
            .map_err(transport)?;
        if !resp.status().is_success() {
            return Err(http_error(prefix, resp).await);
        }

        let body = resp.text().await.map_err(transport)?;
        quick_xml::de::from_str(&body)
            .map_err(|e| FilerError::InvalidResponse(format!("ListObjectsV2: {}", e)))
    }
}

async fn http_error(key: &str, resp: reqwest::Response) -> FilerError {
    let status = resp.status().as_u16();
    let message = resp.text().await.unwrap_or_default();
    FilerError::Http {
        key: key.to_string(),
        status,
        message,
    }
}

#[async_trait]
impl Filer for ObjectStoreFiler {
    fn name(&self) -> &'static str {
        "object-store"
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, FilerError> {
        validate_key(key)?;
        let url = self.object_url(key);
        let url = url.as_str();

        let data = with_retry(&self.retry, "object_store_get", || async move {
            self.fetch(key, url).await
        })
        .await?;

        trace!(bucket = %self.bucket, key, bytes = data.len(), "Read object");
        Ok(data)
    }

    async fn put(
        &self,
        key: &str,
        data: &[u8],
        encryption_key_id: Option<&str>,
    ) -> Result<(), FilerError> {
        validate_key(key)?;
        let url = self.object_url(key);
        let url = url.as_str();

        with_retry(&self.retry, "object_store_put", || async move {
            self.store(key, url, data, encryption_key_id).await
        })
        .await?;

        debug!(
            bucket = %self.bucket,
            key,
            bytes = data.len(),
            encrypted = encryption_key_id.is_some(),
            "Wrote object"
        );
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, FilerError> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let token = continuation.as_deref();
            let page = with_retry(&self.retry, "object_store_list", || async move {
                self.list_page(prefix, token).await
            })
            .await?;

            keys.extend(page.contents.into_iter().map(|entry| entry.key));

            match page.next_continuation_token {
                Some(next) if page.is_truncated => continuation = Some(next),
                _ => break,
            }
        }

        keys.sort();
        Ok(keys)
    }
}
