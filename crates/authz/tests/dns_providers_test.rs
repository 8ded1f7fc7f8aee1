//! DNS provider implementations against mocked provider APIs

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use acme_authz::dns::{Credentials, DnsProvider, DnsProviderError, HetznerProvider, WebhookProvider};

const RECORD: &str = "_acme-challenge.example.org";

// ============================================================================
// Hetzner Provider Tests
// ============================================================================

mod hetzner_provider {
    use super::*;

    async fn mount_zones(server: &MockServer, zone: &str) {
        Mock::given(method("GET"))
            .and(path("/zones"))
            .and(header("Auth-API-Token", "hetzner-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "zones": [{ "id": "z1", "name": zone }]
            })))
            .mount(server)
            .await;
    }

    async fn mount_records(server: &MockServer, records: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/records"))
            .and(query_param("zone_id", "z1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "records": records })))
            .mount(server)
            .await;
    }

    fn provider(server: &MockServer) -> HetznerProvider {
        HetznerProvider::new("hetzner-token", Some(&server.uri()), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_upsert_creates_record_in_parent_zone() {
        let server = MockServer::start().await;
        mount_zones(&server, "example.org").await;
        mount_records(&server, json!([])).await;

        Mock::given(method("POST"))
            .and(path("/records"))
            .and(body_partial_json(json!({
                "zone_id": "z1",
                "name": "_acme-challenge",
                "type": "TXT",
                "value": "txt-value",
                "ttl": 60,
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "record": {} })))
            .expect(1)
            .mount(&server)
            .await;

        provider(&server).upsert_txt(RECORD, "txt-value").await.unwrap();
    }

    #[tokio::test]
    async fn test_upsert_updates_existing_record() {
        let server = MockServer::start().await;
        mount_zones(&server, "example.org").await;
        mount_records(
            &server,
            json!([{ "id": "r1", "type": "TXT", "name": "_acme-challenge", "value": "\"old\"" }]),
        )
        .await;

        Mock::given(method("PUT"))
            .and(path("/records/r1"))
            .and(body_partial_json(json!({ "value": "txt-value" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "record": {} })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/records"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        provider(&server).upsert_txt(RECORD, "txt-value").await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_only_matching_value() {
        let server = MockServer::start().await;
        mount_zones(&server, "example.org").await;
        mount_records(
            &server,
            json!([
                { "id": "r1", "type": "TXT", "name": "_acme-challenge", "value": "\"txt-value\"" },
                { "id": "r2", "type": "TXT", "name": "_acme-challenge", "value": "other" },
                { "id": "r3", "type": "A", "name": "_acme-challenge", "value": "192.0.2.1" }
            ]),
        )
        .await;

        Mock::given(method("DELETE"))
            .and(path("/records/r1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/records/r2"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        provider(&server).delete_txt(RECORD, "txt-value").await.unwrap();
    }

    #[tokio::test]
    async fn test_zone_not_found() {
        let server = MockServer::start().await;
        mount_zones(&server, "example.net").await;

        let err = provider(&server)
            .upsert_txt(RECORD, "txt-value")
            .await
            .unwrap_err();
        assert!(matches!(err, DnsProviderError::ZoneNotFound { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_authentication_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/zones"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = provider(&server)
            .upsert_txt(RECORD, "txt-value")
            .await
            .unwrap_err();
        assert!(matches!(err, DnsProviderError::Authentication(_)), "got {err:?}");
    }
}

// ============================================================================
// Webhook Provider Tests
// ============================================================================

mod webhook_provider {
    use super::*;

    fn provider(server: &MockServer, credentials: Option<Credentials>) -> WebhookProvider {
        WebhookProvider::new(&server.uri(), None, credentials, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_upsert_posts_record() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/records"))
            .and(header("Authorization", "Bearer hook-token"))
            .and(body_partial_json(json!({
                "name": RECORD,
                "type": "TXT",
                "value": "txt-value",
                "ttl": 60,
            })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        provider(&server, Some(Credentials::Token("hook-token".to_string())))
            .upsert_txt(RECORD, "txt-value")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_custom_auth_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/records"))
            .and(header("X-Api-Key", "hook-token"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        WebhookProvider::new(
            &server.uri(),
            Some("X-Api-Key".to_string()),
            Some(Credentials::Token("hook-token".to_string())),
            Duration::from_secs(5),
        )
        .unwrap()
        .upsert_txt(RECORD, "txt-value")
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_delete_not_found_is_ok() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/records"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert!(provider(&server, None).delete_txt(RECORD, "txt-value").await.is_ok());
    }

    #[tokio::test]
    async fn test_server_error_is_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/records"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let err = provider(&server, None)
            .upsert_txt(RECORD, "txt-value")
            .await
            .unwrap_err();
        assert!(
            matches!(err, DnsProviderError::Api { status: 502, .. }),
            "got {err:?}"
        );
    }
}
