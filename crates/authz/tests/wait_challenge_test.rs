//! Challenge polling: terminal states, deadlines and cancellation

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use acme_authz::{
    AccountKey, AcmeError, Challenge, ClientState, ChallengeStatus, DirectoryClient, PollPolicy,
    RetryPolicy,
};

use common::{Authority, EMAIL};

async fn ready_client(authority: &Authority, poll: PollPolicy) -> DirectoryClient {
    let key = Arc::new(AccountKey::generate().unwrap());
    let mut client = DirectoryClient::new(
        reqwest::Client::new(),
        authority.directory_url(),
        EMAIL,
        key,
    )
    .with_retry(RetryPolicy::none())
    .with_poll_policy(poll);
    client.init().await.unwrap();
    client
}

fn pending_challenge(authority: &Authority) -> Challenge {
    serde_json::from_value(authority.challenge("dns-01", "pending")).unwrap()
}

#[tokio::test]
async fn test_init_registers_account() {
    let authority = Authority::start().await;
    authority.mount_account(true).await;

    let client = ready_client(&authority, common::fast_poll()).await;
    assert_eq!(client.state(), ClientState::Ready);
    assert_eq!(client.account_url(), Some(authority.url("/acct/1").as_str()));
    assert!(client.directory().unwrap().new_authz.is_some());
}

#[tokio::test]
async fn test_valid_after_processing() {
    let authority = Authority::start().await;
    authority.mount_account(true).await;

    Mock::given(method("POST"))
        .and(path("/chall/1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Replay-Nonce", "n")
                .set_body_json(authority.challenge("dns-01", "processing")),
        )
        .up_to_n_times(2)
        .mount(&authority.server)
        .await;
    authority
        .mount_poll(authority.challenge("dns-01", "valid"))
        .await;

    let client = ready_client(&authority, common::fast_poll()).await;
    let done = client
        .wait_challenge_done(&pending_challenge(&authority), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(done.status, ChallengeStatus::Valid);
    assert_eq!(client.state(), ClientState::Polling);
}

#[tokio::test]
async fn test_invalid_status_is_challenge_failed() {
    let authority = Authority::start().await;
    authority.mount_account(true).await;
    authority
        .mount_poll(json!({
            "type": "dns-01",
            "url": authority.challenge_url(),
            "token": common::TOKEN,
            "status": "invalid",
            "error": {
                "type": "urn:ietf:params:acme:error:incorrectResponse",
                "detail": "Incorrect TXT record",
            },
        }))
        .await;

    let client = ready_client(&authority, common::fast_poll()).await;
    let err = client
        .wait_challenge_done(&pending_challenge(&authority), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        AcmeError::ChallengeFailed { url, problem } => {
            assert_eq!(url, authority.challenge_url());
            let problem = problem.unwrap();
            assert_eq!(problem.kind, "urn:ietf:params:acme:error:incorrectResponse");
            assert_eq!(problem.detail.as_deref(), Some("Incorrect TXT record"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_times_out_when_never_terminal() {
    let authority = Authority::start().await;
    authority.mount_account(true).await;
    authority
        .mount_poll(authority.challenge("dns-01", "pending"))
        .await;

    let poll = PollPolicy {
        interval: Duration::from_millis(10),
        timeout: Duration::from_millis(100),
    };
    let client = ready_client(&authority, poll).await;

    let started = Instant::now();
    let err = client
        .wait_challenge_done(&pending_challenge(&authority), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, AcmeError::Timeout { .. }), "got {err:?}");
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_cancellation_interrupts_polling() {
    let authority = Authority::start().await;
    authority.mount_account(true).await;
    authority
        .mount_poll(authority.challenge("dns-01", "pending"))
        .await;

    let poll = PollPolicy {
        interval: Duration::from_millis(20),
        timeout: Duration::from_secs(30),
    };
    let client = ready_client(&authority, poll).await;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(60)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let err = client
        .wait_challenge_done(&pending_challenge(&authority), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, AcmeError::Cancelled), "got {err:?}");
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_bad_nonce_is_retried_with_fresh_nonce() {
    let authority = Authority::start().await;

    Mock::given(method("POST"))
        .and(path("/new-acct"))
        .respond_with(
            ResponseTemplate::new(400)
                .insert_header("Replay-Nonce", "fresh-nonce")
                .set_body_json(json!({
                    "type": "urn:ietf:params:acme:error:badNonce",
                    "detail": "JWS has an invalid anti-replay nonce",
                })),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&authority.server)
        .await;
    authority.mount_account(true).await;

    let key = Arc::new(AccountKey::generate().unwrap());
    let mut client = DirectoryClient::new(
        reqwest::Client::new(),
        authority.directory_url(),
        EMAIL,
        key,
    )
    .with_retry(RetryPolicy {
        max_retries: 2,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
    });

    let account_url = client.init().await.unwrap();
    assert_eq!(account_url, authority.url("/acct/1"));
}

#[tokio::test]
async fn test_rejected_account_is_account_error() {
    let authority = Authority::start().await;

    Mock::given(method("POST"))
        .and(path("/new-acct"))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("Replay-Nonce", "n")
                .set_body_json(json!({
                    "type": "urn:ietf:params:acme:error:unauthorized",
                    "detail": "Account is deactivated",
                })),
        )
        .mount(&authority.server)
        .await;
    authority.mount_account(true).await;

    let key = Arc::new(AccountKey::generate().unwrap());
    let mut client = DirectoryClient::new(
        reqwest::Client::new(),
        authority.directory_url(),
        EMAIL,
        key,
    )
    .with_retry(RetryPolicy::none());

    let err = client.init().await.unwrap_err();
    assert!(matches!(err, AcmeError::Account { problem: Some(_), .. }), "got {err:?}");
    assert!(client.account_url().is_none());
}
