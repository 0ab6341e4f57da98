//! HTTP-level contract tests for `BrokerClient`, using `mockito` to stand
//! in for a real broker the way the FUSE adapter's own tests mock the
//! Nexus server.

use gate_client::{AcquireOutcome, BrokerClient, BrokerEndpoint, ClientError};
use gate_core::Mode;
use mockito::Server;

fn client_for(server: &Server) -> BrokerClient {
    let url = server.url();
    let (host, port) = url
        .trim_start_matches("http://")
        .split_once(':')
        .map(|(h, p)| (h.to_string(), p.parse().unwrap()))
        .unwrap();
    BrokerClient::new(BrokerEndpoint { host, port }).unwrap()
}

#[test]
fn acquire_parses_granted_lock() {
    let mut server = Server::new();
    let _m = server
        .mock("POST", "/v1/locks/acquire")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"status":"granted","lock":{"lock_id":"abc","path":"f","mode":"write","owner":"a","acquired_at":"2024-01-01T00:00:00+00:00","lease_expires_at":"2024-01-01T01:00:00+00:00","max_hold_ms":null,"hold_count":1}}"#,
        )
        .create();

    let client = client_for(&server);
    let outcome = client
        .acquire("f", Mode::Write, "a", Some(1000), 60_000, None)
        .unwrap();
    match outcome {
        AcquireOutcome::Granted(lock) => {
            assert_eq!(lock.lock_id, "abc");
            assert_eq!(lock.owner, "a");
        }
        AcquireOutcome::TimedOut => panic!("expected a granted lock"),
    }
}

#[test]
fn acquire_timeout_status_maps_to_timed_out_outcome() {
    let mut server = Server::new();
    let _m = server
        .mock("POST", "/v1/locks/acquire")
        .with_status(408)
        .with_header("content-type", "application/json")
        .with_body(r#"{"status":"timeout"}"#)
        .create();

    let client = client_for(&server);
    let outcome = client
        .acquire("f", Mode::Write, "a", Some(50), 60_000, None)
        .unwrap();
    assert!(matches!(outcome, AcquireOutcome::TimedOut));
}

#[test]
fn release_owner_mismatch_maps_to_forbidden_error() {
    let mut server = Server::new();
    let _m = server
        .mock("POST", "/v1/locks/release")
        .with_status(403)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error":"owner mismatch"}"#)
        .create();

    let client = client_for(&server);
    let err = client.release("abc", "wrong-owner").unwrap_err();
    assert!(matches!(err, ClientError::OwnerMismatch));
    assert_eq!(err.to_errno(), libc::EACCES);
}

#[test]
fn release_not_found_maps_to_enoent() {
    let mut server = Server::new();
    let _m = server
        .mock("POST", "/v1/locks/release")
        .with_status(404)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error":"lock not found"}"#)
        .create();

    let client = client_for(&server);
    let err = client.release("missing", "a").unwrap_err();
    assert_eq!(err.to_errno(), libc::ENOENT);
}
