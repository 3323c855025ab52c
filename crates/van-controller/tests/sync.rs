//! Site synchronization integration tests
//!
//! These tests drive `dispatch` with wire envelopes against a live fixture:
//! - Claim admission (deadline, instance limit, unissued claim certificate)
//! - Heartbeat hash-sets and GET fetches converging on the same objects
//! - The version gate and unknown operations

mod common;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use common::Fixture;
use van_controller::provisioning::{CERTIFICATE_OBJECT, LINKS_OBJECT};
use van_controller::sync::{dispatch, SyncError};
use van_core::protocol::{decode_reply, ClaimReply, HeartbeatAck, ObjectReply};
use van_core::{CertificateSubject, SiteResponse};

fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
}

fn claim_message(invitation: Uuid, name: &str) -> Value {
    json!({ "version": 1, "op": "CLAIM", "claim": invitation, "name": name })
}

fn wire(response: &SiteResponse) -> Value {
    serde_json::to_value(response).unwrap()
}

// =============================================================================
// Claims
// =============================================================================

#[tokio::test]
async fn test_claim_admits_site_and_requests_identity() {
    let now = Utc::now();
    let fx = Fixture::new(now).await;
    let network = fx.ready_network("acme", now).await;
    let invitation = fx.invitation(&network, Some(2), None, true, now).await;

    let response = dispatch(&fx.sync(), &claim_message(invitation.id, "site-a")).await;
    assert_eq!(response.status_code(), 200);
    let reply: ClaimReply = decode_reply(&wire(&response)).unwrap();

    assert_eq!(reply.outgoing_links.len(), 1);
    assert_eq!(reply.outgoing_links[0].site, fx.access.id);
    assert_eq!(reply.outgoing_links[0].port, fx.access.member_port);
    assert!(!BASE64.decode(&reply.site_client.key_material).unwrap().is_empty());
    assert!(reply.site_client.annotations.contains_key("certificate"));

    let stored = fx.stored_invitation(invitation.id).await;
    assert_eq!(stored.instance_count, 1);

    let mut tx = fx.shared.begin().await.unwrap();
    let site = tx.get_member_site(reply.site).await.unwrap().unwrap();
    let claim_cert = tx
        .get_certificate(invitation.claim_certificate.unwrap())
        .await
        .unwrap()
        .unwrap();
    let requests = tx.list_certificate_requests().await.unwrap();
    assert_eq!(site.network, network.id);
    assert_eq!(site.site_class.as_deref(), Some("edge"));
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].subject, CertificateSubject::MemberSite(site.id));
    assert_eq!(requests[0].expire_time, Some(claim_cert.expiration));
}

#[tokio::test]
async fn test_claim_beyond_limit_is_conflict() {
    let now = Utc::now();
    let fx = Fixture::new(now).await;
    let network = fx.ready_network("acme", now).await;
    let invitation = fx.invitation(&network, Some(1), None, true, now).await;
    let sync = fx.sync();

    let first = dispatch(&sync, &claim_message(invitation.id, "site-a")).await;
    let second = dispatch(&sync, &claim_message(invitation.id, "site-b")).await;

    assert_eq!(first.status_code(), 200);
    assert_eq!(second.status_code(), 409);
    assert_eq!(fx.stored_invitation(invitation.id).await.instance_count, 1);
}

#[tokio::test]
async fn test_claim_after_deadline_is_gone() {
    let now = at(2024, 1, 1);
    let fx = Fixture::new(now).await;
    let network = fx.ready_network("acme", now).await;
    let deadline = now + Duration::days(1);
    let invitation = fx.invitation(&network, None, Some(deadline), true, now).await;
    let sync = fx.sync();

    let claim = van_core::protocol::Claim {
        claim: invitation.id,
        name: "late".into(),
    };
    let err = sync.claim(claim, deadline + Duration::seconds(1)).await.unwrap_err();

    assert_eq!(err.status_code(), 410);
    assert!(matches!(err, SyncError::Admission { .. }));
    assert_eq!(fx.stored_invitation(invitation.id).await.instance_count, 0);
}

#[tokio::test]
async fn test_claim_before_certificate_is_unavailable() {
    let now = Utc::now();
    let fx = Fixture::new(now).await;
    let network = fx.ready_network("acme", now).await;
    let invitation = fx.invitation(&network, None, None, false, now).await;

    let response = dispatch(&fx.sync(), &claim_message(invitation.id, "eager")).await;

    assert_eq!(response.status_code(), 503);
    assert_eq!(fx.stored_invitation(invitation.id).await.instance_count, 0);
}

#[tokio::test]
async fn test_claim_unknown_invitation_is_not_found() {
    let now = Utc::now();
    let fx = Fixture::new(now).await;

    let response = dispatch(&fx.sync(), &claim_message(Uuid::new_v4(), "stray")).await;

    assert_eq!(response.status_code(), 404);
}

#[tokio::test]
async fn test_claim_with_empty_name_is_bad_request() {
    let now = Utc::now();
    let fx = Fixture::new(now).await;
    let network = fx.ready_network("acme", now).await;
    let invitation = fx.invitation(&network, None, None, true, now).await;

    let response = dispatch(&fx.sync(), &claim_message(invitation.id, "  ")).await;

    assert_eq!(response.status_code(), 400);
    assert_eq!(fx.stored_invitation(invitation.id).await.instance_count, 0);
}

#[tokio::test]
async fn test_failed_claim_leaves_count_unchanged() {
    let now = Utc::now();
    let fx = Fixture::new(now).await;
    let network = fx.ready_network("acme", now).await;
    let invitation = fx.invitation(&network, Some(1), None, true, now).await;

    fx.store.fail_next("insert_certificate_request").await;
    let failed = dispatch(&fx.sync(), &claim_message(invitation.id, "site-a")).await;
    assert_eq!(failed.status_code(), 500);
    assert_eq!(fx.stored_invitation(invitation.id).await.instance_count, 0);

    // The single admission is still available
    let retried = dispatch(&fx.sync(), &claim_message(invitation.id, "site-a")).await;
    assert_eq!(retried.status_code(), 200);
}

// =============================================================================
// Heartbeat and GET
// =============================================================================

#[tokio::test]
async fn test_heartbeat_and_get_agree_on_objects() {
    let now = Utc::now();
    let fx = Fixture::new(now).await;
    let network = fx.ready_network("acme", now).await;
    let invitation = fx.invitation(&network, None, None, true, now).await;
    let sync = fx.sync();

    let claimed = dispatch(&sync, &claim_message(invitation.id, "site-a")).await;
    let site = decode_reply::<ClaimReply>(&wire(&claimed)).unwrap().site;

    let heartbeat = json!({ "version": 1, "op": "HB", "site": site, "hashset": {} });
    let before: HeartbeatAck = decode_reply(&wire(&dispatch(&sync, &heartbeat).await)).unwrap();
    let before = before.hashset.unwrap();
    assert_eq!(before.len(), 4);

    // Certificate is null until the pipeline issues the site identity
    let get = |name: &str| json!({ "version": 1, "op": "GET", "site": site, "objectname": name });
    let pending: ObjectReply = decode_reply(&wire(&dispatch(&sync, &get(CERTIFICATE_OBJECT)).await)).unwrap();
    assert!(pending.data.is_null());

    // The vanSite request became eligible when the claim was answered
    fx.drain(Utc::now()).await;

    let after: HeartbeatAck = decode_reply(&wire(&dispatch(&sync, &heartbeat).await)).unwrap();
    let after = after.hashset.unwrap();
    assert_eq!(after[LINKS_OBJECT], before[LINKS_OBJECT]);
    assert_ne!(after[CERTIFICATE_OBJECT], before[CERTIFICATE_OBJECT]);

    for (name, hash) in &after {
        let object: ObjectReply = decode_reply(&wire(&dispatch(&sync, &get(name.as_str())).await)).unwrap();
        assert_eq!(&object.hash, hash);
        assert_eq!(&object.object_name, name);
    }

    let issued: ObjectReply = decode_reply(&wire(&dispatch(&sync, &get(CERTIFICATE_OBJECT)).await)).unwrap();
    assert!(issued.data["keyMaterial"].is_string());

    let mut tx = fx.shared.begin().await.unwrap();
    let stored = tx.get_member_site(site).await.unwrap().unwrap();
    assert!(stored.certificate.is_some());
    assert!(stored.last_heartbeat.is_some());
}

#[tokio::test]
async fn test_heartbeat_records_address() {
    let now = Utc::now();
    let fx = Fixture::new(now).await;
    let network = fx.ready_network("acme", now).await;
    let invitation = fx.invitation(&network, None, None, true, now).await;
    let sync = fx.sync();
    let claimed = dispatch(&sync, &claim_message(invitation.id, "site-a")).await;
    let site = decode_reply::<ClaimReply>(&wire(&claimed)).unwrap().site;

    let heartbeat = json!({ "version": 1, "op": "HB", "site": site, "address": "10.0.0.7" });
    assert!(dispatch(&sync, &heartbeat).await.is_success());

    let mut tx = fx.shared.begin().await.unwrap();
    let stored = tx.get_member_site(site).await.unwrap().unwrap();
    assert_eq!(stored.address.as_deref(), Some("10.0.0.7"));
}

#[tokio::test]
async fn test_unknown_site_and_object_are_not_found() {
    let now = Utc::now();
    let fx = Fixture::new(now).await;
    let network = fx.ready_network("acme", now).await;
    let invitation = fx.invitation(&network, None, None, true, now).await;
    let sync = fx.sync();
    let claimed = dispatch(&sync, &claim_message(invitation.id, "site-a")).await;
    let site = decode_reply::<ClaimReply>(&wire(&claimed)).unwrap().site;

    let stray = json!({ "version": 1, "op": "HB", "site": Uuid::new_v4() });
    let missing = json!({ "version": 1, "op": "GET", "site": site, "objectname": "routes" });

    assert_eq!(dispatch(&sync, &stray).await.status_code(), 404);
    assert_eq!(dispatch(&sync, &missing).await.status_code(), 404);
}

// =============================================================================
// Envelope checks
// =============================================================================

#[tokio::test]
async fn test_version_mismatch_is_rejected_before_handling() {
    let now = Utc::now();
    let fx = Fixture::new(now).await;
    let network = fx.ready_network("acme", now).await;
    let invitation = fx.invitation(&network, None, None, true, now).await;

    let future = json!({ "version": 2, "op": "CLAIM", "claim": invitation.id, "name": "site-a" });
    let response = dispatch(&fx.sync(), &future).await;

    assert_eq!(response.status_code(), 400);
    assert_eq!(wire(&response).as_object().unwrap().len(), 2);
    assert_eq!(fx.stored_invitation(invitation.id).await.instance_count, 0);
}

#[tokio::test]
async fn test_unknown_op_is_rejected() {
    let fx = Fixture::new(Utc::now()).await;

    let response = dispatch(&fx.sync(), &json!({ "version": 1, "op": "PING" })).await;

    assert_eq!(response.status_code(), 400);
}

#[tokio::test]
async fn test_store_fault_is_internal_error() {
    let fx = Fixture::new(Utc::now()).await;

    fx.store.fail_next("record_heartbeat").await;
    let heartbeat = json!({ "version": 1, "op": "HB", "site": Uuid::new_v4() });

    assert_eq!(dispatch(&fx.sync(), &heartbeat).await.status_code(), 500);
}
