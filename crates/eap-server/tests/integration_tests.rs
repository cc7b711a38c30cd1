//! Integration tests for the EAP authenticator
//!
//! These tests drive `EapService::handle` end to end with a simulated peer:
//! - Full EAP-AKA authentication (success and failure)
//! - Identifier checks and retransmission
//! - Resynchronization
//! - Credential authority outages and retry on the same session
//! - Session expiry
//! - Concurrent use of one session
//! - Audit logging

use eap_proto::{
    AkaAttribute, AkaKeys, AkaMessage, AkaSubtype, EapCode, EapPacket, EapType,
};
use eap_server::{
    AuditEntry, AuditEventType, AuthVectors, Config, EapContext, EapMessage, EapService,
    EngineError, SessionId, SessionState, StaticCredentialAuthority, StoreError,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;

const IDENTITY: &str = "IMSI001";
const MSISDN: &str = "5551234";

fn vectors() -> AuthVectors {
    AuthVectors {
        rand: hex_16("23553cbe9637a89d218ae64dae47bf35"),
        autn: hex_16("55f328b43577b9b94a9ffac354dfafb3"),
        xres: hex::decode("a54211d5e3ba50bf").unwrap(),
        ck: hex_16("b40ba9a3c58b2a05bbf0d987b21bf8cb"),
        ik: hex_16("f769bcd751044604127672711c6d3441"),
        msisdn: Some(MSISDN.to_string()),
    }
}

fn hex_16(s: &str) -> [u8; 16] {
    hex::decode(s).unwrap().try_into().unwrap()
}

fn authority() -> Arc<StaticCredentialAuthority> {
    Arc::new(StaticCredentialAuthority::new().with_subscriber(IDENTITY, vectors()))
}

fn service_with(config: &Config, authority: Arc<StaticCredentialAuthority>) -> EapService {
    EapService::from_config(config, authority).expect("Failed to build service")
}

/// Simulated peer holding the same CK/IK as the credential authority
struct Peer {
    keys: AkaKeys,
}

impl Peer {
    fn new() -> Self {
        let v = vectors();
        Peer {
            keys: AkaKeys::derive(IDENTITY.as_bytes(), &v.ik, &v.ck),
        }
    }

    fn identity(&self, identifier: u8) -> Vec<u8> {
        EapPacket::identity_response(identifier, IDENTITY)
            .to_bytes()
            .unwrap()
    }

    fn challenge_response(&self, identifier: u8, res: &[u8]) -> Vec<u8> {
        AkaMessage::new(AkaSubtype::Challenge)
            .with_attribute(AkaAttribute::res(res).unwrap())
            .seal(EapCode::Response, identifier, &self.keys.k_aut)
            .unwrap()
            .to_bytes()
            .unwrap()
    }

    fn sync_failure(&self, identifier: u8) -> Vec<u8> {
        AkaMessage::new(AkaSubtype::SynchronizationFailure)
            .with_attribute(AkaAttribute::auts(&[0x5C; 14]))
            .to_packet(EapCode::Response, identifier)
            .to_bytes()
            .unwrap()
    }
}

fn decode(message: &EapMessage) -> EapPacket {
    EapPacket::from_bytes(&message.payload).expect("reply must decode")
}

#[tokio::test]
async fn test_full_aka_authentication() {
    let service = service_with(&Config::default(), authority());
    let peer = Peer::new();

    // Scenario A: Identity Response without a token opens a session
    let reply = service
        .handle(EapMessage::new(peer.identity(0), EapContext::new()))
        .await
        .unwrap();
    let challenge = decode(&reply);
    assert_eq!(challenge.code, EapCode::Request);
    assert_eq!(challenge.eap_type, Some(EapType::Aka));
    assert_eq!(challenge.identifier, 1);
    let session_id = reply.ctx.session_id.clone().expect("session id");

    let message = AkaMessage::from_packet(&challenge).unwrap();
    assert_eq!(message.rand(), Some(vectors().rand));
    assert!(eap_proto::verify_mac(&challenge, &peer.keys.k_aut).unwrap());

    // Scenario B: correct response concludes with Success
    let reply = service
        .handle(EapMessage::new(
            peer.challenge_response(1, &vectors().xres),
            reply.ctx,
        ))
        .await
        .unwrap();
    let success = decode(&reply);
    assert_eq!(success, EapPacket::success(1));
    assert_eq!(success.to_bytes().unwrap(), vec![3, 1, 0, 4]);

    assert_eq!(reply.ctx.session_id.as_ref(), Some(&session_id));
    assert_eq!(reply.ctx.msisdn.as_deref(), Some(MSISDN));
    assert_eq!(reply.ctx.identity.as_deref(), Some(IDENTITY));
    assert_eq!(reply.ctx.msk.as_deref(), Some(&peer.keys.msk[..]));

    let session = service.store().resolve(&session_id).await.unwrap();
    assert_eq!(session.state, SessionState::Success);
}

#[tokio::test]
async fn test_wrong_response_fails_session() {
    let service = service_with(&Config::default(), authority());
    let peer = Peer::new();

    let reply = service
        .handle(EapMessage::new(peer.identity(0), EapContext::new()))
        .await
        .unwrap();
    let session_id = reply.ctx.session_id.clone().unwrap();

    // Scenario C
    let reply = service
        .handle(EapMessage::new(
            peer.challenge_response(1, &[0u8; 8]),
            reply.ctx,
        ))
        .await
        .unwrap();
    assert_eq!(decode(&reply), EapPacket::failure(1));
    assert!(reply.ctx.msk.is_none());
    assert!(reply.ctx.msisdn.is_none());

    let session = service.store().resolve(&session_id).await.unwrap();
    assert_eq!(session.state, SessionState::Failure);
}

#[tokio::test]
async fn test_challenge_response_without_identity_is_rejected() {
    let service = service_with(&Config::default(), authority());
    let peer = Peer::new();

    let err = service
        .handle(EapMessage::new(
            peer.challenge_response(1, &vectors().xres),
            EapContext::new(),
        ))
        .await
        .unwrap_err();
    assert_eq!(err.kind, EngineError::SessionNotFound);
    assert!(service.store().is_empty().await);
}

#[tokio::test]
async fn test_identifier_mismatch_leaves_session_unchanged() {
    let service = service_with(&Config::default(), authority());
    let peer = Peer::new();

    let reply = service
        .handle(EapMessage::new(peer.identity(0), EapContext::new()))
        .await
        .unwrap();
    let ctx = reply.ctx.clone();
    let session_id = ctx.session_id.clone().unwrap();
    let before = service.store().resolve(&session_id).await.unwrap();

    let err = service
        .handle(EapMessage::new(
            peer.challenge_response(9, &vectors().xres),
            ctx.clone(),
        ))
        .await
        .unwrap_err();
    assert_eq!(
        err.kind,
        EngineError::IdentifierMismatch {
            expected: 1,
            received: 9
        }
    );
    assert!(err.is_protocol_error());
    assert_eq!(err.session_id.as_ref(), Some(&session_id));

    let after = service.store().resolve(&session_id).await.unwrap();
    assert_eq!(after.version, before.version);
    assert_eq!(after.state, SessionState::AwaitingChallengeResponse);

    // The correct answer still works afterwards
    let reply = service
        .handle(EapMessage::new(peer.challenge_response(1, &vectors().xres), ctx))
        .await
        .unwrap();
    assert_eq!(decode(&reply).code, EapCode::Success);
}

#[tokio::test]
async fn test_retransmitted_identity_gets_same_challenge() {
    let authority = authority();
    let service = service_with(&Config::default(), authority.clone());
    let peer = Peer::new();

    let first = service
        .handle(EapMessage::new(peer.identity(0), EapContext::new()))
        .await
        .unwrap();
    let session_id = first.ctx.session_id.clone().unwrap();
    let before = service.store().resolve(&session_id).await.unwrap();

    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = service
        .handle(EapMessage::new(peer.identity(0), first.ctx.clone()))
        .await
        .unwrap();

    assert_eq!(first.payload, second.payload);
    assert_eq!(first.ctx.session_id, second.ctx.session_id);
    assert_eq!(authority.lookup_count(), 1);

    // The retransmit keeps the session alive without changing it
    let after = service.store().resolve(&session_id).await.unwrap();
    assert_eq!(after.state, SessionState::AwaitingChallengeResponse);
    assert_eq!(after.last_identifier, before.last_identifier);
    assert_eq!(after.version, before.version + 1);
    assert!(after.last_activity > before.last_activity);

    // The challenge issued first is still answerable
    let reply = service
        .handle(EapMessage::new(peer.challenge_response(1, &vectors().xres), second.ctx))
        .await
        .unwrap();
    assert_eq!(decode(&reply).code, EapCode::Success);
}

#[tokio::test]
async fn test_sync_failure_triggers_single_rechallenge() {
    let authority = authority();
    let service = service_with(&Config::default(), authority.clone());
    let peer = Peer::new();

    let reply = service
        .handle(EapMessage::new(peer.identity(0), EapContext::new()))
        .await
        .unwrap();

    let reply = service
        .handle(EapMessage::new(peer.sync_failure(1), reply.ctx))
        .await
        .unwrap();
    let rechallenge = decode(&reply);
    assert_eq!(rechallenge.code, EapCode::Request);
    assert_eq!(rechallenge.identifier, 2);
    assert_eq!(authority.resync_count(), 1);

    // Second sync failure exceeds the default limit of one
    let reply = service
        .handle(EapMessage::new(peer.sync_failure(2), reply.ctx))
        .await
        .unwrap();
    assert_eq!(decode(&reply), EapPacket::failure(2));
    assert_eq!(authority.resync_count(), 1);
}

#[tokio::test]
async fn test_resync_then_success() {
    let service = service_with(&Config::default(), authority());
    let peer = Peer::new();

    let reply = service
        .handle(EapMessage::new(peer.identity(0), EapContext::new()))
        .await
        .unwrap();
    let reply = service
        .handle(EapMessage::new(peer.sync_failure(1), reply.ctx))
        .await
        .unwrap();
    let reply = service
        .handle(EapMessage::new(
            peer.challenge_response(2, &vectors().xres),
            reply.ctx,
        ))
        .await
        .unwrap();
    assert_eq!(decode(&reply), EapPacket::success(2));
}

#[tokio::test]
async fn test_nak_fails_session() {
    let service = service_with(&Config::default(), authority());
    let peer = Peer::new();

    let reply = service
        .handle(EapMessage::new(peer.identity(0), EapContext::new()))
        .await
        .unwrap();
    let nak = EapPacket::nak(1, &[EapType::Tls]).to_bytes().unwrap();
    let reply = service
        .handle(EapMessage::new(nak, reply.ctx))
        .await
        .unwrap();
    assert_eq!(decode(&reply), EapPacket::failure(1));
}

#[tokio::test]
async fn test_terminal_session_rejects_further_packets() {
    let service = service_with(&Config::default(), authority());
    let peer = Peer::new();

    let reply = service
        .handle(EapMessage::new(peer.identity(0), EapContext::new()))
        .await
        .unwrap();
    let ctx = reply.ctx;
    service
        .handle(EapMessage::new(
            peer.challenge_response(1, &vectors().xres),
            ctx.clone(),
        ))
        .await
        .unwrap();

    let err = service
        .handle(EapMessage::new(
            peer.challenge_response(1, &vectors().xres),
            ctx.clone(),
        ))
        .await
        .unwrap_err();
    assert_eq!(
        err.kind,
        EngineError::SessionAlreadyTerminated(SessionState::Success)
    );

    let err = service
        .handle(EapMessage::new(peer.identity(0), ctx))
        .await
        .unwrap_err();
    assert!(matches!(err.kind, EngineError::SessionAlreadyTerminated(_)));
}

#[tokio::test]
async fn test_authority_outage_then_retry_on_same_session() {
    let authority = authority();
    let service = service_with(&Config::default(), authority.clone());
    let peer = Peer::new();

    // Scenario E
    authority.set_available(false);
    let err = service
        .handle(EapMessage::new(peer.identity(0), EapContext::new()))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    let session_id = err.session_id.clone().expect("session kept for retry");

    let session = service.store().resolve(&session_id).await.unwrap();
    assert_eq!(session.state, SessionState::AwaitingIdentity);
    assert_eq!(session.version, 0);

    authority.set_available(true);
    let reply = service
        .handle(EapMessage::new(peer.identity(0), err.retry_context()))
        .await
        .unwrap();
    assert_eq!(reply.ctx.session_id, Some(session_id));
    assert_eq!(decode(&reply).identifier, 1);
    assert_eq!(service.store().len().await, 1);
}

#[tokio::test]
async fn test_idle_session_expires_after_sweep() {
    let service = service_with(&Config::default(), authority());
    let peer = Peer::new();

    let reply = service
        .handle(EapMessage::new(peer.identity(0), EapContext::new()))
        .await
        .unwrap();
    let session_id = reply.ctx.session_id.clone().unwrap();

    // Scenario D
    tokio::time::sleep(Duration::from_millis(50)).await;
    let removed = service
        .store()
        .expire_older_than(Duration::from_millis(10))
        .await;
    assert_eq!(removed, 1);

    let err = service.store().resolve(&session_id).await.unwrap_err();
    assert_eq!(err, StoreError::NotFound(session_id));

    // Packets on the expired session are no longer accepted
    let err = service
        .handle(EapMessage::new(
            peer.challenge_response(1, &vectors().xres),
            reply.ctx,
        ))
        .await
        .unwrap_err();
    assert_eq!(err.kind, EngineError::SessionNotFound);
}

#[tokio::test]
async fn test_background_sweeper_removes_terminal_sessions() {
    let config = Config {
        sweep_interval_secs: 1,
        terminal_grace_secs: 0,
        ..Config::default()
    };
    let service = service_with(&config, authority());
    let peer = Peer::new();
    let _sweeper = service.spawn_sweeper();

    let reply = service
        .handle(EapMessage::new(peer.identity(0), EapContext::new()))
        .await
        .unwrap();
    let reply = service
        .handle(EapMessage::new(peer.challenge_response(1, &[0u8; 8]), reply.ctx))
        .await
        .unwrap();
    let session_id = reply.ctx.session_id.unwrap();
    assert_eq!(service.stats().await.failed, 1);

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(service.store().resolve(&session_id).await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_responses_on_one_session() {
    let service = Arc::new(service_with(&Config::default(), authority()));
    let peer = Arc::new(Peer::new());

    let reply = service
        .handle(EapMessage::new(peer.identity(0), EapContext::new()))
        .await
        .unwrap();
    let ctx = reply.ctx;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let service = Arc::clone(&service);
        let peer = Arc::clone(&peer);
        let ctx = ctx.clone();
        handles.push(tokio::spawn(async move {
            service
                .handle(EapMessage::new(
                    peer.challenge_response(1, &vectors().xres),
                    ctx,
                ))
                .await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(reply) => {
                assert_eq!(decode(&reply).code, EapCode::Success);
                successes += 1;
            }
            Err(e) => assert!(
                e.is_conflict()
                    || matches!(e.kind, EngineError::SessionAlreadyTerminated(_)),
                "unexpected error: {}",
                e
            ),
        }
    }
    assert_eq!(successes, 1);
}

#[tokio::test]
async fn test_unknown_token_gets_fresh_session() {
    let service = service_with(&Config::default(), authority());
    let peer = Peer::new();

    let ctx = EapContext::with_session_id(SessionId::new("caller-invented"));
    let reply = service
        .handle(EapMessage::new(peer.identity(0), ctx))
        .await
        .unwrap();
    let session_id = reply.ctx.session_id.unwrap();
    assert_ne!(session_id.as_str(), "caller-invented");
}

#[tokio::test]
async fn test_malformed_payloads_rejected() {
    let service = service_with(&Config::default(), authority());

    for payload in [
        vec![],
        vec![2, 0, 0, 9, 1],        // length longer than packet
        vec![2, 0, 0, 5, 1, 0x41],  // length shorter than packet
        vec![7, 0, 0, 4],           // unknown code
        vec![2, 0, 0, 5, 99],       // unknown type
    ] {
        let err = service
            .handle(EapMessage::new(payload.clone(), EapContext::new()))
            .await
            .unwrap_err();
        assert!(
            matches!(err.kind, EngineError::MalformedPacket(_)),
            "payload {:?} gave {}",
            payload,
            err
        );
    }
    assert!(service.store().is_empty().await);
}

#[tokio::test]
async fn test_rejected_identity_opens_no_session() {
    let config = Config {
        max_sessions: 3,
        ..Config::default()
    };
    let service = service_with(&config, authority());

    for _ in 0..3 {
        let payload = EapPacket::identity_response(0, "user name").to_bytes().unwrap();
        let err = service
            .handle(EapMessage::new(payload, EapContext::new()))
            .await
            .unwrap_err();
        assert!(err.is_protocol_error());
        assert!(err.session_id.is_none());
    }
    assert!(service.store().is_empty().await);

    // Capacity is still available for a well-formed identity
    let reply = service
        .handle(EapMessage::new(Peer::new().identity(0), EapContext::new()))
        .await
        .unwrap();
    assert!(reply.ctx.session_id.is_some());
    assert_eq!(service.store().len().await, 1);
}

#[tokio::test]
async fn test_audit_log_records_conversation() {
    let audit_file = NamedTempFile::new().unwrap();
    let config = Config {
        audit_log_path: Some(audit_file.path().to_str().unwrap().to_string()),
        ..Config::default()
    };
    let service = service_with(&config, authority());
    let peer = Peer::new();

    let reply = service
        .handle(EapMessage::new(peer.identity(0), EapContext::new()))
        .await
        .unwrap();
    service
        .handle(EapMessage::new(
            peer.challenge_response(1, &vectors().xres),
            reply.ctx.clone(),
        ))
        .await
        .unwrap();
    let _ = service
        .handle(EapMessage::new(peer.identity(0), reply.ctx))
        .await;

    let contents = std::fs::read_to_string(audit_file.path()).unwrap();
    let events: Vec<AuditEventType> = contents
        .lines()
        .map(|line| serde_json::from_str::<AuditEntry>(line).unwrap().event_type)
        .collect();
    assert_eq!(
        events,
        vec![
            AuditEventType::AuthAttempt,
            AuditEventType::AuthSuccess,
            AuditEventType::ProtocolReject,
        ]
    );

    let success: AuditEntry = serde_json::from_str(contents.lines().nth(1).unwrap()).unwrap();
    assert_eq!(success.msisdn.as_deref(), Some(MSISDN));
    assert_eq!(success.identity.as_deref(), Some(IDENTITY));
}

#[tokio::test]
async fn test_service_from_config_file() {
    let config_file = NamedTempFile::new().unwrap();
    Config::example().to_file(config_file.path()).unwrap();

    let mut config = Config::from_file(config_file.path()).unwrap();
    config.audit_log_path = None;
    let service = EapService::with_static_authority(&config).unwrap();

    let identity = EapPacket::identity_response(
        3,
        "0001010000000001@wlan.mnc001.mcc001.3gppnetwork.org",
    );
    let reply = service
        .handle(EapMessage::new(identity.to_bytes().unwrap(), EapContext::new()))
        .await
        .unwrap();
    assert_eq!(decode(&reply).identifier, 4);
}
