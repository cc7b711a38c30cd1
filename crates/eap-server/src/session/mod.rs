//! EAP session tracking
//!
//! A session holds everything the authenticator remembers about one EAP
//! conversation between two packets. Sessions live in a [`SessionStore`],
//! which hands out snapshots and accepts replacements guarded by a version
//! counter (optimistic concurrency).
//!
//! # Lifecycle
//!
//! ```text
//! AwaitingIdentity -> AwaitingChallengeResponse -> Success
//!                                               \-> Failure
//! ```
//!
//! Sessions are created on the first Identity Response, advanced by
//! [`SessionStore::commit`], and removed by the sweeper once they are idle
//! past the timeout or terminal past the grace period.

pub mod error;
pub mod memory;
pub mod sweeper;

pub use error::StoreError;
pub use memory::MemorySessionStore;
pub use sweeper::{sweep_once, SessionSweeper, SweepReport};

use async_trait::async_trait;
use eap_proto::{EapPacket, EapType};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};

use crate::method::MethodState;

/// Opaque session token handed to callers
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        SessionId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Allocates session ids
///
/// Implementations must never hand out the same id twice within a process.
pub trait SessionIdGenerator: Send + Sync {
    fn generate(&self) -> SessionId;
}

/// Default id generator: process-wide counter followed by 64 random bits, hex encoded
#[derive(Debug, Default)]
pub struct RandomSessionIdGenerator {
    counter: AtomicU64,
}

impl RandomSessionIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionIdGenerator for RandomSessionIdGenerator {
    fn generate(&self) -> SessionId {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let nonce: u64 = rand::rng().random();
        SessionId(format!("{:016x}{:016x}", seq, nonce))
    }
}

/// EAP session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Waiting for the peer's Identity Response
    AwaitingIdentity,
    /// Challenge sent, waiting for the method response
    AwaitingChallengeResponse,
    /// Authentication succeeded
    Success,
    /// Authentication failed
    Failure,
}

impl SessionState {
    /// Success and Failure accept no further packets
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Success | SessionState::Failure)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::AwaitingIdentity => "awaiting_identity",
            SessionState::AwaitingChallengeResponse => "awaiting_challenge_response",
            SessionState::Success => "success",
            SessionState::Failure => "failure",
        };
        f.write_str(name)
    }
}

/// Subscriber attributes released on Success
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultAttributes {
    /// Identity the peer authenticated with
    pub identity: String,
    /// MSISDN from the credential authority, if known
    pub msisdn: Option<String>,
    /// Master Session Key for the access network
    pub msk: Vec<u8>,
}

impl fmt::Debug for ResultAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultAttributes")
            .field("identity", &self.identity)
            .field("msisdn", &self.msisdn)
            .field("msk_len", &self.msk.len())
            .finish()
    }
}

/// Snapshot of one EAP conversation
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: SessionId,
    /// Wall-clock creation time
    pub created_at: SystemTime,
    /// Last successful commit (or creation)
    pub last_activity: Instant,
    /// When the session reached Success or Failure
    pub terminated_at: Option<Instant>,
    /// Identifier of the last Request sent to the peer
    pub last_identifier: u8,
    pub state: SessionState,
    /// Method selected when the session was created
    pub method: EapType,
    /// Method-private state, owned by the method plugin
    pub method_state: MethodState,
    /// Identifier of the Identity Response that opened the challenge
    pub identity_identifier: Option<u8>,
    /// Last Request sent, kept for retransmission
    pub last_request: Option<EapPacket>,
    pub result_attributes: Option<ResultAttributes>,
    /// Bumped by every commit
    pub version: u64,
}

impl SessionContext {
    /// Fresh session waiting for an identity
    pub fn new(session_id: SessionId, method: EapType) -> Self {
        SessionContext {
            session_id,
            created_at: SystemTime::now(),
            last_activity: Instant::now(),
            terminated_at: None,
            last_identifier: 0,
            state: SessionState::AwaitingIdentity,
            method,
            method_state: MethodState::None,
            identity_identifier: None,
            last_request: None,
            result_attributes: None,
            version: 0,
        }
    }

    /// Time since the last commit
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    /// Apply an update in place, bumping version and activity
    pub fn apply(&mut self, update: SessionUpdate) {
        let now = Instant::now();
        if update.state.is_terminal() && !self.state.is_terminal() {
            self.terminated_at = Some(now);
        }
        self.state = update.state;
        self.last_identifier = update.last_identifier;
        self.method_state = update.method_state;
        self.identity_identifier = update.identity_identifier;
        self.last_request = update.last_request;
        self.result_attributes = update.result_attributes;
        self.last_activity = now;
        self.version += 1;
    }
}

/// Replacement for the mutable part of a [`SessionContext`]
#[derive(Debug, Clone)]
pub struct SessionUpdate {
    pub state: SessionState,
    pub last_identifier: u8,
    pub method_state: MethodState,
    pub identity_identifier: Option<u8>,
    pub last_request: Option<EapPacket>,
    pub result_attributes: Option<ResultAttributes>,
}

impl SessionUpdate {
    /// Update that leaves every field as it is in `ctx`
    pub fn unchanged(ctx: &SessionContext) -> Self {
        SessionUpdate {
            state: ctx.state,
            last_identifier: ctx.last_identifier,
            method_state: ctx.method_state.clone(),
            identity_identifier: ctx.identity_identifier,
            last_request: ctx.last_request.clone(),
            result_attributes: ctx.result_attributes.clone(),
        }
    }

    pub fn with_state(mut self, state: SessionState) -> Self {
        self.state = state;
        self
    }
}

/// Session store statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Total live sessions
    pub total: usize,
    pub awaiting_identity: usize,
    pub awaiting_challenge_response: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Configured capacity
    pub max_sessions: usize,
}

/// Storage for EAP sessions
///
/// Implementations must be safe to share between tasks. Every mutation of
/// an existing session goes through [`commit`](SessionStore::commit), which
/// only succeeds when the caller saw the latest version.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Look up a session by id
    async fn resolve(&self, session_id: &SessionId) -> Result<SessionContext, StoreError>;

    /// Create a session with a fresh id in `AwaitingIdentity`, version 0
    async fn create(&self, method: EapType) -> Result<SessionContext, StoreError>;

    /// Replace a session's mutable state if its version is still `expected_version`
    ///
    /// Returns the stored context after the update. Fails with
    /// `StaleSession` if another commit won or the session is gone.
    async fn commit(
        &self,
        session_id: &SessionId,
        expected_version: u64,
        update: SessionUpdate,
    ) -> Result<SessionContext, StoreError>;

    /// Remove sessions idle for longer than `idle`; returns how many were removed
    async fn expire_older_than(&self, idle: Duration) -> usize;

    /// Remove terminal sessions that terminated more than `grace` ago
    async fn expire_terminated(&self, grace: Duration) -> usize;

    /// Counts per state
    async fn stats(&self) -> SessionStats;

    /// Number of live sessions
    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
