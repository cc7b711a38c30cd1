//! EAP state machine
//!
//! The dispatcher decides what to do with one inbound packet given the
//! current session snapshot. It never mutates anything: it returns the
//! reply to send and the session update to commit, and the caller does
//! the committing.
//!
//! | State                     | Inbound                          | Result                        |
//! |---------------------------|----------------------------------|-------------------------------|
//! | AwaitingIdentity          | Response/Identity                | challenge, id = inbound + 1   |
//! | AwaitingChallengeResponse | Response/method, matching id     | Success, Failure, rechallenge |
//! | AwaitingChallengeResponse | Response/Identity, opening id    | retransmit last Request       |
//! | AwaitingChallengeResponse | Response/Nak, matching id        | Failure                       |
//! | Success / Failure         | anything                         | rejected                      |

use eap_proto::{EapCode, EapError, EapPacket, EapType};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::method::{EapMethod, Identity, MethodError, MethodState, Verification};
use crate::session::{SessionContext, SessionState, SessionUpdate, StoreError};

/// Why a packet could not advance a session
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Malformed packet: {0}")]
    MalformedPacket(#[from] EapError),

    #[error("Unexpected {code:?} packet (type {eap_type:?}) in state {state}")]
    UnexpectedPacket {
        state: SessionState,
        code: EapCode,
        eap_type: Option<EapType>,
    },

    #[error("Identifier mismatch: expected {expected}, received {received}")]
    IdentifierMismatch { expected: u8, received: u8 },

    #[error("Session already terminated ({0})")]
    SessionAlreadyTerminated(SessionState),

    #[error("No session for this conversation")]
    SessionNotFound,

    #[error("No plugin registered for {0}")]
    UnsupportedMethod(EapType),

    #[error(transparent)]
    Method(#[from] MethodError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    /// The peer sent something the protocol does not allow here
    pub fn is_protocol_error(&self) -> bool {
        match self {
            EngineError::MalformedPacket(e) => e.is_malformed(),
            EngineError::UnexpectedPacket { .. }
            | EngineError::IdentifierMismatch { .. }
            | EngineError::SessionAlreadyTerminated(_)
            | EngineError::SessionNotFound => true,
            EngineError::Method(e) => e.is_protocol_error(),
            _ => false,
        }
    }

    /// A dependency failed; the caller may resend the same packet on the same session
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Method(e) => e.is_retryable(),
            EngineError::Store(StoreError::CapacityExceeded(_)) => true,
            _ => false,
        }
    }

    /// Another request advanced the session first
    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::Store(e) if e.is_stale())
    }
}

/// What a transition did, for logging and audit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A new Request was issued
    Challenge,
    /// The previous Request was sent again
    Retransmit,
    /// Authentication succeeded
    Success,
    /// Authentication failed
    Failure { reason: String },
}

/// Result of dispatching one packet
#[derive(Debug, Clone)]
pub struct Transition {
    /// Packet to send back to the peer
    pub reply: EapPacket,
    /// Session change to commit, `None` when nothing changes
    pub update: Option<SessionUpdate>,
    pub outcome: Outcome,
}

/// Routes packets to method plugins according to session state
pub struct Dispatcher {
    methods: HashMap<EapType, Arc<dyn EapMethod>>,
    default_method: EapType,
}

impl Dispatcher {
    /// Create a dispatcher whose new sessions use `default_method`
    pub fn new(default_method: Arc<dyn EapMethod>) -> Self {
        let method_type = default_method.method_type();
        let mut methods: HashMap<EapType, Arc<dyn EapMethod>> = HashMap::new();
        methods.insert(method_type, default_method);
        Dispatcher {
            methods,
            default_method: method_type,
        }
    }

    /// Register an additional method plugin
    pub fn with_method(mut self, method: Arc<dyn EapMethod>) -> Self {
        self.methods.insert(method.method_type(), method);
        self
    }

    /// Method assigned to new sessions
    pub fn default_method(&self) -> EapType {
        self.default_method
    }

    pub fn method(&self, method_type: EapType) -> Option<&Arc<dyn EapMethod>> {
        self.methods.get(&method_type)
    }

    fn plugin(&self, method_type: EapType) -> Result<&Arc<dyn EapMethod>, EngineError> {
        self.method(method_type)
            .ok_or(EngineError::UnsupportedMethod(method_type))
    }

    /// Check that `packet` is an Identity Response the default method accepts
    ///
    /// Used before a session is opened, so a rejected identity never
    /// occupies the store.
    pub fn validate_identity(&self, packet: &EapPacket) -> Result<Identity, EngineError> {
        if !packet.is_response_of(EapType::Identity) {
            return Err(EngineError::UnexpectedPacket {
                state: SessionState::AwaitingIdentity,
                code: packet.code,
                eap_type: packet.eap_type,
            });
        }
        let method = self.plugin(self.default_method)?;
        Ok(method.extract_identity(&packet.data)?)
    }

    /// Decide the reply and session update for `packet` against `session`
    pub async fn dispatch(
        &self,
        packet: &EapPacket,
        session: &SessionContext,
    ) -> Result<Transition, EngineError> {
        if session.state.is_terminal() {
            return Err(EngineError::SessionAlreadyTerminated(session.state));
        }
        if packet.code != EapCode::Response {
            return Err(unexpected(packet, session));
        }

        match session.state {
            SessionState::AwaitingIdentity => self.on_identity(packet, session).await,
            SessionState::AwaitingChallengeResponse => self.on_method_response(packet, session).await,
            SessionState::Success | SessionState::Failure => {
                Err(EngineError::SessionAlreadyTerminated(session.state))
            }
        }
    }

    async fn on_identity(
        &self,
        packet: &EapPacket,
        session: &SessionContext,
    ) -> Result<Transition, EngineError> {
        if packet.eap_type != Some(EapType::Identity) {
            return Err(unexpected(packet, session));
        }

        let method = self.plugin(session.method)?;
        let identity = method.extract_identity(&packet.data)?;
        let challenge_id = packet.identifier.wrapping_add(1);
        let challenge = method.generate_challenge(challenge_id, &identity).await?;

        debug!(
            session_id = %session.session_id,
            identity = %identity.nai,
            identifier = challenge_id,
            method = %session.method,
            "Identity accepted, challenge issued"
        );

        let update = SessionUpdate {
            state: SessionState::AwaitingChallengeResponse,
            last_identifier: challenge.payload.identifier,
            method_state: challenge.method_state,
            identity_identifier: Some(packet.identifier),
            last_request: Some(challenge.payload.clone()),
            result_attributes: None,
        };

        Ok(Transition {
            reply: challenge.payload,
            update: Some(update),
            outcome: Outcome::Challenge,
        })
    }

    async fn on_method_response(
        &self,
        packet: &EapPacket,
        session: &SessionContext,
    ) -> Result<Transition, EngineError> {
        // A peer that missed our challenge resends its Identity Response
        if packet.eap_type == Some(EapType::Identity) {
            return match (&session.last_request, session.identity_identifier) {
                (Some(last), Some(id)) if id == packet.identifier => {
                    debug!(
                        session_id = %session.session_id,
                        identifier = last.identifier,
                        "Retransmitting last request"
                    );
                    Ok(Transition {
                        reply: last.clone(),
                        // Commit the unchanged session so the retransmit counts as activity
                        update: Some(SessionUpdate::unchanged(session)),
                        outcome: Outcome::Retransmit,
                    })
                }
                _ => Err(unexpected(packet, session)),
            };
        }

        if packet.identifier != session.last_identifier {
            return Err(EngineError::IdentifierMismatch {
                expected: session.last_identifier,
                received: packet.identifier,
            });
        }

        if packet.eap_type == Some(EapType::Nak) {
            // Only one method is offered per session
            return Ok(fail(
                packet,
                session,
                format!("peer refused {} (Nak {:?})", session.method, packet.data),
            ));
        }

        if packet.eap_type != Some(session.method) {
            return Err(unexpected(packet, session));
        }

        let method = self.plugin(session.method)?;
        let next_identifier = packet.identifier.wrapping_add(1);
        let verification = method
            .verify_response(packet, &session.method_state, next_identifier)
            .await?;

        match verification {
            Verification::Authenticated(attributes) => {
                info!(
                    session_id = %session.session_id,
                    identity = %attributes.identity,
                    method = %session.method,
                    "Authentication succeeded"
                );
                let update = SessionUpdate {
                    state: SessionState::Success,
                    last_identifier: session.last_identifier,
                    method_state: MethodState::None,
                    identity_identifier: session.identity_identifier,
                    last_request: None,
                    result_attributes: Some(attributes),
                };
                Ok(Transition {
                    reply: EapPacket::success(packet.identifier),
                    update: Some(update),
                    outcome: Outcome::Success,
                })
            }
            Verification::AuthFailed(reason) => Ok(fail(packet, session, reason)),
            Verification::Rechallenge(challenge) => {
                debug!(
                    session_id = %session.session_id,
                    identifier = challenge.payload.identifier,
                    "Method requested another round"
                );
                let update = SessionUpdate {
                    state: SessionState::AwaitingChallengeResponse,
                    last_identifier: challenge.payload.identifier,
                    method_state: challenge.method_state,
                    identity_identifier: session.identity_identifier,
                    last_request: Some(challenge.payload.clone()),
                    result_attributes: None,
                };
                Ok(Transition {
                    reply: challenge.payload,
                    update: Some(update),
                    outcome: Outcome::Challenge,
                })
            }
        }
    }
}

fn unexpected(packet: &EapPacket, session: &SessionContext) -> EngineError {
    EngineError::UnexpectedPacket {
        state: session.state,
        code: packet.code,
        eap_type: packet.eap_type,
    }
}

fn fail(packet: &EapPacket, session: &SessionContext, reason: String) -> Transition {
    info!(
        session_id = %session.session_id,
        method = %session.method,
        reason = %reason,
        "Authentication failed"
    );
    let update = SessionUpdate {
        state: SessionState::Failure,
        last_identifier: session.last_identifier,
        method_state: MethodState::None,
        identity_identifier: session.identity_identifier,
        last_request: None,
        result_attributes: None,
    };
    Transition {
        reply: EapPacket::failure(packet.identifier),
        update: Some(update),
        outcome: Outcome::Failure { reason },
    }
}
