//! EAP method plugins
//!
//! A method plugin knows how to turn a peer identity into a challenge and
//! how to judge the peer's answer. It keeps whatever it needs between the
//! two steps in a [`MethodState`] that the engine stores in the session
//! and hands back unchanged.

pub mod aka;

pub use aka::{AkaMethod, AkaMethodState};

use async_trait::async_trait;
use eap_proto::{EapPacket, EapType};
use thiserror::Error;

use crate::session::ResultAttributes;

/// Peer identity as understood by a method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Identity exactly as the peer sent it
    pub nai: String,
    /// Key used to look the subscriber up
    pub key: String,
}

/// Method-private state kept in the session between packets
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MethodState {
    /// No method state yet (or already discarded)
    #[default]
    None,
    /// EAP-AKA state
    Aka(AkaMethodState),
}

/// A Request to send to the peer plus the state needed to check its answer
#[derive(Debug, Clone)]
pub struct Challenge {
    pub payload: EapPacket,
    pub method_state: MethodState,
}

/// Outcome of checking a method response
#[derive(Debug, Clone)]
pub enum Verification {
    /// Peer proved possession of the credential
    Authenticated(ResultAttributes),
    /// Peer failed (or refused) authentication
    AuthFailed(String),
    /// Another round is needed, e.g. after AKA resynchronization
    Rechallenge(Challenge),
}

/// Method plugin errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MethodError {
    #[error("Malformed identity: {0}")]
    MalformedIdentity(String),

    #[error("Identity not found: {0}")]
    IdentityNotFound(String),

    #[error("Credential authority unavailable: {0}")]
    CredentialAuthorityUnavailable(String),

    #[error("Malformed method response: {0}")]
    MalformedResponse(String),

    #[error("Session holds no {0} state")]
    MissingState(EapType),

    #[error("Failed to build method request: {0}")]
    Encoding(String),
}

impl MethodError {
    /// The peer sent something that violates the method protocol
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            MethodError::MalformedIdentity(_) | MethodError::MalformedResponse(_)
        )
    }

    /// A dependency failed; the same packet may succeed later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MethodError::IdentityNotFound(_) | MethodError::CredentialAuthorityUnavailable(_)
        )
    }
}

/// An EAP authentication method
///
/// Implementations are deterministic in their explicit inputs (apart from
/// what the credential authority returns) and only read the method state
/// they are given.
#[async_trait]
pub trait EapMethod: Send + Sync {
    /// EAP Type this plugin implements
    fn method_type(&self) -> EapType;

    /// Parse the Type-Data of an Identity Response
    fn extract_identity(&self, payload: &[u8]) -> Result<Identity, MethodError>;

    /// Build the first Request of the method, carrying `identifier`
    async fn generate_challenge(
        &self,
        identifier: u8,
        identity: &Identity,
    ) -> Result<Challenge, MethodError>;

    /// Check a method Response
    ///
    /// `next_identifier` is used if another Request has to be issued.
    /// A wrong answer is `Ok(Verification::AuthFailed(..))`, not an error.
    async fn verify_response(
        &self,
        response: &EapPacket,
        state: &MethodState,
        next_identifier: u8,
    ) -> Result<Verification, MethodError>;
}

/// Common identity checks: UTF-8, non-empty, no whitespace or control characters
pub(crate) fn parse_nai(payload: &[u8]) -> Result<&str, MethodError> {
    let nai = std::str::from_utf8(payload)
        .map_err(|_| MethodError::MalformedIdentity("identity is not valid UTF-8".to_string()))?;

    if nai.is_empty() {
        return Err(MethodError::MalformedIdentity("identity is empty".to_string()));
    }
    if nai.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(MethodError::MalformedIdentity(
            "identity contains whitespace or control characters".to_string(),
        ));
    }
    Ok(nai)
}
