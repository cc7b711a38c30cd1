//! EAP service front
//!
//! [`EapService::handle`] is the single entry point: it decodes the
//! packet, finds (or opens) the session named by the caller's context,
//! runs the dispatcher and commits the result. The returned context must
//! be passed back unchanged with the next packet of the conversation.

use eap_proto::{EapPacket, EapType};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::audit::{AuditEntry, AuditEventType, AuditLogger};
use crate::authority::{CredentialAuthority, StaticCredentialAuthority};
use crate::config::{Config, ConfigError};
use crate::dispatcher::{Dispatcher, EngineError, Outcome};
use crate::method::AkaMethod;
use crate::session::{
    MemorySessionStore, SessionContext, SessionId, SessionState, SessionStats, SessionStore,
    SessionSweeper, StoreError,
};

/// Conversation context threaded through the caller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EapContext {
    /// Session token; `None` starts a new conversation
    ///
    /// A token the store does not know is never adopted. If the packet is
    /// an Identity Response a new session is opened under a freshly
    /// generated id, which replaces the token in the returned context.
    pub session_id: Option<SessionId>,
    /// Authenticated identity, set on Success
    pub identity: Option<String>,
    /// Subscriber MSISDN, set on Success when known
    pub msisdn: Option<String>,
    /// Master Session Key, set on Success
    pub msk: Option<Vec<u8>>,
}

impl EapContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session_id(session_id: SessionId) -> Self {
        EapContext {
            session_id: Some(session_id),
            ..Self::default()
        }
    }
}

/// One EAP packet plus its conversation context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EapMessage {
    /// Encoded EAP packet
    pub payload: Vec<u8>,
    pub ctx: EapContext,
}

impl EapMessage {
    pub fn new(payload: Vec<u8>, ctx: EapContext) -> Self {
        EapMessage { payload, ctx }
    }

    /// Decode the payload
    pub fn packet(&self) -> Result<EapPacket, EngineError> {
        Ok(EapPacket::from_bytes(&self.payload)?)
    }
}

/// Failure of a `handle` call
///
/// `session_id` names the session the packet was applied to, when there is
/// one, so a retryable failure can be retried on the same session.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{kind}")]
pub struct HandleError {
    pub session_id: Option<SessionId>,
    pub kind: EngineError,
}

impl HandleError {
    fn new(session_id: Option<SessionId>, kind: EngineError) -> Self {
        HandleError { session_id, kind }
    }

    pub fn is_protocol_error(&self) -> bool {
        self.kind.is_protocol_error()
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    pub fn is_conflict(&self) -> bool {
        self.kind.is_conflict()
    }

    /// Context to resend with when retrying
    pub fn retry_context(&self) -> EapContext {
        match &self.session_id {
            Some(id) => EapContext::with_session_id(id.clone()),
            None => EapContext::new(),
        }
    }
}

/// Errors building a service from configuration
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Failed to open audit log: {0}")]
    Audit(#[from] std::io::Error),
}

/// Expiry settings used by the sweeper
#[derive(Debug, Clone, Copy)]
pub struct ExpirySettings {
    pub idle_timeout: std::time::Duration,
    pub terminal_grace: std::time::Duration,
    pub sweep_interval: std::time::Duration,
}

impl From<&Config> for ExpirySettings {
    fn from(config: &Config) -> Self {
        ExpirySettings {
            idle_timeout: config.session_idle_timeout(),
            terminal_grace: config.terminal_grace(),
            sweep_interval: config.sweep_interval(),
        }
    }
}

/// The EAP authenticator
pub struct EapService {
    store: Arc<dyn SessionStore>,
    dispatcher: Dispatcher,
    audit: AuditLogger,
    expiry: ExpirySettings,
}

impl EapService {
    /// Assemble a service from its parts
    pub fn new(
        store: Arc<dyn SessionStore>,
        dispatcher: Dispatcher,
        audit: AuditLogger,
        expiry: ExpirySettings,
    ) -> Self {
        EapService {
            store,
            dispatcher,
            audit,
            expiry,
        }
    }

    /// Wire store, dispatcher, AKA plugin and audit log from `config`
    pub fn from_config(
        config: &Config,
        authority: Arc<dyn CredentialAuthority>,
    ) -> Result<Self, ServiceError> {
        config.validate()?;

        let method = AkaMethod::new(authority).with_max_resync_attempts(config.aka.max_resync_attempts);
        let dispatcher = Dispatcher::new(Arc::new(method));
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new(config.max_sessions));
        let audit = AuditLogger::new(config.audit_log_path.clone())?;

        Ok(Self::new(store, dispatcher, audit, ExpirySettings::from(config)))
    }

    /// Like [`from_config`](Self::from_config), serving the subscribers listed in `config`
    pub fn with_static_authority(config: &Config) -> Result<Self, ServiceError> {
        let authority = StaticCredentialAuthority::from_config(&config.subscribers)?;
        Self::from_config(config, Arc::new(authority))
    }

    /// Start the background expiry task; it stops when the returned handle is dropped
    pub fn spawn_sweeper(&self) -> SessionSweeper {
        SessionSweeper::spawn(
            Arc::clone(&self.store),
            self.expiry.sweep_interval,
            self.expiry.idle_timeout,
            self.expiry.terminal_grace,
        )
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub async fn stats(&self) -> SessionStats {
        self.store.stats().await
    }

    /// Process one EAP packet
    pub async fn handle(&self, message: EapMessage) -> Result<EapMessage, HandleError> {
        let EapMessage { payload, ctx } = message;

        let packet = match EapPacket::from_bytes(&payload) {
            Ok(packet) => packet,
            Err(e) => {
                return Err(self
                    .reject(ctx.session_id, None, EngineError::MalformedPacket(e))
                    .await)
            }
        };

        let session = self.open_session(&packet, ctx.session_id).await?;
        let session_id = session.session_id.clone();

        debug!(
            session_id = %session_id,
            code = ?packet.code,
            eap_type = ?packet.eap_type,
            identifier = packet.identifier,
            state = %session.state,
            "Handling EAP packet"
        );

        let transition = match self.dispatcher.dispatch(&packet, &session).await {
            Ok(transition) => transition,
            Err(e) => return Err(self.reject(Some(session_id), Some(&packet), e).await),
        };

        let reply = match transition.reply.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                return Err(self
                    .reject(Some(session_id), Some(&packet), EngineError::MalformedPacket(e))
                    .await)
            }
        };

        let committed = match transition.update {
            Some(update) => match self.store.commit(&session_id, session.version, update).await {
                Ok(ctx) => ctx,
                Err(e) => {
                    return Err(self
                        .reject(Some(session_id), Some(&packet), EngineError::Store(e))
                        .await)
                }
            },
            None => session,
        };

        self.audit_outcome(&committed, &packet, &transition.outcome).await;

        Ok(EapMessage {
            payload: reply,
            ctx: context_for(&committed),
        })
    }

    /// Resolve the caller's session, or open one for an Identity Response
    async fn open_session(
        &self,
        packet: &EapPacket,
        session_id: Option<SessionId>,
    ) -> Result<SessionContext, HandleError> {
        if let Some(ref id) = session_id {
            match self.store.resolve(id).await {
                Ok(session) => return Ok(session),
                Err(StoreError::NotFound(_)) => {
                    debug!(session_id = %id, "Unknown session token");
                }
                Err(e) => {
                    return Err(self
                        .reject(session_id.clone(), Some(packet), EngineError::Store(e))
                        .await)
                }
            }
        }

        if !packet.is_response_of(EapType::Identity) {
            return Err(self
                .reject(session_id, Some(packet), EngineError::SessionNotFound)
                .await);
        }

        let identity = match self.dispatcher.validate_identity(packet) {
            Ok(identity) => identity,
            Err(e) => return Err(self.reject(None, Some(packet), e).await),
        };

        // Caller tokens are never adopted; the store allocates the id
        match self.store.create(self.dispatcher.default_method()).await {
            Ok(session) => {
                self.audit
                    .log(
                        AuditEntry::new(AuditEventType::AuthAttempt)
                            .with_session_id(&session.session_id)
                            .with_identity(identity.nai)
                            .with_eap_identifier(packet.identifier),
                    )
                    .await;
                Ok(session)
            }
            Err(e) => Err(self.reject(None, Some(packet), EngineError::Store(e)).await),
        }
    }

    /// Log and audit a failed `handle` call
    async fn reject(
        &self,
        session_id: Option<SessionId>,
        packet: Option<&EapPacket>,
        kind: EngineError,
    ) -> HandleError {
        let event = if kind.is_protocol_error() {
            AuditEventType::ProtocolReject
        } else {
            AuditEventType::DependencyFailure
        };

        let id_field = session_id
            .as_ref()
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        warn!(
            session_id = %id_field,
            identifier = ?packet.map(|p| p.identifier),
            retryable = kind.is_retryable(),
            conflict = kind.is_conflict(),
            error = %kind,
            "EAP packet rejected"
        );

        let mut entry = AuditEntry::new(event).with_details(kind.to_string());
        if let Some(ref id) = session_id {
            entry = entry.with_session_id(id);
        }
        if let Some(p) = packet {
            entry = entry.with_eap_identifier(p.identifier);
        }
        self.audit.log(entry).await;

        HandleError::new(session_id, kind)
    }

    async fn audit_outcome(&self, session: &SessionContext, packet: &EapPacket, outcome: &Outcome) {
        let entry = match outcome {
            Outcome::Success => {
                let mut entry = AuditEntry::new(AuditEventType::AuthSuccess);
                if let Some(ref attrs) = session.result_attributes {
                    entry = entry.with_identity(attrs.identity.clone());
                    if let Some(ref msisdn) = attrs.msisdn {
                        entry = entry.with_msisdn(msisdn.clone());
                    }
                }
                entry
            }
            Outcome::Failure { reason } => {
                AuditEntry::new(AuditEventType::AuthFailure).with_details(reason.clone())
            }
            Outcome::Challenge | Outcome::Retransmit => return,
        };
        self.audit
            .log(
                entry
                    .with_session_id(&session.session_id)
                    .with_eap_identifier(packet.identifier),
            )
            .await;
    }
}

/// Context handed back to the caller after a successful `handle`
fn context_for(session: &SessionContext) -> EapContext {
    let mut ctx = EapContext::with_session_id(session.session_id.clone());
    if session.state == SessionState::Success {
        if let Some(ref attrs) = session.result_attributes {
            ctx.identity = Some(attrs.identity.clone());
            ctx.msisdn = attrs.msisdn.clone();
            ctx.msk = Some(attrs.msk.clone());
        }
    }
    ctx
}
