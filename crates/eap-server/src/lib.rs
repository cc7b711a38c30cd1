//! EAP Authenticator Engine
//!
//! Terminates EAP conversations started by peers, drives EAP-AKA to a
//! Success or Failure decision, and releases the subscriber attributes
//! (identity, MSISDN, MSK) bound to a successful session.
//!
//! # Example
//!
//! ```rust,no_run
//! use eap_proto::EapPacket;
//! use eap_server::{Config, EapContext, EapMessage, EapService};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::example();
//! let service = EapService::with_static_authority(&config)?;
//! let _sweeper = service.spawn_sweeper();
//!
//! let identity = EapPacket::identity_response(0, "0001010000000001@wlan.mnc001.mcc001.3gppnetwork.org");
//! let reply = service
//!     .handle(EapMessage::new(identity.to_bytes()?, EapContext::new()))
//!     .await?;
//!
//! // Thread reply.ctx back with the peer's next packet
//! println!("session {:?}", reply.ctx.session_id);
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod authority;
pub mod config;
pub mod dispatcher;
pub mod method;
pub mod service;
pub mod session;

pub use audit::{AuditEntry, AuditEventType, AuditLogger};
pub use authority::{
    AuthVectors, AuthorityError, CredentialAuthority, ResyncInfo, StaticCredentialAuthority,
};
pub use config::{AkaConfig, Config, ConfigError, SubscriberConfig};
pub use dispatcher::{Dispatcher, EngineError, Outcome, Transition};
pub use method::{
    AkaMethod, AkaMethodState, Challenge, EapMethod, Identity, MethodError, MethodState,
    Verification,
};
pub use service::{EapContext, EapMessage, EapService, ExpirySettings, HandleError, ServiceError};
pub use session::{
    MemorySessionStore, RandomSessionIdGenerator, ResultAttributes, SessionContext, SessionId,
    SessionIdGenerator, SessionState, SessionStats, SessionStore, SessionSweeper, SessionUpdate,
    StoreError,
};
