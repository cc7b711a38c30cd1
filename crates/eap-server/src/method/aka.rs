//! EAP-AKA method plugin (RFC 4187, full authentication only)
//!
//! Flow handled here:
//!
//! 1. Identity Response -> look up a vector -> AKA-Challenge (AT_RAND, AT_AUTN, AT_MAC)
//! 2. AKA-Challenge response -> check AT_MAC and AT_RES -> Success / Failure
//!
//! AKA-Synchronization-Failure triggers a vector refetch with the peer's
//! AUTS and a new challenge, up to `max_resync_attempts` times per session.

use async_trait::async_trait;
use eap_proto::{verify_mac, AkaAttribute, AkaError, AkaKeys, AkaMessage, AkaSubtype};
use eap_proto::{EapCode, EapPacket, EapType};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use super::{parse_nai, Challenge, EapMethod, Identity, MethodError, MethodState, Verification};
use crate::authority::{AuthVectors, AuthorityError, CredentialAuthority, ResyncInfo};
use crate::session::ResultAttributes;

/// Default number of resynchronizations allowed per session
pub const DEFAULT_MAX_RESYNC_ATTEMPTS: u32 = 1;

/// State kept between an AKA-Challenge and its response
#[derive(Clone, PartialEq, Eq)]
pub struct AkaMethodState {
    /// Identity as sent by the peer, used for MK derivation
    pub identity: String,
    /// Subscriber lookup key
    pub imsi: String,
    pub xres: Vec<u8>,
    pub k_aut: [u8; 16],
    pub msk: Vec<u8>,
    /// RAND of the outstanding challenge
    pub rand: [u8; 16],
    pub msisdn: Option<String>,
    /// Resynchronizations performed so far in this session
    pub resync_attempts: u32,
}

impl std::fmt::Debug for AkaMethodState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AkaMethodState")
            .field("identity", &self.identity)
            .field("imsi", &self.imsi)
            .field("resync_attempts", &self.resync_attempts)
            .finish_non_exhaustive()
    }
}

/// EAP-AKA plugin
pub struct AkaMethod {
    authority: Arc<dyn CredentialAuthority>,
    max_resync_attempts: u32,
}

impl AkaMethod {
    pub fn new(authority: Arc<dyn CredentialAuthority>) -> Self {
        AkaMethod {
            authority,
            max_resync_attempts: DEFAULT_MAX_RESYNC_ATTEMPTS,
        }
    }

    pub fn with_max_resync_attempts(mut self, attempts: u32) -> Self {
        self.max_resync_attempts = attempts;
        self
    }

    async fn fetch(&self, imsi: &str, resync: Option<ResyncInfo>) -> Result<AuthVectors, MethodError> {
        self.authority
            .lookup_vectors(imsi, resync)
            .await
            .map_err(|e| match e {
                AuthorityError::UnknownSubscriber(id) => MethodError::IdentityNotFound(id),
                AuthorityError::Unavailable(reason) => {
                    MethodError::CredentialAuthorityUnavailable(reason)
                }
            })
    }

    fn build_challenge(
        identifier: u8,
        identity: &Identity,
        vectors: AuthVectors,
        resync_attempts: u32,
    ) -> Result<Challenge, MethodError> {
        let keys = AkaKeys::derive(identity.nai.as_bytes(), &vectors.ik, &vectors.ck);

        let payload = AkaMessage::new(AkaSubtype::Challenge)
            .with_attribute(AkaAttribute::rand(&vectors.rand))
            .with_attribute(AkaAttribute::autn(&vectors.autn))
            .seal(EapCode::Request, identifier, &keys.k_aut)
            .map_err(|e| MethodError::Encoding(e.to_string()))?;

        let state = AkaMethodState {
            identity: identity.nai.clone(),
            imsi: identity.key.clone(),
            xres: vectors.xres,
            k_aut: keys.k_aut,
            msk: keys.msk.to_vec(),
            rand: vectors.rand,
            msisdn: vectors.msisdn,
            resync_attempts,
        };

        Ok(Challenge {
            payload,
            method_state: MethodState::Aka(state),
        })
    }

    fn verify_challenge(
        response: &EapPacket,
        message: &AkaMessage,
        state: &AkaMethodState,
    ) -> Result<Verification, MethodError> {
        match verify_mac(response, &state.k_aut) {
            Ok(true) => {}
            Ok(false) => return Ok(Verification::AuthFailed("AT_MAC mismatch".to_string())),
            Err(AkaError::MissingMac) => {
                return Ok(Verification::AuthFailed("AT_MAC missing".to_string()))
            }
            Err(e) => return Err(MethodError::MalformedResponse(e.to_string())),
        }

        let res = match message.res() {
            Some(res) => res,
            None => return Ok(Verification::AuthFailed("AT_RES missing".to_string())),
        };

        if !bool::from(res.ct_eq(state.xres.as_slice())) {
            return Ok(Verification::AuthFailed("RES does not match XRES".to_string()));
        }

        Ok(Verification::Authenticated(ResultAttributes {
            identity: state.identity.clone(),
            msisdn: state.msisdn.clone(),
            msk: state.msk.clone(),
        }))
    }
}

#[async_trait]
impl EapMethod for AkaMethod {
    fn method_type(&self) -> EapType {
        EapType::Aka
    }

    /// `0<imsi>[@realm]` is a permanent AKA identity; anything else is looked up verbatim
    fn extract_identity(&self, payload: &[u8]) -> Result<Identity, MethodError> {
        let nai = parse_nai(payload)?;
        let user = nai.split('@').next().unwrap_or(nai);
        if user.is_empty() {
            return Err(MethodError::MalformedIdentity(
                "identity has an empty user part".to_string(),
            ));
        }

        let key = match user.strip_prefix('0') {
            Some("") => {
                return Err(MethodError::MalformedIdentity(
                    "permanent identity without IMSI".to_string(),
                ))
            }
            Some(imsi) => imsi,
            None => user,
        };

        Ok(Identity {
            nai: nai.to_string(),
            key: key.to_string(),
        })
    }

    async fn generate_challenge(
        &self,
        identifier: u8,
        identity: &Identity,
    ) -> Result<Challenge, MethodError> {
        let vectors = self.fetch(&identity.key, None).await?;
        debug!(imsi = %identity.key, identifier, "Issuing AKA-Challenge");
        Self::build_challenge(identifier, identity, vectors, 0)
    }

    async fn verify_response(
        &self,
        response: &EapPacket,
        state: &MethodState,
        next_identifier: u8,
    ) -> Result<Verification, MethodError> {
        let state = match state {
            MethodState::Aka(state) => state,
            MethodState::None => return Err(MethodError::MissingState(EapType::Aka)),
        };

        let message = AkaMessage::from_packet(response)
            .map_err(|e| MethodError::MalformedResponse(e.to_string()))?;

        match message.subtype {
            AkaSubtype::Challenge => Self::verify_challenge(response, &message, state),

            AkaSubtype::AuthenticationReject => Ok(Verification::AuthFailed(
                "peer sent AKA-Authentication-Reject".to_string(),
            )),

            AkaSubtype::ClientError => {
                let code = message
                    .client_error_code()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                Ok(Verification::AuthFailed(format!(
                    "peer sent AKA-Client-Error (code {})",
                    code
                )))
            }

            AkaSubtype::SynchronizationFailure => {
                let auts = message.auts().ok_or_else(|| {
                    MethodError::MalformedResponse(
                        "AKA-Synchronization-Failure without AT_AUTS".to_string(),
                    )
                })?;

                if state.resync_attempts >= self.max_resync_attempts {
                    warn!(
                        imsi = %state.imsi,
                        attempts = state.resync_attempts,
                        "AKA resynchronization limit reached"
                    );
                    return Ok(Verification::AuthFailed(
                        "resynchronization limit reached".to_string(),
                    ));
                }

                let resync = ResyncInfo {
                    rand: state.rand,
                    auts,
                };
                let vectors = self.fetch(&state.imsi, Some(resync)).await?;
                let identity = Identity {
                    nai: state.identity.clone(),
                    key: state.imsi.clone(),
                };
                debug!(imsi = %state.imsi, identifier = next_identifier, "Re-issuing AKA-Challenge after resync");
                let challenge = Self::build_challenge(
                    next_identifier,
                    &identity,
                    vectors,
                    state.resync_attempts + 1,
                )?;
                Ok(Verification::Rechallenge(challenge))
            }

            other => Err(MethodError::MalformedResponse(format!(
                "unexpected AKA subtype {:?}",
                other
            ))),
        }
    }
}
