//! Credential authority
//!
//! The credential authority (an HSS/AAA backend in a real deployment)
//! owns subscriber secrets and hands out AKA authentication vectors. The
//! engine only ever sees vectors; it never computes them.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use thiserror::Error;
use tracing::debug;

use crate::config::{ConfigError, SubscriberConfig};

/// One AKA authentication vector plus subscriber data
#[derive(Clone, PartialEq, Eq)]
pub struct AuthVectors {
    pub rand: [u8; 16],
    pub autn: [u8; 16],
    pub xres: Vec<u8>,
    pub ck: [u8; 16],
    pub ik: [u8; 16],
    pub msisdn: Option<String>,
}

impl std::fmt::Debug for AuthVectors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthVectors")
            .field("rand", &hex::encode(self.rand))
            .field("msisdn", &self.msisdn)
            .finish_non_exhaustive()
    }
}

/// Resynchronization data reported by the peer in AKA-Synchronization-Failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResyncInfo {
    /// RAND of the challenge the peer rejected
    pub rand: [u8; 16],
    /// AUTS computed by the peer
    pub auts: [u8; 14],
}

/// Credential authority errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthorityError {
    #[error("Unknown subscriber: {0}")]
    UnknownSubscriber(String),

    #[error("Credential authority unavailable: {0}")]
    Unavailable(String),
}

/// Source of AKA authentication vectors
#[async_trait]
pub trait CredentialAuthority: Send + Sync {
    /// Fetch a vector for `imsi`, resynchronizing the sequence number when `resync` is given
    async fn lookup_vectors(
        &self,
        imsi: &str,
        resync: Option<ResyncInfo>,
    ) -> Result<AuthVectors, AuthorityError>;
}

/// Credential authority backed by a fixed subscriber table
///
/// Intended for lab setups and tests: every lookup for a subscriber returns
/// the same configured vector, resync or not.
#[derive(Debug)]
pub struct StaticCredentialAuthority {
    subscribers: HashMap<String, AuthVectors>,
    available: AtomicBool,
    lookups: AtomicUsize,
    resyncs: AtomicUsize,
}

impl StaticCredentialAuthority {
    /// Create an empty authority
    pub fn new() -> Self {
        StaticCredentialAuthority {
            subscribers: HashMap::new(),
            available: AtomicBool::new(true),
            lookups: AtomicUsize::new(0),
            resyncs: AtomicUsize::new(0),
        }
    }

    /// Build the subscriber table from configuration entries
    pub fn from_config(subscribers: &[SubscriberConfig]) -> Result<Self, ConfigError> {
        let mut authority = Self::new();
        for subscriber in subscribers {
            authority.insert(subscriber.imsi.clone(), subscriber.to_vectors()?);
        }
        Ok(authority)
    }

    /// Add or replace a subscriber
    pub fn insert(&mut self, imsi: impl Into<String>, vectors: AuthVectors) {
        self.subscribers.insert(imsi.into(), vectors);
    }

    /// Builder form of [`insert`](Self::insert)
    pub fn with_subscriber(mut self, imsi: impl Into<String>, vectors: AuthVectors) -> Self {
        self.insert(imsi, vectors);
        self
    }

    /// Simulate an outage (`false`) or recovery (`true`)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Number of successful lookups served
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    /// Number of successful lookups that carried resync info
    pub fn resync_count(&self) -> usize {
        self.resyncs.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

impl Default for StaticCredentialAuthority {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialAuthority for StaticCredentialAuthority {
    async fn lookup_vectors(
        &self,
        imsi: &str,
        resync: Option<ResyncInfo>,
    ) -> Result<AuthVectors, AuthorityError> {
        if !self.is_available() {
            return Err(AuthorityError::Unavailable(
                "static authority marked unavailable".to_string(),
            ));
        }

        let vectors = self
            .subscribers
            .get(imsi)
            .cloned()
            .ok_or_else(|| AuthorityError::UnknownSubscriber(imsi.to_string()))?;

        self.lookups.fetch_add(1, Ordering::SeqCst);
        if resync.is_some() {
            self.resyncs.fetch_add(1, Ordering::SeqCst);
        }
        debug!(imsi = %imsi, resync = resync.is_some(), "Served authentication vector");
        Ok(vectors)
    }
}
