//! In-memory session store
//!
//! Sessions are kept in a [`DashMap`], so two conversations only contend
//! when their ids land in the same shard, and only for the duration of a
//! single map operation. Version checks happen while the shard lock for
//! the entry is held, which makes each commit atomic.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use eap_proto::EapType;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use super::{
    RandomSessionIdGenerator, SessionContext, SessionId, SessionIdGenerator, SessionState,
    SessionStats, SessionStore, SessionUpdate, StoreError,
};

/// Default maximum number of live sessions
pub const DEFAULT_MAX_SESSIONS: usize = 100_000;

/// In-memory session store
///
/// Not shared between processes; a restart drops every conversation in
/// flight and peers simply start over.
pub struct MemorySessionStore {
    sessions: DashMap<SessionId, SessionContext>,
    generator: Arc<dyn SessionIdGenerator>,
    max_sessions: usize,
    /// Slots claimed by live sessions, reserved before insertion
    reserved: AtomicUsize,
}

impl MemorySessionStore {
    /// Create a store with the default id generator
    pub fn new(max_sessions: usize) -> Self {
        Self::with_generator(max_sessions, Arc::new(RandomSessionIdGenerator::new()))
    }

    /// Create a store with a custom id generator
    pub fn with_generator(max_sessions: usize, generator: Arc<dyn SessionIdGenerator>) -> Self {
        MemorySessionStore {
            sessions: DashMap::new(),
            generator,
            max_sessions,
            reserved: AtomicUsize::new(0),
        }
    }

    /// Claim a slot for a new session, failing when the store is full
    fn reserve_slot(&self) -> Result<(), StoreError> {
        self.reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                (used < self.max_sessions).then_some(used + 1)
            })
            .map(|_| ())
            .map_err(|_| StoreError::CapacityExceeded(self.max_sessions))
    }

    fn release_slots(&self, count: usize) {
        if count > 0 {
            self.reserved.fetch_sub(count, Ordering::AcqRel);
        }
    }

    /// Remove every session whose snapshot matches `pred`, skipping any
    /// session that was committed after it was inspected.
    fn remove_matching<F>(&self, kind: &'static str, pred: F) -> usize
    where
        F: Fn(&SessionContext, Instant) -> bool,
    {
        let now = Instant::now();

        // Collect first so no shard lock is held while removing
        let candidates: Vec<(SessionId, u64)> = self
            .sessions
            .iter()
            .filter(|entry| pred(entry.value(), now))
            .map(|entry| (entry.key().clone(), entry.value().version))
            .collect();

        let mut removed = 0;
        for (session_id, version) in candidates {
            match self
                .sessions
                .remove_if(&session_id, |_, ctx| ctx.version == version)
            {
                Some(_) => removed += 1,
                None => debug!(
                    session_id = %session_id,
                    kind,
                    "Session advanced or vanished during expiry, skipped"
                ),
            }
        }

        self.release_slots(removed);
        if removed > 0 {
            debug!(
                removed = removed,
                remaining = self.sessions.len(),
                kind,
                "Expired sessions"
            );
        }
        removed
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SESSIONS)
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn resolve(&self, session_id: &SessionId) -> Result<SessionContext, StoreError> {
        self.sessions
            .get(session_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::NotFound(session_id.clone()))
    }

    async fn create(&self, method: EapType) -> Result<SessionContext, StoreError> {
        self.reserve_slot()?;

        let session_id = self.generator.generate();
        match self.sessions.entry(session_id.clone()) {
            Entry::Occupied(_) => {
                self.release_slots(1);
                Err(StoreError::IdCollision(session_id))
            }
            Entry::Vacant(vacant) => {
                let ctx = SessionContext::new(session_id, method);
                vacant.insert(ctx.clone());
                debug!(session_id = %ctx.session_id, method = %method, "Session created");
                Ok(ctx)
            }
        }
    }

    async fn commit(
        &self,
        session_id: &SessionId,
        expected_version: u64,
        update: SessionUpdate,
    ) -> Result<SessionContext, StoreError> {
        let mut entry = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| StoreError::StaleSession {
                session_id: session_id.clone(),
                expected: expected_version,
                found: None,
            })?;

        if entry.version != expected_version {
            return Err(StoreError::StaleSession {
                session_id: session_id.clone(),
                expected: expected_version,
                found: Some(entry.version),
            });
        }

        entry.apply(update);
        Ok(entry.value().clone())
    }

    async fn expire_older_than(&self, idle: Duration) -> usize {
        self.remove_matching("idle", |ctx, now| ctx.idle_for(now) > idle)
    }

    async fn expire_terminated(&self, grace: Duration) -> usize {
        self.remove_matching("terminated", |ctx, now| {
            ctx.state.is_terminal()
                && ctx
                    .terminated_at
                    .is_some_and(|at| now.saturating_duration_since(at) > grace)
        })
    }

    async fn stats(&self) -> SessionStats {
        let mut stats = SessionStats {
            max_sessions: self.max_sessions,
            ..SessionStats::default()
        };
        for entry in self.sessions.iter() {
            stats.total += 1;
            match entry.value().state {
                SessionState::AwaitingIdentity => stats.awaiting_identity += 1,
                SessionState::AwaitingChallengeResponse => stats.awaiting_challenge_response += 1,
                SessionState::Success => stats.succeeded += 1,
                SessionState::Failure => stats.failed += 1,
            }
        }
        stats
    }

    async fn len(&self) -> usize {
        self.sessions.len()
    }
}
