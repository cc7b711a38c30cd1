//! Background session expiry
//!
//! The sweeper runs on a tokio interval and asks the store to drop idle
//! sessions and terminal sessions past their grace period. Removal is
//! version-checked in the store, so a session that a request advanced
//! while the sweep was running is left alone.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::debug;

use super::SessionStore;

/// Sessions removed by one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub idle: usize,
    pub terminated: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.idle + self.terminated
    }
}

/// Run a single expiry pass against `store`
pub async fn sweep_once(
    store: &dyn SessionStore,
    idle_timeout: Duration,
    terminal_grace: Duration,
) -> SweepReport {
    let terminated = store.expire_terminated(terminal_grace).await;
    let idle = store.expire_older_than(idle_timeout).await;
    SweepReport { idle, terminated }
}

/// Handle to the background expiry task
///
/// The task stops when the handle is dropped or [`stop`](Self::stop) is called.
pub struct SessionSweeper {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl SessionSweeper {
    /// Start sweeping `store` every `interval`
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        store: Arc<dyn SessionStore>,
        interval: Duration,
        idle_timeout: Duration,
        terminal_grace: Duration,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);

        let handle = tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
            // First tick completes immediately
            ticker.tick().await;

            while flag.load(Ordering::Relaxed) {
                ticker.tick().await;
                if !flag.load(Ordering::Relaxed) {
                    break;
                }

                let report = sweep_once(store.as_ref(), idle_timeout, terminal_grace).await;
                if report.total() > 0 {
                    let remaining = store.len().await;
                    debug!(
                        idle = report.idle,
                        terminated = report.terminated,
                        remaining,
                        "Session sweep completed"
                    );
                }
            }

            debug!("Session sweeper stopped");
        });

        debug!(
            interval_ms = interval.as_millis() as u64,
            idle_timeout_secs = idle_timeout.as_secs(),
            terminal_grace_secs = terminal_grace.as_secs(),
            "Session sweeper started"
        );

        SessionSweeper { running, handle }
    }

    /// Whether the background task is still running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed) && !self.handle.is_finished()
    }

    /// Stop the background task
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
        self.handle.abort();
    }
}

impl Drop for SessionSweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{MemorySessionStore, SessionState, SessionUpdate};
    use eap_proto::EapType;

    #[tokio::test]
    async fn test_sweep_once_reports_both_kinds() {
        let store = MemorySessionStore::default();
        let idle = store.create(EapType::Aka).await.unwrap();
        let done = store.create(EapType::Aka).await.unwrap();
        store
            .commit(
                &done.session_id,
                0,
                SessionUpdate::unchanged(&done).with_state(SessionState::Failure),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;

        let report = sweep_once(&store, Duration::from_millis(20), Duration::from_millis(10)).await;
        assert_eq!(report, SweepReport { idle: 1, terminated: 1 });
        assert!(store.resolve(&idle.session_id).await.is_err());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_sweeper_removes_idle_sessions() {
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::default());
        let ctx = store.create(EapType::Aka).await.unwrap();

        let sweeper = SessionSweeper::spawn(
            Arc::clone(&store),
            Duration::from_millis(20),
            Duration::from_millis(50),
            Duration::from_secs(10),
        );
        assert!(sweeper.is_running());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(store.resolve(&ctx.session_id).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_sweeper_reports_on_worker_threads() {
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::default());
        let expired = store.create(EapType::Aka).await.unwrap();

        let sweeper = SessionSweeper::spawn(
            Arc::clone(&store),
            Duration::from_millis(10),
            Duration::from_millis(30),
            Duration::from_secs(10),
        );

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(store.resolve(&expired.session_id).await.is_err());

        // Sweeps that remove nothing keep the task alive
        let fresh = store.create(EapType::Aka).await.unwrap();
        tokio::time::sleep(Duration::from_millis(15)).await;
        assert!(sweeper.is_running());
        assert!(store.resolve(&fresh.session_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_drop() {
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::default());

        let sweeper = SessionSweeper::spawn(
            Arc::clone(&store),
            Duration::from_millis(10),
            Duration::from_millis(10),
            Duration::from_millis(10),
        );
        drop(sweeper);

        let ctx = store.create(EapType::Aka).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(store.resolve(&ctx.session_id).await.is_ok());
    }
}
