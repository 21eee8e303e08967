//! Periodic removal of idle sessions.

use chrono::Utc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::service::SessionRegistry;

#[derive(Debug, Clone, Copy)]
pub struct SweepConfig {
    /// Time between sweeps.
    pub interval: Duration,
    /// Sessions idle for longer than this are removed.
    pub session_timeout: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            session_timeout: Duration::from_secs(7200),
        }
    }
}

pub struct ExpirySweeper {
    registry: SessionRegistry,
    config: SweepConfig,
}

impl ExpirySweeper {
    pub fn new(registry: SessionRegistry, config: SweepConfig) -> Self {
        Self { registry, config }
    }

    pub async fn sweep_once(&self) -> Result<usize> {
        let timeout = chrono::Duration::from_std(self.config.session_timeout)
            .unwrap_or_else(|_| chrono::Duration::days(36_500));
        let cutoff = Utc::now()
            .checked_sub_signed(timeout)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
        self.registry.expire_idle(cutoff).await
    }

    /// Run until `shutdown` is cancelled. The first sweep happens one interval
    /// after start.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            log::info!(
                "Session sweep every {:?}, timeout {:?}",
                self.config.interval,
                self.config.session_timeout
            );
            let mut ticker = tokio::time::interval(self.config.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        log::info!("Session sweep stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        match self.sweep_once().await {
                            Ok(0) => log::debug!("Session sweep found nothing to expire"),
                            Ok(removed) => log::info!("Cleaned up {} expired sessions", removed),
                            Err(e) => log::error!("Error during session cleanup: {}", e),
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reset::BackendResetter;
    use crate::store::SessionStore;
    use async_trait::async_trait;
    use omnirepl_types::{CreateSessionRequest, Language};
    use std::sync::Arc;

    struct NoBackends;

    #[async_trait]
    impl BackendResetter for NoBackends {
        async fn reset(&self, _language: &Language, _session_id: &str) -> Option<bool> {
            None
        }
    }

    async fn registry() -> SessionRegistry {
        let store = SessionStore::in_memory().await.unwrap();
        SessionRegistry::new(store, Arc::new(NoBackends))
    }

    #[tokio::test]
    async fn test_sweep_once_keeps_fresh_sessions() {
        let registry = registry().await;
        registry.create(CreateSessionRequest::default()).await.unwrap();

        let sweeper = ExpirySweeper::new(registry.clone(), SweepConfig::default());
        assert_eq!(sweeper.sweep_once().await.unwrap(), 0);
        assert_eq!(registry.list().await.unwrap().total, 1);

        let eager = ExpirySweeper::new(
            registry.clone(),
            SweepConfig {
                interval: Duration::from_secs(1),
                session_timeout: Duration::ZERO,
            },
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(eager.sweep_once().await.unwrap(), 1);
        assert_eq!(registry.list().await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_spawned_sweeper_stops_on_cancel() {
        let sweeper = ExpirySweeper::new(registry().await, SweepConfig::default());
        let shutdown = CancellationToken::new();
        let handle = sweeper.spawn(shutdown.clone());

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
