//! Token Refresh Coordination
//!
//! Guarantees at most one outstanding token request at a time. The first
//! caller starts the request on a spawned task; every caller arriving while it
//! runs awaits the same shared result.

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{AuthenticationError, SharedoResult};
use crate::types::{Token, DEFAULT_MIN_REFRESH_INTERVAL};

type SharedRefresh = Shared<BoxFuture<'static, SharedoResult<Token>>>;

#[derive(Default)]
struct RefreshState {
    in_flight: Option<(u64, SharedRefresh)>,
    last_refresh: Option<Instant>,
    generation: u64,
}

/// Single-flight coordinator for token refreshes.
#[derive(Clone)]
pub struct TokenRefreshManager {
    state: Arc<Mutex<RefreshState>>,
    min_refresh_interval: Duration,
}

impl Default for TokenRefreshManager {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_REFRESH_INTERVAL)
    }
}

impl TokenRefreshManager {
    /// Create a coordinator. A zero `min_refresh_interval` disables
    /// throttling.
    pub fn new(min_refresh_interval: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(RefreshState::default())),
            min_refresh_interval,
        }
    }

    /// Run `refresh_fn`, or join the refresh already in flight.
    ///
    /// Fails with [`AuthenticationError::RefreshTooFrequent`] without calling
    /// `refresh_fn` when the previous refresh completed less than
    /// `min_refresh_interval` ago. The refresh runs to completion even if
    /// every caller stops waiting for it.
    pub async fn execute_refresh<F, Fut>(&self, refresh_fn: F) -> SharedoResult<Token>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SharedoResult<Token>> + Send + 'static,
    {
        let shared = {
            let mut state = self.state.lock();

            if let Some((_, in_flight)) = &state.in_flight {
                debug!("Joining in-flight token refresh");
                in_flight.clone()
            } else {
                if let Some(last) = state.last_refresh {
                    let elapsed = last.elapsed();
                    if elapsed < self.min_refresh_interval {
                        return Err(AuthenticationError::RefreshTooFrequent {
                            retry_in: self.min_refresh_interval - elapsed,
                        }
                        .into());
                    }
                }

                state.generation += 1;
                let generation = state.generation;
                let shared = self.spawn_refresh(generation, refresh_fn());
                state.in_flight = Some((generation, shared.clone()));
                shared
            }
        };

        shared.await
    }

    fn spawn_refresh<Fut>(&self, generation: u64, refresh: Fut) -> SharedRefresh
    where
        Fut: Future<Output = SharedoResult<Token>> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        let handle = tokio::spawn(async move {
            let result = refresh.await;
            let mut state = state.lock();
            if matches!(&state.in_flight, Some((current, _)) if *current == generation) {
                state.in_flight = None;
            }
            state.last_refresh = Some(Instant::now());
            result
        });

        handle
            .map(|joined| {
                joined.unwrap_or_else(|e| {
                    Err(AuthenticationError::RefreshFailed {
                        message: e.to_string(),
                    }
                    .into())
                })
            })
            .boxed()
            .shared()
    }

    /// Check if a refresh is in flight.
    pub fn is_refreshing(&self) -> bool {
        self.state.lock().in_flight.is_some()
    }

    /// When the last refresh completed.
    pub fn last_refresh(&self) -> Option<Instant> {
        self.state.lock().last_refresh
    }

    /// Forget the in-flight refresh and the throttle window.
    ///
    /// A refresh already running still completes for the callers awaiting it.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.in_flight = None;
        state.last_refresh = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SharedoError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_refresh(
        calls: &Arc<AtomicUsize>,
        delay: Duration,
    ) -> impl FnOnce() -> BoxFuture<'static, SharedoResult<Token>> {
        let calls = Arc::clone(calls);
        move || {
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::time::sleep(delay).await;
                Ok(Token::bearer(format!("token-{}", n), 3600))
            }
            .boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_refresh() {
        let manager = TokenRefreshManager::new(Duration::ZERO);
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let manager = manager.clone();
                let calls = calls.clone();
                tokio::spawn(async move {
                    manager
                        .execute_refresh(counting_refresh(&calls, Duration::from_millis(100)))
                        .await
                })
            })
            .collect();

        for task in tasks {
            let token = task.await.unwrap().unwrap();
            assert_eq!(token.access_token, "token-1");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!manager.is_refreshing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_too_frequent() {
        let manager = TokenRefreshManager::new(Duration::from_secs(5));
        let calls = Arc::new(AtomicUsize::new(0));

        manager
            .execute_refresh(counting_refresh(&calls, Duration::ZERO))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        let error = manager
            .execute_refresh(counting_refresh(&calls, Duration::ZERO))
            .await
            .unwrap_err();
        match error {
            SharedoError::Authentication(AuthenticationError::RefreshTooFrequent { retry_in }) => {
                assert!(retry_in <= Duration::from_secs(3));
                assert!(retry_in > Duration::from_secs(2));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(4)).await;
        let token = manager
            .execute_refresh(counting_refresh(&calls, Duration::ZERO))
            .await
            .unwrap();
        assert_eq!(token.access_token, "token-2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_reaches_every_waiter_and_clears_state() {
        let manager = TokenRefreshManager::new(Duration::ZERO);
        let calls = Arc::new(AtomicUsize::new(0));

        let failing = |calls: Arc<AtomicUsize>| {
            move || {
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Err::<Token, _>(
                        AuthenticationError::TokenRequestFailed {
                            status: 400,
                            message: "invalid_client".to_string(),
                        }
                        .into(),
                    )
                }
            }
        };

        let (a, b) = tokio::join!(
            manager.execute_refresh(failing(calls.clone())),
            manager.execute_refresh(failing(calls.clone())),
        );
        assert!(a.is_err());
        assert!(b.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!manager.is_refreshing());
        assert!(manager.last_refresh().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_completes_when_caller_is_cancelled() {
        let manager = TokenRefreshManager::new(Duration::ZERO);
        let calls = Arc::new(AtomicUsize::new(0));

        let attempt = tokio::time::timeout(
            Duration::from_millis(10),
            manager.execute_refresh(counting_refresh(&calls, Duration::from_millis(100))),
        )
        .await;
        assert!(attempt.is_err());
        assert!(manager.is_refreshing());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!manager.is_refreshing());
        assert!(manager.last_refresh().is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_clears_throttle() {
        let manager = TokenRefreshManager::new(Duration::from_secs(5));
        let calls = Arc::new(AtomicUsize::new(0));

        manager
            .execute_refresh(counting_refresh(&calls, Duration::ZERO))
            .await
            .unwrap();
        manager.reset();
        assert!(manager.last_refresh().is_none());

        manager
            .execute_refresh(counting_refresh(&calls, Duration::ZERO))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
