//! Single-flight token refresh with request replay.
//!
//! # State machine
//!
//! ```text
//!            401 token.expired/invalid
//!   Idle ──────────────────────────────▶ Refreshing ──┐
//!    ▲                                     │   ▲      │ more 401s: queue, no new call
//!    │  success: persist, mirror, replay   │   └──────┘
//!    │  failure: reject all, sign out      │
//!    └─────────────────────────────────────┘
//! ```
//!
//! The first caller to classify an expired-token failure while `Idle` becomes
//! the *leader*: it flips the state to `Refreshing` under the lock (atomic
//! check-and-set), performs the one refresh call for the epoch, and settles
//! every queued caller. Callers arriving while `Refreshing` are *followers*:
//! they park on a oneshot channel until the leader settles them.
//!
//! On success the queued envelopes are replayed in arrival order, then the
//! leader's own. On failure every follower receives the same error and the
//! sign-out handler fires once.
//!
//! # Epochs
//!
//! Each refresh, sign-in, and sign-out advances the credential epoch. A 401 for
//! a request that was stamped with an older token than the one now in
//! [`SessionState`] is replayed straight away instead of starting a new refresh.

use super::session::SessionState;
use super::sign_out::SignOut;
use super::store::TokenStore;
use crate::client::Transport;
use crate::error::{ClientError, Result};
use crate::protocol;
use crate::types::{CredentialPair, HttpResponse, OutgoingRequest, RequestEnvelope};
use async_trait::async_trait;
use http::{header, HeaderMap, HeaderValue, Method};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Default bound on how long a queued caller waits for the refresh and its replay.
pub const DEFAULT_QUEUE_TIMEOUT: Duration = Duration::from_secs(30);

/// Exchanges a refresh token for a new credential pair.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Perform the refresh call. Any failure is a refresh failure.
    async fn refresh(&self, refresh_token: &str) -> Result<CredentialPair>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// [`TokenRefresher`] calling the API's refresh endpoint.
///
/// Sends `POST {url}` with `{"refreshToken": "..."}` and expects the new pair
/// back. Any non-2xx response, transport error, or unusable body becomes
/// [`ClientError::RefreshFailed`].
pub struct HttpTokenRefresher {
    transport: Arc<dyn Transport>,
    url: url::Url,
}

impl HttpTokenRefresher {
    /// Refresher posting to `url` over `transport`.
    pub fn new(transport: Arc<dyn Transport>, url: url::Url) -> Self {
        Self { transport, url }
    }
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<CredentialPair> {
        let body = serde_json::to_vec(&RefreshRequest { refresh_token })?;
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );

        let request = OutgoingRequest {
            method: Method::POST,
            url: self.url.clone(),
            headers,
            body: body.into(),
        };

        let response = self
            .transport
            .execute(request)
            .await
            .map_err(|e| ClientError::RefreshFailed(e.to_string()))?;

        if !response.is_success() {
            let reason = protocol::error_message(&response.body)
                .unwrap_or_else(|| format!("refresh endpoint returned {}", response.status));
            return Err(ClientError::RefreshFailed(reason));
        }

        let pair: CredentialPair = response
            .json()
            .map_err(|e| ClientError::RefreshFailed(e.to_string()))?;
        if pair.access_token.is_empty() || !pair.has_refresh_token() {
            return Err(ClientError::RefreshFailed(
                "refresh endpoint returned an incomplete credential pair".into(),
            ));
        }
        Ok(pair)
    }
}

/// A caller parked until the in-flight refresh settles.
struct PendingReplay {
    envelope: RequestEnvelope,
    reply: oneshot::Sender<Result<HttpResponse>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Refreshing,
}

/// Coordinator-owned mutable state. Only touched with the lock held, never across an await.
struct RefreshState {
    phase: Phase,
    queue: VecDeque<PendingReplay>,
    epoch: u64,
}

impl RefreshState {
    /// Return to `Idle`, handing back everything that was queued.
    fn settle(&mut self) -> VecDeque<PendingReplay> {
        self.phase = Phase::Idle;
        std::mem::take(&mut self.queue)
    }
}

enum Role {
    Leader {
        epoch: u64,
        envelope: RequestEnvelope,
    },
    Follower(oneshot::Receiver<Result<HttpResponse>>),
    Retry {
        token: String,
        envelope: RequestEnvelope,
    },
}

/// Serializes token refreshes for one session and replays the requests they blocked.
///
/// Construct one per session owner and install it on a
/// [`SessionClient`](crate::SessionClient) with
/// [`intercept`](crate::SessionClient::intercept).
pub struct RefreshCoordinator {
    state: Mutex<RefreshState>,
    session: SessionState,
    store: Arc<dyn TokenStore>,
    refresher: Arc<dyn TokenRefresher>,
    sign_out: SignOut,
    queue_timeout: Duration,
    refresh_count: AtomicU64,
    /// Serializes store writes with epoch changes (install, sign-out, refresh settle).
    writes: tokio::sync::Mutex<()>,
}

impl RefreshCoordinator {
    /// Create an idle coordinator.
    pub fn new(
        session: SessionState,
        store: Arc<dyn TokenStore>,
        refresher: Arc<dyn TokenRefresher>,
        sign_out: SignOut,
    ) -> Self {
        Self {
            state: Mutex::new(RefreshState {
                phase: Phase::Idle,
                queue: VecDeque::new(),
                epoch: 0,
            }),
            session,
            store,
            refresher,
            sign_out,
            queue_timeout: DEFAULT_QUEUE_TIMEOUT,
            refresh_count: AtomicU64::new(0),
            writes: tokio::sync::Mutex::new(()),
        }
    }

    /// Bound how long a queued caller waits.
    pub fn with_queue_timeout(mut self, timeout: Duration) -> Self {
        self.queue_timeout = timeout;
        self
    }

    /// Session mirror this coordinator writes to
    pub fn session(&self) -> &SessionState {
        &self.session
    }

    /// Whether a refresh is in flight
    pub fn is_refreshing(&self) -> bool {
        self.state.lock().phase == Phase::Refreshing
    }

    /// Number of callers waiting on the in-flight refresh
    pub fn queued(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Current credential epoch
    pub fn epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    /// Refresh calls issued so far
    pub fn refresh_count(&self) -> u64 {
        self.refresh_count.load(Ordering::SeqCst)
    }

    /// Recover from an expired-token failure on `envelope`.
    ///
    /// `failure` is what the caller sees if no refresh token is stored.
    /// `replay` sends an envelope without interception; it is used for this
    /// caller and, when this caller leads the refresh, for every queued one.
    pub async fn recover<F, Fut>(
        &self,
        envelope: RequestEnvelope,
        failure: ClientError,
        replay: F,
    ) -> Result<HttpResponse>
    where
        F: Fn(RequestEnvelope) -> Fut,
        Fut: Future<Output = Result<HttpResponse>>,
    {
        let role = {
            let mut state = self.state.lock();
            let phase = state.phase;
            match phase {
                Phase::Refreshing => {
                    state.queue.retain(|p| !p.reply.is_closed());
                    let (reply, rx) = oneshot::channel();
                    tracing::debug!(
                        correlation_id = %envelope.correlation_id(),
                        queued = state.queue.len() + 1,
                        "refresh in flight, queueing request"
                    );
                    state.queue.push_back(PendingReplay { envelope, reply });
                    Role::Follower(rx)
                }
                Phase::Idle => match self.session.current() {
                    Some(token) if envelope.bearer() != Some(token.as_str()) => {
                        Role::Retry { token, envelope }
                    }
                    _ => {
                        debug_assert!(
                            state.queue.is_empty(),
                            "queue left over from a settled epoch"
                        );
                        state.phase = Phase::Refreshing;
                        state.epoch += 1;
                        Role::Leader {
                            epoch: state.epoch,
                            envelope,
                        }
                    }
                },
            }
        };

        match role {
            Role::Follower(rx) => match tokio::time::timeout(self.queue_timeout, rx).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(ClientError::Cancelled),
                Err(_) => {
                    tracing::warn!("queued request timed out waiting for token refresh");
                    Err(ClientError::QueueTimeout)
                }
            },
            Role::Retry { token, envelope } => {
                tracing::debug!(
                    correlation_id = %envelope.correlation_id(),
                    "stale token, replaying with current session"
                );
                replay(envelope.to_replay(&token)).await
            }
            Role::Leader { epoch, envelope } => self.lead(epoch, envelope, failure, replay).await,
        }
    }

    async fn lead<F, Fut>(
        &self,
        epoch: u64,
        envelope: RequestEnvelope,
        failure: ClientError,
        replay: F,
    ) -> Result<HttpResponse>
    where
        F: Fn(RequestEnvelope) -> Fut,
        Fut: Future<Output = Result<HttpResponse>>,
    {
        tracing::info!(epoch, "access token rejected, refreshing");
        let mut guard = EpochGuard {
            coordinator: self,
            epoch,
            armed: true,
        };

        let outcome = match self.obtain_credentials().await {
            Err(ClientError::NoRefreshToken) => Err(failure),
            other => other,
        };

        // Install and sign-out advance the epoch only while holding `writes`,
        // so the epoch cannot move between this check and the settle below.
        let writes = self.writes.lock().await;
        let current = self.state.lock().epoch == epoch;
        if let (true, Ok(pair)) = (current, &outcome) {
            if let Err(e) = self.store.save(pair).await {
                tracing::warn!(error = %e, "failed to persist refreshed credentials");
            }
        }

        let settled = {
            let mut state = self.state.lock();
            guard.armed = false;
            if state.epoch != epoch {
                None
            } else {
                match &outcome {
                    Ok(pair) => self.session.set_token(pair.access_token.clone()),
                    Err(_) => self.session.clear(),
                }
                Some(state.settle())
            }
        };

        let Some(queued) = settled else {
            tracing::warn!(epoch, "session changed during refresh, discarding result");
            return Err(ClientError::SignedOut);
        };

        match outcome {
            Ok(pair) => {
                drop(writes);
                tracing::info!(epoch, queued = queued.len(), "token refreshed, replaying");
                self.replay_all(&pair.access_token, queued, envelope, replay)
                    .await
            }
            Err(err) => {
                tracing::warn!(epoch, error = %err, queued = queued.len(), "token refresh failed");
                for pending in queued {
                    let _ = pending.reply.send(Err(err.clone()));
                }
                self.sign_out.sign_out().await;
                Err(err)
            }
        }
    }

    /// Read the stored refresh token and exchange it. Persisting is left to the
    /// caller, which knows whether the epoch is still current.
    async fn obtain_credentials(&self) -> Result<CredentialPair> {
        let current = match self.store.get().await? {
            Some(pair) if pair.has_refresh_token() => pair,
            _ => {
                tracing::warn!("no refresh token stored, signing out");
                return Err(ClientError::NoRefreshToken);
            }
        };

        self.refresh_count.fetch_add(1, Ordering::SeqCst);
        self.refresher.refresh(&current.refresh_token).await
    }

    /// Replay queued envelopes in arrival order, then the leader's own.
    ///
    /// Each replay future is first polled in that order; followers get their
    /// result as soon as their own replay completes.
    async fn replay_all<F, Fut>(
        &self,
        token: &str,
        queued: VecDeque<PendingReplay>,
        own: RequestEnvelope,
        replay: F,
    ) -> Result<HttpResponse>
    where
        F: Fn(RequestEnvelope) -> Fut,
        Fut: Future<Output = Result<HttpResponse>>,
    {
        let followers = queued
            .into_iter()
            .filter(|pending| {
                let live = !pending.reply.is_closed();
                if !live {
                    tracing::debug!(
                        correlation_id = %pending.envelope.correlation_id(),
                        "caller went away, skipping replay"
                    );
                }
                live
            })
            .map(|pending| {
                let fut = replay(pending.envelope.to_replay(token));
                async move {
                    let _ = pending.reply.send(fut.await);
                }
            })
            .collect::<Vec<_>>();

        let own = replay(own.to_replay(token));
        let (_, result) = futures::future::join(futures::future::join_all(followers), own).await;
        result
    }

    /// Install a freshly signed-in pair.
    ///
    /// Starts a new epoch; anything still queued from a previous one is
    /// rejected with [`ClientError::Cancelled`].
    pub async fn install(&self, pair: CredentialPair) -> Result<()> {
        let _writes = self.writes.lock().await;
        self.store.save(&pair).await?;
        let queued = {
            let mut state = self.state.lock();
            state.epoch += 1;
            self.session.set_token(pair.access_token.clone());
            state.settle()
        };
        for pending in queued {
            let _ = pending.reply.send(Err(ClientError::Cancelled));
        }
        Ok(())
    }

    /// Load the persisted pair into the session mirror.
    ///
    /// Returns whether a session was found.
    pub async fn restore(&self) -> Result<bool> {
        match self.store.get().await? {
            Some(pair) => {
                self.session.set_token(pair.access_token);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// End the session.
    ///
    /// Rejects queued callers with [`ClientError::SignedOut`], invalidates any
    /// in-flight refresh, then runs the sign-out handler.
    pub async fn sign_out(&self) {
        let _writes = self.writes.lock().await;
        let queued = {
            let mut state = self.state.lock();
            state.epoch += 1;
            self.session.clear();
            state.settle()
        };
        for pending in queued {
            let _ = pending.reply.send(Err(ClientError::SignedOut));
        }
        self.sign_out.sign_out().await;
    }

    /// Handler run on unrecoverable failures
    pub(crate) fn sign_out_handler(&self) -> &SignOut {
        &self.sign_out
    }
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RefreshCoordinator")
            .field("phase", &state.phase)
            .field("queued", &state.queue.len())
            .field("epoch", &state.epoch)
            .finish()
    }
}

/// Returns the coordinator to `Idle` if the leader is dropped mid-refresh.
struct EpochGuard<'a> {
    coordinator: &'a RefreshCoordinator,
    epoch: u64,
    armed: bool,
}

impl Drop for EpochGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let queued = {
            let mut state = self.coordinator.state.lock();
            if state.epoch != self.epoch {
                return;
            }
            state.settle()
        };
        tracing::warn!(
            epoch = self.epoch,
            queued = queued.len(),
            "refresh abandoned, rejecting queued requests"
        );
        for pending in queued {
            let _ = pending.reply.send(Err(ClientError::Cancelled));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::store::MemoryTokenStore;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    /// Refresher that blocks until released, then returns a scripted outcome.
    struct GatedRefresher {
        gate: Arc<Notify>,
        outcome: Result<CredentialPair>,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TokenRefresher for GatedRefresher {
        async fn refresh(&self, refresh_token: &str) -> Result<CredentialPair> {
            self.seen.lock().push(refresh_token.to_string());
            self.gate.notified().await;
            self.outcome.clone()
        }
    }

    struct Harness {
        coordinator: Arc<RefreshCoordinator>,
        store: MemoryTokenStore,
        refresher: Arc<GatedRefresher>,
        signed_out: Arc<AtomicUsize>,
    }

    fn harness(outcome: Result<CredentialPair>, stored: Option<CredentialPair>) -> Harness {
        let session = SessionState::new();
        let store = match stored {
            Some(pair) => {
                session.set_token(pair.access_token.clone());
                MemoryTokenStore::with_pair(pair)
            }
            None => MemoryTokenStore::new(),
        };
        let refresher = Arc::new(GatedRefresher {
            gate: Arc::new(Notify::new()),
            outcome,
            seen: Mutex::new(Vec::new()),
        });
        let signed_out = Arc::new(AtomicUsize::new(0));
        let counter = signed_out.clone();
        let sign_out = SignOut::new(session.clone(), Arc::new(store.clone())).on_sign_out(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let coordinator = Arc::new(RefreshCoordinator::new(
            session,
            Arc::new(store.clone()),
            refresher.clone(),
            sign_out,
        ));
        Harness {
            coordinator,
            store,
            refresher,
            signed_out,
        }
    }

    fn expired() -> ClientError {
        ClientError::Unauthorized {
            reason: protocol::TOKEN_EXPIRED.into(),
        }
    }

    /// Replay that records the order of first polls and echoes the bearer token.
    fn recording_replay(
        log: Arc<Mutex<Vec<String>>>,
    ) -> impl Fn(RequestEnvelope) -> std::future::Ready<Result<HttpResponse>> {
        move |env: RequestEnvelope| {
            log.lock().push(env.path().to_string());
            let body = env.bearer().unwrap_or_default().to_string();
            std::future::ready(Ok(HttpResponse::new(200, body)))
        }
    }

    async fn wait_until_queued(coordinator: &RefreshCoordinator, n: usize) {
        while coordinator.queued() < n {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_single_flight_and_fifo_replay() {
        let h = harness(
            Ok(CredentialPair::new("new", "r2")),
            Some(CredentialPair::new("old", "r1")),
        );
        let log = Arc::new(Mutex::new(Vec::new()));

        let spawn = |path: &'static str| {
            let coordinator = h.coordinator.clone();
            let log = log.clone();
            tokio::spawn(async move {
                let env = RequestEnvelope::get(path).with_bearer("old");
                coordinator
                    .recover(env, expired(), recording_replay(log))
                    .await
            })
        };

        let leader = spawn("/x");
        while !h.coordinator.is_refreshing() || h.refresher.seen.lock().is_empty() {
            tokio::task::yield_now().await;
        }
        let a = spawn("/a");
        wait_until_queued(&h.coordinator, 1).await;
        let b = spawn("/b");
        wait_until_queued(&h.coordinator, 2).await;
        let c = spawn("/c");
        wait_until_queued(&h.coordinator, 3).await;

        h.refresher.gate.notify_one();

        for task in [leader, a, b, c] {
            let response = task.await.unwrap().unwrap();
            assert_eq!(response.text(), "new");
        }

        assert_eq!(h.coordinator.refresh_count(), 1);
        assert_eq!(*h.refresher.seen.lock(), vec!["r1".to_string()]);
        assert_eq!(*log.lock(), vec!["/a", "/b", "/c", "/x"]);
        assert_eq!(h.store.snapshot(), Some(CredentialPair::new("new", "r2")));
        assert_eq!(h.coordinator.session().current().as_deref(), Some("new"));
        assert!(!h.coordinator.is_refreshing());
        assert_eq!(h.coordinator.queued(), 0);
        assert_eq!(h.signed_out.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_refresh_failure_rejects_all_and_signs_out_once() {
        let h = harness(
            Err(ClientError::RefreshFailed("refresh endpoint returned 401".into())),
            Some(CredentialPair::new("old", "r1")),
        );
        let log = Arc::new(Mutex::new(Vec::new()));

        let spawn = |path: &'static str| {
            let coordinator = h.coordinator.clone();
            let log = log.clone();
            tokio::spawn(async move {
                let env = RequestEnvelope::get(path).with_bearer("old");
                coordinator
                    .recover(env, expired(), recording_replay(log))
                    .await
            })
        };

        let leader = spawn("/x");
        while h.refresher.seen.lock().is_empty() {
            tokio::task::yield_now().await;
        }
        let a = spawn("/a");
        wait_until_queued(&h.coordinator, 1).await;
        let b = spawn("/b");
        wait_until_queued(&h.coordinator, 2).await;

        h.refresher.gate.notify_one();

        for task in [leader, a, b] {
            let err = task.await.unwrap().unwrap_err();
            assert!(matches!(err, ClientError::RefreshFailed(_)));
        }
        assert!(log.lock().is_empty(), "nothing may be replayed");
        assert_eq!(h.signed_out.load(Ordering::SeqCst), 1);
        assert!(h.store.snapshot().is_none());
        assert!(h.coordinator.session().current().is_none());
        assert_eq!(h.coordinator.queued(), 0);
    }

    #[tokio::test]
    async fn test_no_refresh_token_signs_out_without_refresh_call() {
        let h = harness(Ok(CredentialPair::new("new", "r2")), None);
        let log = Arc::new(Mutex::new(Vec::new()));

        let err = h
            .coordinator
            .recover(
                RequestEnvelope::get("/x").with_bearer("old"),
                expired(),
                recording_replay(log.clone()),
            )
            .await
            .unwrap_err();

        assert_eq!(err, expired());
        assert_eq!(h.coordinator.refresh_count(), 0);
        assert!(h.refresher.seen.lock().is_empty());
        assert_eq!(h.signed_out.load(Ordering::SeqCst), 1);
        assert!(log.lock().is_empty());
        assert!(!h.coordinator.is_refreshing());
    }

    #[tokio::test]
    async fn test_stale_token_replays_without_refresh() {
        let h = harness(
            Ok(CredentialPair::new("unused", "unused")),
            Some(CredentialPair::new("current", "r1")),
        );
        let log = Arc::new(Mutex::new(Vec::new()));

        let response = h
            .coordinator
            .recover(
                RequestEnvelope::get("/late").with_bearer("previous"),
                expired(),
                recording_replay(log.clone()),
            )
            .await
            .unwrap();

        assert_eq!(response.text(), "current");
        assert_eq!(h.coordinator.refresh_count(), 0);
        assert_eq!(*log.lock(), vec!["/late"]);
    }

    #[tokio::test]
    async fn test_abandoned_follower_is_not_replayed() {
        let h = harness(
            Ok(CredentialPair::new("new", "r2")),
            Some(CredentialPair::new("old", "r1")),
        );
        let log = Arc::new(Mutex::new(Vec::new()));

        let leader = {
            let coordinator = h.coordinator.clone();
            let log = log.clone();
            tokio::spawn(async move {
                coordinator
                    .recover(
                        RequestEnvelope::get("/x").with_bearer("old"),
                        expired(),
                        recording_replay(log),
                    )
                    .await
            })
        };
        while h.refresher.seen.lock().is_empty() {
            tokio::task::yield_now().await;
        }

        let abandoned = {
            let coordinator = h.coordinator.clone();
            let log = log.clone();
            tokio::spawn(async move {
                coordinator
                    .recover(
                        RequestEnvelope::get("/gone").with_bearer("old"),
                        expired(),
                        recording_replay(log),
                    )
                    .await
            })
        };
        wait_until_queued(&h.coordinator, 1).await;
        abandoned.abort();
        let _ = abandoned.await;

        h.refresher.gate.notify_one();
        leader.await.unwrap().unwrap();

        assert_eq!(*log.lock(), vec!["/x"]);
        assert_eq!(h.coordinator.queued(), 0);
    }

    #[tokio::test]
    async fn test_queue_timeout() {
        let h = harness(
            Ok(CredentialPair::new("new", "r2")),
            Some(CredentialPair::new("old", "r1")),
        );
        let coordinator = Arc::new(
            RefreshCoordinator::new(
                h.coordinator.session().clone(),
                Arc::new(h.store.clone()),
                h.refresher.clone(),
                h.coordinator.sign_out_handler().clone(),
            )
            .with_queue_timeout(Duration::from_millis(20)),
        );
        let log = Arc::new(Mutex::new(Vec::new()));

        let leader = {
            let coordinator = coordinator.clone();
            let log = log.clone();
            tokio::spawn(async move {
                coordinator
                    .recover(
                        RequestEnvelope::get("/x").with_bearer("old"),
                        expired(),
                        recording_replay(log),
                    )
                    .await
            })
        };
        while h.refresher.seen.lock().is_empty() {
            tokio::task::yield_now().await;
        }

        let err = coordinator
            .recover(
                RequestEnvelope::get("/slow").with_bearer("old"),
                expired(),
                recording_replay(log.clone()),
            )
            .await
            .unwrap_err();
        assert_eq!(err, ClientError::QueueTimeout);

        h.refresher.gate.notify_one();
        leader.await.unwrap().unwrap();
        assert_eq!(*log.lock(), vec!["/x"]);
    }

    #[tokio::test]
    async fn test_dropped_leader_releases_followers() {
        let h = harness(
            Ok(CredentialPair::new("new", "r2")),
            Some(CredentialPair::new("old", "r1")),
        );
        let log = Arc::new(Mutex::new(Vec::new()));

        let leader = {
            let coordinator = h.coordinator.clone();
            let log = log.clone();
            tokio::spawn(async move {
                coordinator
                    .recover(
                        RequestEnvelope::get("/x").with_bearer("old"),
                        expired(),
                        recording_replay(log),
                    )
                    .await
            })
        };
        while h.refresher.seen.lock().is_empty() {
            tokio::task::yield_now().await;
        }
        let follower = {
            let coordinator = h.coordinator.clone();
            let log = log.clone();
            tokio::spawn(async move {
                coordinator
                    .recover(
                        RequestEnvelope::get("/a").with_bearer("old"),
                        expired(),
                        recording_replay(log),
                    )
                    .await
            })
        };
        wait_until_queued(&h.coordinator, 1).await;

        leader.abort();
        let _ = leader.await;

        assert_eq!(follower.await.unwrap().unwrap_err(), ClientError::Cancelled);
        assert!(!h.coordinator.is_refreshing());
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn test_sign_out_during_refresh_discards_result() {
        let h = harness(
            Ok(CredentialPair::new("new", "r2")),
            Some(CredentialPair::new("old", "r1")),
        );
        let log = Arc::new(Mutex::new(Vec::new()));

        let leader = {
            let coordinator = h.coordinator.clone();
            let log = log.clone();
            tokio::spawn(async move {
                coordinator
                    .recover(
                        RequestEnvelope::get("/x").with_bearer("old"),
                        expired(),
                        recording_replay(log),
                    )
                    .await
            })
        };
        while h.refresher.seen.lock().is_empty() {
            tokio::task::yield_now().await;
        }
        let follower = {
            let coordinator = h.coordinator.clone();
            let log = log.clone();
            tokio::spawn(async move {
                coordinator
                    .recover(
                        RequestEnvelope::get("/a").with_bearer("old"),
                        expired(),
                        recording_replay(log),
                    )
                    .await
            })
        };
        wait_until_queued(&h.coordinator, 1).await;

        h.coordinator.sign_out().await;
        assert_eq!(follower.await.unwrap().unwrap_err(), ClientError::SignedOut);

        h.refresher.gate.notify_one();
        assert_eq!(leader.await.unwrap().unwrap_err(), ClientError::SignedOut);
        assert!(h.coordinator.session().current().is_none());
        assert!(h.store.snapshot().is_none());
        assert!(log.lock().is_empty());
        assert_eq!(h.signed_out.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sign_in_during_refresh_keeps_new_session() {
        let h = harness(
            Ok(CredentialPair::new("new", "r2")),
            Some(CredentialPair::new("old", "r1")),
        );
        let log = Arc::new(Mutex::new(Vec::new()));

        let leader = {
            let coordinator = h.coordinator.clone();
            let log = log.clone();
            tokio::spawn(async move {
                coordinator
                    .recover(
                        RequestEnvelope::get("/x").with_bearer("old"),
                        expired(),
                        recording_replay(log),
                    )
                    .await
            })
        };
        while h.refresher.seen.lock().is_empty() {
            tokio::task::yield_now().await;
        }
        let follower = {
            let coordinator = h.coordinator.clone();
            let log = log.clone();
            tokio::spawn(async move {
                coordinator
                    .recover(
                        RequestEnvelope::get("/a").with_bearer("old"),
                        expired(),
                        recording_replay(log),
                    )
                    .await
            })
        };
        wait_until_queued(&h.coordinator, 1).await;

        let signed_in = CredentialPair::new("signed-in", "rs");
        h.coordinator.install(signed_in.clone()).await.unwrap();
        assert_eq!(follower.await.unwrap().unwrap_err(), ClientError::Cancelled);

        h.refresher.gate.notify_one();
        assert_eq!(leader.await.unwrap().unwrap_err(), ClientError::SignedOut);

        assert_eq!(h.store.snapshot(), Some(signed_in));
        assert_eq!(
            h.coordinator.session().current().as_deref(),
            Some("signed-in")
        );
        assert!(!h.coordinator.is_refreshing());
        assert!(log.lock().is_empty());
        assert_eq!(h.signed_out.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_install_and_restore() {
        let h = harness(Ok(CredentialPair::new("new", "r2")), None);
        assert!(!h.coordinator.restore().await.unwrap());

        h.coordinator
            .install(CredentialPair::new("a", "r"))
            .await
            .unwrap();
        assert_eq!(h.store.snapshot(), Some(CredentialPair::new("a", "r")));
        assert_eq!(h.coordinator.epoch(), 1);

        h.coordinator.session().clear();
        assert!(h.coordinator.restore().await.unwrap());
        assert_eq!(h.coordinator.session().current().as_deref(), Some("a"));
    }
}
