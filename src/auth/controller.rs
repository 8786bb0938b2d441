//! Authentication session controller.
//!
//! Owns the [`AuthState`] machine and everything that moves it:
//! - [`SessionController::begin_login`]: device-code login with background polling
//! - [`SessionController::submit_private_token`]: login with a user-supplied token
//! - [`SessionController::resume`]: check a token saved by an earlier run
//! - [`SessionController::refresh_token`]: single-flight refresh of an open token
//! - [`SessionController::logout`]: drop the session and return to `Start`
//!
//! Observers receive one [`StateEvent`] per transition through
//! [`SessionController::observe`].

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bon::Builder;
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::{broadcast, watch, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::device_code::{DeviceCodePoll, DeviceCodeSession, SLOW_DOWN_STEP};
use super::error::AuthError;
use super::event::StateEvent;
use super::state::{AuthEvent, AuthState, FailureReason};
use super::store::TokenStore;
use super::subscription::Subscription;
use super::token::Token;
use crate::api::DebridApi;
use crate::user::User;

const TRANSITION_BUFFER: usize = 64;
/// Upper bound for how long one device code is polled.
const MAX_CODE_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

type SharedRefresh = Shared<BoxFuture<'static, Result<Token, AuthError>>>;

/// Tuning for [`SessionController`].
///
/// # Example
/// ```
/// use std::time::Duration;
/// use unchained::auth::ControllerSettings;
///
/// let settings = ControllerSettings::builder()
///     .refresh_margin(Duration::from_secs(120))
///     .auto_refresh(false)
///     .build();
/// assert_eq!(settings.min_poll_interval, Duration::from_secs(1));
/// ```
#[derive(Debug, Clone, Builder)]
pub struct ControllerSettings {
    /// Refresh an open token this long before it expires.
    #[builder(default = Duration::from_secs(300))]
    pub refresh_margin: Duration,
    /// Schedule a refresh whenever an expiring open token becomes current.
    #[builder(default = true)]
    pub auto_refresh: bool,
    /// Lower bound for the device-code poll interval.
    #[builder(default = Duration::from_secs(1))]
    pub min_poll_interval: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Drives the debrid authentication flow.
///
/// Cloning is cheap; clones share one state machine. Background work stops
/// when the last clone is dropped.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use unchained::api::{ClientCredentials, HttpDebridApi};
/// use unchained::auth::{ControllerSettings, FileTokenStore, SessionController};
///
/// # async fn example() -> Result<(), unchained::auth::AuthError> {
/// let controller = SessionController::new(
///     Arc::new(HttpDebridApi::new(ClientCredentials::new("X245A4XAIBGVM"))),
///     Arc::new(FileTokenStore::new_default()),
///     ControllerSettings::default(),
/// );
/// let subscription = controller.observe(|event| println!("auth state: {}", event.peek()));
/// let session = controller.begin_login().await?;
/// println!("Visit {} and enter {}", session.verification_url, session.user_code);
/// let settled = controller.wait_for(|state| !state.is_in_progress()).await;
/// println!("login finished in {settled}");
/// subscription.release();
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
    _lifetime: Arc<ShutdownOnDrop>,
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("state", &self.current_state())
            .field("settings", &self.inner.settings)
            .finish()
    }
}

impl SessionController {
    pub fn new(
        api: Arc<dyn DebridApi>,
        store: Arc<dyn TokenStore>,
        settings: ControllerSettings,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let initial = Arc::new(StateEvent::new(0, AuthState::Start));
        let (latest, _) = watch::channel(initial);
        let (transitions, _) = broadcast::channel(TRANSITION_BUFFER);
        let inner = Arc::new(Inner {
            api,
            store,
            settings,
            core: Mutex::new(Core {
                state: AuthState::Start,
                seq: 0,
                epoch: 0,
                token: None,
                user: None,
                background: shutdown.child_token(),
                refresh_timer: None,
            }),
            latest,
            transitions,
            ops: tokio::sync::Mutex::new(()),
            refresh: tokio::sync::Mutex::new(None),
            poll_now: Notify::new(),
            shutdown: shutdown.clone(),
        });
        Self {
            inner,
            _lifetime: Arc::new(ShutdownOnDrop(shutdown)),
        }
    }

    pub fn current_state(&self) -> AuthState {
        self.inner.core().state
    }

    /// Latest transition, most recent value first on subscribe.
    ///
    /// Intermediate transitions may be coalesced; use
    /// [`observe`](Self::observe) to see every one.
    pub fn watch(&self) -> watch::Receiver<Arc<StateEvent>> {
        self.inner.latest.subscribe()
    }

    /// Register `on_change` for state events.
    ///
    /// The current event is delivered first, then every later transition in
    /// order. Must be called inside a tokio runtime.
    pub fn observe<F>(&self, on_change: F) -> Subscription
    where
        F: Fn(Arc<StateEvent>) + Send + 'static,
    {
        // Under the core lock no transition can land between the snapshot
        // and the subscription.
        let (current, mut transitions, latest) = {
            let _core = self.inner.core();
            let latest = self.inner.latest.subscribe();
            let current = latest.borrow().clone();
            (current, self.inner.transitions.subscribe(), latest)
        };
        let task = tokio::spawn(async move {
            let mut last_seq = current.seq();
            on_change(current);
            loop {
                match transitions.recv().await {
                    Ok(event) => {
                        if event.seq() > last_seq {
                            last_seq = event.seq();
                            on_change(event);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "auth observer lagged, delivering latest state");
                        let current = latest.borrow().clone();
                        if current.seq() > last_seq {
                            last_seq = current.seq();
                            on_change(current);
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Subscription::new(task)
    }

    /// Wait until the current state satisfies `predicate`.
    pub async fn wait_for<F>(&self, predicate: F) -> AuthState
    where
        F: Fn(&AuthState) -> bool,
    {
        let mut rx = self.inner.latest.subscribe();
        let settled = match rx.wait_for(|event| predicate(&event.peek())).await {
            Ok(event) => event.peek(),
            Err(_) => self.current_state(),
        };
        settled
    }

    /// Start a device-code login.
    ///
    /// Any existing session is dropped first. On success the controller is
    /// in `WaitingUserConfirmation` and polls in the background until the
    /// user approves, the code expires, or the flow fails.
    ///
    /// # Errors
    ///
    /// Returns the request error after moving to `WaitingUserAction` when the
    /// device code cannot be obtained.
    pub async fn begin_login(&self) -> Result<DeviceCodeSession, AuthError> {
        let _op = self.inner.ops.lock().await;
        self.inner.reset_to_start()?;
        self.inner.commit(None, AuthEvent::BeginLogin, SessionUpdate::none())?;
        let epoch = self.inner.epoch();

        let session = match self.inner.api.request_device_code().await {
            Ok(session) => session,
            Err(err) => {
                warn!(error = %err, "device code request failed");
                self.inner.fail(epoch, &err);
                return Err(err);
            }
        };

        self.inner.commit(
            Some(epoch),
            AuthEvent::DeviceCodeReceived,
            SessionUpdate::none(),
        )?;
        // Drop a confirmation left over from an earlier flow.
        let _ = self.inner.poll_now.notified().now_or_never();
        let cancel = self.inner.background_token();
        let inner = Arc::clone(&self.inner);
        let polled = session.clone();
        tokio::spawn(async move { inner.poll_until_settled(epoch, cancel, polled).await });
        Ok(session)
    }

    /// The user reports having entered the code; poll without waiting for
    /// the rest of the interval.
    ///
    /// A confirmation that arrives while a poll is in flight triggers the
    /// next poll right after it.
    pub fn confirm_code(&self) {
        self.inner.poll_now.notify_one();
    }

    /// Log in with a token pasted by the user. Never touches the device flow.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::NotLoggedIn`] for a blank token, or the storage
    /// error when it cannot be saved.
    pub async fn submit_private_token(
        &self,
        token: impl Into<String>,
    ) -> Result<AuthState, AuthError> {
        let token = token.into().trim().to_string();
        if token.is_empty() {
            return Err(AuthError::NotLoggedIn);
        }
        let _op = self.inner.ops.lock().await;
        self.inner.reset_to_start()?;
        self.inner.commit(
            None,
            AuthEvent::SubmitPrivateToken,
            SessionUpdate::token(Token::private(token)),
        )?;
        let epoch = self.inner.epoch();
        Ok(self.inner.check_credentials(epoch).await)
    }

    /// Check a token saved by an earlier run.
    ///
    /// Acts from `Start`, or retries after a network failure; with nothing
    /// saved the controller stays where it is.
    pub async fn resume(&self) -> Result<AuthState, AuthError> {
        let _op = self.inner.ops.lock().await;
        let current = self.current_state();
        if current.transition(&AuthEvent::ResumeSession).is_none() {
            return Ok(current);
        }
        if matches!(self.inner.store.get(), Ok(None)) {
            debug!("no saved token to resume");
            return Ok(current);
        }
        self.inner
            .commit(None, AuthEvent::ResumeSession, SessionUpdate::none())?;
        let epoch = self.inner.epoch();
        Ok(self.inner.check_credentials(epoch).await)
    }

    /// Refresh the open token.
    ///
    /// Overlapping calls share one request and receive the same result.
    pub async fn refresh_token(&self) -> Result<Token, AuthError> {
        self.inner.refresh_shared().await
    }

    /// Current access token, refreshed first when it is about to expire.
    pub async fn access_token(&self) -> Result<String, AuthError> {
        Ok(self.inner.valid_token().await?.access_token)
    }

    /// Fetch the user profile and cache it.
    pub async fn fetch_user(&self) -> Result<User, AuthError> {
        let token = self.inner.valid_token().await?;
        let epoch = self.inner.epoch();
        let user = self.inner.api.fetch_user(&token).await?;
        let mut core = self.inner.core();
        if core.epoch == epoch && core.state.is_authenticated() {
            core.user = Some(user.clone());
        }
        Ok(user)
    }

    pub fn cached_user(&self) -> Option<User> {
        self.inner.core().user.clone()
    }

    pub fn is_token_private(&self) -> Result<bool, AuthError> {
        self.inner.store.is_private()
    }

    /// Drop the session: `StartNewLogin`, then `Start`.
    pub async fn start_new_login(&self) -> Result<(), AuthError> {
        let _op = self.inner.ops.lock().await;
        self.inner.reset()
    }

    pub async fn logout(&self) -> Result<(), AuthError> {
        info!("logging out");
        self.start_new_login().await
    }
}

struct ShutdownOnDrop(CancellationToken);

impl Drop for ShutdownOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

struct Core {
    state: AuthState,
    seq: u64,
    /// Bumped whenever the session is invalidated; background work tagged
    /// with an older epoch cannot commit.
    epoch: u64,
    token: Option<Token>,
    user: Option<User>,
    background: CancellationToken,
    refresh_timer: Option<CancellationToken>,
}

#[derive(Default)]
struct SessionUpdate {
    token: Option<Token>,
    user: Option<User>,
}

impl SessionUpdate {
    fn none() -> Self {
        Self::default()
    }

    fn token(token: Token) -> Self {
        Self {
            token: Some(token),
            user: None,
        }
    }

    fn with_user(mut self, user: User) -> Self {
        self.user = Some(user);
        self
    }
}

struct Inner {
    api: Arc<dyn DebridApi>,
    store: Arc<dyn TokenStore>,
    settings: ControllerSettings,
    core: Mutex<Core>,
    latest: watch::Sender<Arc<StateEvent>>,
    transitions: broadcast::Sender<Arc<StateEvent>>,
    ops: tokio::sync::Mutex<()>,
    refresh: tokio::sync::Mutex<Option<SharedRefresh>>,
    poll_now: Notify,
    shutdown: CancellationToken,
}

impl Inner {
    fn core(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn epoch(&self) -> u64 {
        self.core().epoch
    }

    fn background_token(&self) -> CancellationToken {
        self.core().background.child_token()
    }

    /// Apply `event` and its side effects in one critical section.
    fn commit(
        self: &Arc<Self>,
        epoch: Option<u64>,
        event: AuthEvent,
        update: SessionUpdate,
    ) -> Result<AuthState, AuthError> {
        let mut core = self.core();
        if let Some(epoch) = epoch {
            if epoch != core.epoch {
                debug!(%event, epoch, current_epoch = core.epoch, "dropping event from a superseded flow");
                return Err(AuthError::Cancelled);
            }
        }
        let from = core.state;
        let next = from
            .transition(&event)
            .ok_or_else(|| AuthError::InvalidTransition {
                from: from.to_string(),
                event: event.to_string(),
            })?;

        if let Some(token) = update.token {
            if let Err(err) = self.store.set(&token) {
                warn!(error = %err, "could not persist token");
                let failed = AuthEvent::Failed(FailureReason::Storage);
                if let Some(next) = from.transition(&failed) {
                    self.enter(&mut core, next, failed);
                }
                return Err(err);
            }
            core.token = Some(token);
        }
        if let Some(user) = update.user {
            core.user = Some(user);
        }
        self.enter(&mut core, next, event);
        Ok(next)
    }

    fn enter(self: &Arc<Self>, core: &mut Core, next: AuthState, event: AuthEvent) {
        let from = core.state;
        if next.invalidates_session() {
            core.token = None;
            core.user = None;
            core.background.cancel();
            core.background = self.shutdown.child_token();
            core.refresh_timer = None;
            core.epoch += 1;
            let keep_stored = matches!(next, AuthState::WaitingUserAction(reason) if reason.keeps_stored_token());
            if !keep_stored {
                if let Err(err) = self.store.clear() {
                    warn!(error = %err, "could not clear stored token");
                }
            }
        }
        core.state = next;
        core.seq += 1;
        debug!(%from, %event, to = %next, epoch = core.epoch, "auth transition");

        let published = Arc::new(StateEvent::new(core.seq, next));
        self.latest.send_replace(Arc::clone(&published));
        let _ = self.transitions.send(published);

        if next == AuthState::AuthenticatedOpenToken && self.settings.auto_refresh {
            self.schedule_refresh(core);
        }
    }

    fn fail(self: &Arc<Self>, epoch: u64, err: &AuthError) {
        let reason = err.reason();
        if let Err(commit_err) =
            self.commit(Some(epoch), AuthEvent::Failed(reason), SessionUpdate::none())
        {
            debug!(error = %commit_err, %reason, "failure not applied");
        }
    }

    fn reset(self: &Arc<Self>) -> Result<(), AuthError> {
        self.commit(None, AuthEvent::NewLogin, SessionUpdate::none())?;
        self.commit(None, AuthEvent::LoginReset, SessionUpdate::none())?;
        Ok(())
    }

    fn reset_to_start(self: &Arc<Self>) -> Result<(), AuthError> {
        if self.core().state == AuthState::Start {
            return Ok(());
        }
        self.reset()
    }

    fn schedule_refresh(self: &Arc<Self>, core: &mut Core) {
        let Some(expires_at) = core
            .token
            .as_ref()
            .filter(|token| token.is_refreshable())
            .and_then(|token| token.expires_at)
        else {
            return;
        };
        let margin = chrono::Duration::from_std(self.settings.refresh_margin)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let delay = expires_at
            .checked_sub_signed(margin)
            .and_then(|refresh_at| (refresh_at - Utc::now()).to_std().ok())
            .unwrap_or(Duration::ZERO);

        if let Some(previous) = core.refresh_timer.take() {
            previous.cancel();
        }
        let cancel = core.background.child_token();
        core.refresh_timer = Some(cancel.clone());
        debug!(delay_secs = delay.as_secs(), "scheduled token refresh");

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            if let Err(err) = inner.refresh_shared().await {
                debug!(error = %err, "scheduled refresh did not complete");
            }
        });
    }

    async fn refresh_shared(self: &Arc<Self>) -> Result<Token, AuthError> {
        let shared = {
            let mut slot = self.refresh.lock().await;
            match slot.as_ref() {
                Some(inflight) if inflight.peek().is_none() => inflight.clone(),
                _ => {
                    let inner = Arc::clone(self);
                    let fresh = async move { inner.run_refresh().await }.boxed().shared();
                    *slot = Some(fresh.clone());
                    fresh
                }
            }
        };
        shared.await
    }

    async fn run_refresh(self: Arc<Self>) -> Result<Token, AuthError> {
        let (epoch, token) = {
            let core = self.core();
            let token = core.token.clone().ok_or(AuthError::NotLoggedIn)?;
            (core.epoch, token)
        };
        if !token.is_refreshable() {
            return Err(AuthError::NotRefreshable);
        }
        self.commit(Some(epoch), AuthEvent::TokenExpiring, SessionUpdate::none())?;

        match self.api.refresh_token(&token).await {
            Ok(fresh) => {
                self.commit(
                    Some(epoch),
                    AuthEvent::RefreshSucceeded,
                    SessionUpdate::token(fresh.clone()),
                )?;
                info!("open token refreshed");
                Ok(fresh)
            }
            Err(err) => {
                warn!(error = %err, "token refresh failed");
                self.fail(epoch, &err);
                Err(err)
            }
        }
    }

    async fn valid_token(self: &Arc<Self>) -> Result<Token, AuthError> {
        let (state, token) = {
            let core = self.core();
            (core.state, core.token.clone())
        };
        match state {
            AuthState::RefreshingOpenToken => return self.refresh_shared().await,
            AuthState::AuthenticatedOpenToken | AuthState::AuthenticatedPrivateToken => {}
            _ => return Err(AuthError::NotLoggedIn),
        }
        let token = token.ok_or(AuthError::NotLoggedIn)?;
        let margin = chrono::Duration::from_std(self.settings.refresh_margin)
            .unwrap_or_else(|_| chrono::Duration::zero());
        if token.is_refreshable() && token.expires_within(margin, Utc::now()) {
            return self.refresh_shared().await;
        }
        Ok(token)
    }

    /// Verify the stored token by fetching the user profile.
    async fn check_credentials(self: &Arc<Self>, epoch: u64) -> AuthState {
        match self.verify_stored_token().await {
            Ok((token, user)) => {
                let event = if token.is_private() {
                    AuthEvent::PrivateTokenValid
                } else {
                    AuthEvent::OpenTokenValid
                };
                let update = SessionUpdate::token(token).with_user(user);
                if let Err(err) = self.commit(Some(epoch), event, update) {
                    debug!(error = %err, "credential check superseded");
                }
            }
            Err(err) => {
                warn!(error = %err, reason = %err.reason(), "credential check failed");
                self.fail(epoch, &err);
            }
        }
        self.core().state
    }

    async fn verify_stored_token(&self) -> Result<(Token, User), AuthError> {
        let mut token = self.store.get()?.ok_or(AuthError::NotLoggedIn)?;
        if !token.is_private() && token.is_expired(Utc::now()) {
            if !token.is_refreshable() {
                return Err(AuthError::NotRefreshable);
            }
            debug!("saved open token expired, refreshing before check");
            token = self.api.refresh_token(&token).await?;
        }
        let user = self.api.fetch_user(&token).await?;
        Ok((token, user))
    }

    async fn poll_until_settled(
        self: Arc<Self>,
        epoch: u64,
        cancel: CancellationToken,
        session: DeviceCodeSession,
    ) {
        let started = Instant::now();
        let lifetime = session.lifetime().min(MAX_CODE_LIFETIME);
        let deadline = started
            .checked_add(lifetime)
            .unwrap_or_else(|| started + self.settings.min_poll_interval);
        let mut interval = session.interval().max(self.settings.min_poll_interval);

        let outcome = loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep_until(deadline) => {}
                _ = tokio::time::sleep(interval) => {}
                _ = self.poll_now.notified() => {}
            }
            if Instant::now() >= deadline {
                break Err(AuthError::ExpiredCode);
            }
            let poll = tokio::select! {
                _ = cancel.cancelled() => return,
                result = self.api.poll_device_code(&session) => result,
            };
            match poll {
                Ok(DeviceCodePoll::Pending) => continue,
                Ok(DeviceCodePoll::SlowDown { interval_secs }) => {
                    interval = interval
                        .saturating_add(SLOW_DOWN_STEP)
                        .max(Duration::from_secs(interval_secs));
                    debug!(interval_secs = interval.as_secs(), "device code poll slowed down");
                }
                Ok(DeviceCodePoll::Authorized { token }) => break Ok(token),
                Ok(DeviceCodePoll::AccessDenied) => break Err(AuthError::Denied),
                Ok(DeviceCodePoll::Expired) => break Err(AuthError::ExpiredCode),
                Err(err) => break Err(err),
            }
        };

        match outcome {
            Ok(token) => {
                info!("device code approved");
                if self
                    .commit(Some(epoch), AuthEvent::UserApproved, SessionUpdate::token(token))
                    .is_ok()
                {
                    self.check_credentials(epoch).await;
                }
            }
            Err(err) => {
                warn!(error = %err, "device code flow ended without approval");
                self.fail(epoch, &err);
            }
        }
    }
}
