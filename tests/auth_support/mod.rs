#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use unchained::api::DebridApi;
use unchained::auth::{
    AuthError, ControllerSettings, DeviceCodePoll, DeviceCodeSession, MemoryTokenStore,
    SessionController, Token,
};
use unchained::user::{AccountType, User};

/// `DebridApi` double with scripted answers and call counters.
///
/// Polls are answered from a queue; an empty queue answers `Pending`.
pub struct ScriptedApi {
    device_code: Mutex<Result<DeviceCodeSession, AuthError>>,
    polls: Mutex<VecDeque<Result<DeviceCodePoll, AuthError>>>,
    poll_delay: Mutex<Duration>,
    refresh: Mutex<Result<Token, AuthError>>,
    refresh_delay: Mutex<Duration>,
    user: Mutex<Result<User, AuthError>>,
    device_code_calls: AtomicUsize,
    poll_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    user_calls: AtomicUsize,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self {
            device_code: Mutex::new(Ok(device_session(5, 60))),
            polls: Mutex::new(VecDeque::new()),
            poll_delay: Mutex::new(Duration::ZERO),
            refresh: Mutex::new(Ok(open_token("refreshed-access", 3600))),
            refresh_delay: Mutex::new(Duration::ZERO),
            user: Mutex::new(Ok(sample_user())),
            device_code_calls: AtomicUsize::new(0),
            poll_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            user_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_device_code(&self, result: Result<DeviceCodeSession, AuthError>) {
        *self.device_code.lock().expect("lock") = result;
    }

    pub fn push_poll(&self, result: Result<DeviceCodePoll, AuthError>) {
        self.polls.lock().expect("lock").push_back(result);
    }

    pub fn set_poll_delay(&self, delay: Duration) {
        *self.poll_delay.lock().expect("lock") = delay;
    }

    pub fn set_refresh(&self, result: Result<Token, AuthError>) {
        *self.refresh.lock().expect("lock") = result;
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.refresh_delay.lock().expect("lock") = delay;
    }

    pub fn set_user(&self, result: Result<User, AuthError>) {
        *self.user.lock().expect("lock") = result;
    }

    pub fn device_code_calls(&self) -> usize {
        self.device_code_calls.load(Ordering::SeqCst)
    }

    pub fn poll_calls(&self) -> usize {
        self.poll_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn user_calls(&self) -> usize {
        self.user_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DebridApi for ScriptedApi {
    async fn request_device_code(&self) -> Result<DeviceCodeSession, AuthError> {
        self.device_code_calls.fetch_add(1, Ordering::SeqCst);
        self.device_code.lock().expect("lock").clone()
    }

    async fn poll_device_code(
        &self,
        _session: &DeviceCodeSession,
    ) -> Result<DeviceCodePoll, AuthError> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.poll_delay.lock().expect("lock");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.polls
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or(Ok(DeviceCodePoll::Pending))
    }

    async fn refresh_token(&self, _token: &Token) -> Result<Token, AuthError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.refresh_delay.lock().expect("lock");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.refresh.lock().expect("lock").clone()
    }

    async fn fetch_user(&self, _token: &Token) -> Result<User, AuthError> {
        self.user_calls.fetch_add(1, Ordering::SeqCst);
        self.user.lock().expect("lock").clone()
    }
}

pub struct Harness {
    pub api: Arc<ScriptedApi>,
    pub store: Arc<MemoryTokenStore>,
    pub controller: SessionController,
}

/// Controller over a scripted API and an in-memory store. Auto refresh is
/// off unless `settings` turns it on.
pub fn harness_with(store: MemoryTokenStore, settings: ControllerSettings) -> Harness {
    let api = Arc::new(ScriptedApi::new());
    let store = Arc::new(store);
    let controller = SessionController::new(api.clone(), store.clone(), settings);
    Harness {
        api,
        store,
        controller,
    }
}

pub fn harness() -> Harness {
    harness_with(MemoryTokenStore::new(), manual_refresh())
}

pub fn manual_refresh() -> ControllerSettings {
    ControllerSettings::builder().auto_refresh(false).build()
}

pub fn device_session(interval_secs: u64, expires_in_secs: u64) -> DeviceCodeSession {
    DeviceCodeSession::new(
        "device-123",
        "ABCD1234",
        "https://real-debrid.com/device",
        interval_secs,
        expires_in_secs,
    )
    .expect("valid device code lifetime")
}

pub fn open_token(access_token: &str, expires_in_secs: i64) -> Token {
    Token::open(
        access_token,
        Some(format!("{access_token}-refresh")),
        Some(expires_in_secs),
    )
    .expect("valid token expiry")
}

pub fn sample_user() -> User {
    User {
        id: 42,
        username: "hippo".to_string(),
        email: "hippo@example.com".to_string(),
        points: 1200,
        locale: "en".to_string(),
        avatar: String::new(),
        account_type: AccountType::Premium,
        premium: 30 * 86_400,
        expiration: None,
    }
}

/// Let spawned observer tasks catch up on a current-thread runtime.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
