use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::{header, HeaderMap};
use cookie::{Cookie, SameSite};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "newsroom_session";

/// Where a session stands with respect to the admin dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdminState {
    #[default]
    Unauthenticated,
    Idle,
    /// A fetch-and-analyze run is in flight for this session
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminEvent {
    Login { password_ok: bool },
    Logout,
    StartRun,
    FinishRun,
}

impl AdminState {
    /// Next state, or `None` if the event is not allowed here.
    ///
    /// A wrong password leaves the session where it was.
    pub fn apply(self, event: AdminEvent) -> Option<AdminState> {
        use AdminEvent::*;
        use AdminState::*;

        match (self, event) {
            (_, Logout) => Some(Unauthenticated),
            (Unauthenticated, Login { password_ok: true }) => Some(Idle),
            (Unauthenticated, Login { password_ok: false }) => Some(Unauthenticated),
            (Idle | Running, Login { .. }) => Some(self),
            (Idle, StartRun) => Some(Running),
            (Running, FinishRun) => Some(Idle),
            (Unauthenticated, StartRun | FinishRun) | (Idle, FinishRun) | (Running, StartRun) => {
                None
            }
        }
    }

    pub fn is_authenticated(self) -> bool {
        self != AdminState::Unauthenticated
    }
}

/// The admin screen a render pass produces. The public viewer at `/` has no
/// admin state and renders the same for every session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    AdminUnauthenticated,
    AdminIdle,
    AdminRunning,
}

impl Screen {
    pub fn admin(state: AdminState) -> Self {
        match state {
            AdminState::Unauthenticated => Screen::AdminUnauthenticated,
            AdminState::Idle => Screen::AdminIdle,
            AdminState::Running => Screen::AdminRunning,
        }
    }
}

/// A one-shot message shown on the next render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// CSS class: success, error, warning or info
    pub kind: &'static str,
    pub text: String,
}

impl Notice {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            kind: "success",
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            kind: "error",
            text: text.into(),
        }
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self {
            kind: "warning",
            text: text.into(),
        }
    }
}

/// State carried from one render pass to the next for a single browser.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    pub visit_counted: bool,
    pub admin: AdminState,
    pub notices: Vec<Notice>,
}

/// Sessions idle this long are dropped when a new one is created.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

struct Entry {
    context: SessionContext,
    last_seen: Instant,
}

impl Entry {
    fn new() -> Self {
        Self {
            context: SessionContext::default(),
            last_seen: Instant::now(),
        }
    }
}

#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<Uuid, Entry>>>,
    ttl: Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::with_ttl(DEFAULT_SESSION_TTL)
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// Returns the session named by the request cookie, creating one if the
    /// cookie is missing or unknown. The flag is true for a new session.
    pub async fn resolve(&self, headers: &HeaderMap) -> (Uuid, bool) {
        let mut sessions = self.sessions.write().await;
        if let Some(id) = session_id(headers) {
            if let Some(entry) = sessions.get_mut(&id) {
                entry.last_seen = Instant::now();
                return (id, false);
            }
        }

        let before = sessions.len();
        let ttl = self.ttl;
        sessions.retain(|_, entry| entry.last_seen.elapsed() < ttl);
        if sessions.len() < before {
            debug!("Evicted {} idle sessions", before - sessions.len());
        }

        let id = Uuid::new_v4();
        sessions.insert(id, Entry::new());
        (id, true)
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn get(&self, id: Uuid) -> SessionContext {
        self.sessions
            .read()
            .await
            .get(&id)
            .map(|entry| entry.context.clone())
            .unwrap_or_default()
    }

    /// Runs `f` on the session's context under the write lock.
    pub async fn update<R>(&self, id: Uuid, f: impl FnOnce(&mut SessionContext) -> R) -> R {
        let mut sessions = self.sessions.write().await;
        let entry = sessions.entry(id).or_insert_with(Entry::new);
        entry.last_seen = Instant::now();
        f(&mut entry.context)
    }

    /// Removes and returns the pending notices.
    pub async fn take_notices(&self, id: Uuid) -> Vec<Notice> {
        self.update(id, |s| std::mem::take(&mut s.notices)).await
    }

    pub async fn push_notice(&self, id: Uuid, notice: Notice) {
        self.update(id, |s| s.notices.push(notice)).await
    }

    /// Applies an admin event; returns the new state, or `None` if it was refused.
    pub async fn transition(&self, id: Uuid, event: AdminEvent) -> Option<AdminState> {
        self.update(id, |s| {
            let next = s.admin.apply(event)?;
            s.admin = next;
            Some(next)
        })
        .await
    }

    /// Marks the visit as counted. True only the first time for a session.
    pub async fn claim_visit(&self, id: Uuid) -> bool {
        self.update(id, |s| !std::mem::replace(&mut s.visit_counted, true))
            .await
    }
}

pub fn session_id(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|part| Cookie::parse(part.trim()).ok())
        .find(|c| c.name() == SESSION_COOKIE)
        .and_then(|c| Uuid::parse_str(c.value()).ok())
}

pub fn session_cookie(id: Uuid) -> String {
    Cookie::build(SESSION_COOKIE, id.to_string())
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .finish()
        .to_string()
}
