use hyper::header::COOKIE;
use hyper::HeaderMap;
use std::collections::HashMap;
use std::sync::Mutex;

pub const SESSION_COOKIE: &str = "geocheckin_session";

/// What the visitor agreed to share
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Consent {
    /// Approximate location derived from the IP address
    pub ip: bool,
    /// Precise location reported by the browser
    pub browser: bool,
}

impl Consent {
    pub fn any(&self) -> bool {
        self.ip || self.browser
    }
}

/// Per-visitor context handed to the controller
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Session {
    consent: Consent,
    browser_granted: bool,
}

impl Session {
    pub fn consent(&self) -> Consent {
        self.consent
    }

    /// The browser already shared a position in this session
    pub fn browser_granted(&self) -> bool {
        self.browser_granted
    }

    pub fn grant(&mut self, consent: Consent) {
        self.consent = consent;
        if !consent.browser {
            self.browser_granted = false;
        }
    }

    pub fn withdraw(&mut self) {
        *self = Self::default();
    }

    pub(crate) fn mark_browser_granted(&mut self) {
        self.browser_granted = true;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    fn generate() -> Self {
        Self(format!("{:032x}", rand::random::<u128>()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Only ids we could have issued are accepted
    fn parse(value: &str) -> Option<Self> {
        (value.len() == 32 && value.bytes().all(|b| b.is_ascii_hexdigit()))
            .then(|| Self(value.to_owned()))
    }

    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == SESSION_COOKIE)
            .and_then(|(_, value)| Self::parse(value.trim()))
    }

    pub fn set_cookie(&self) -> String {
        format!("{SESSION_COOKIE}={}; Path=/; HttpOnly; SameSite=Lax", self.0)
    }
}

/// In-memory sessions; a lock is held only to copy a session in or out
#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<SessionId, Session>>,
}

impl SessionStore {
    /// Session for the request cookie, or a fresh one. The flag is `true` when the id is new
    /// and has to be sent back.
    pub fn load(&self, id: Option<SessionId>) -> (SessionId, Session, bool) {
        let mut sessions = self.lock();
        match id {
            Some(id) => match sessions.get(&id) {
                Some(session) => (id, session.clone(), false),
                // Unknown id, e.g. after a restart: keep it, start over
                None => {
                    sessions.insert(id.clone(), Session::default());
                    (id, Session::default(), false)
                }
            },
            None => {
                let id = SessionId::generate();
                sessions.insert(id.clone(), Session::default());
                (id, Session::default(), true)
            }
        }
    }

    pub fn save(&self, id: SessionId, session: Session) {
        self.lock().insert(id, session);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SessionId, Session>> {
        // Sessions are replaced whole, so a poisoned map is still consistent
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
