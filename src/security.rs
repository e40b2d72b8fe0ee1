//! Admin authentication primitives: constant-time PIN comparison and a
//! TTL-bounded in-process session-token store.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Constant-time byte comparison to prevent timing attacks.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Admin auth over a single shared PIN plus bearer session tokens.
///
/// `login` exchanges the PIN for a token; subsequent requests present the
/// token (or the raw PIN header). Tokens expire after the configured TTL
/// and expired entries are purged lazily on each check.
#[derive(Debug)]
pub struct AdminAuth {
    pin: String,
    session_ttl: Duration,
    sessions: Mutex<HashMap<String, Instant>>,
}

impl AdminAuth {
    pub fn new(pin: &str, session_ttl: Duration) -> Self {
        Self {
            pin: pin.to_owned(),
            session_ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Constant-time check of a presented PIN.
    pub fn pin_matches(&self, candidate: &str) -> bool {
        constant_time_eq(candidate.as_bytes(), self.pin.as_bytes())
    }

    /// Exchange a correct PIN for a fresh bearer token. Wrong PIN → `None`.
    pub fn login(&self, pin: &str) -> Option<String> {
        if !self.pin_matches(pin) {
            return None;
        }
        let token = Uuid::new_v4().simple().to_string();
        self.sessions.lock().insert(token.clone(), Instant::now());
        Some(token)
    }

    /// Whether a bearer token belongs to a live session.
    pub fn token_valid(&self, token: &str) -> bool {
        if token.is_empty() {
            return false;
        }
        let now = Instant::now();
        let mut sessions = self.sessions.lock();
        sessions.retain(|_, issued_at| now.duration_since(*issued_at) < self.session_ttl);
        sessions.contains_key(token)
    }
}
