use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// In-memory per-browser key/value store correlated via the session
/// cookie. Values live for the configured TTL, refreshed on write.
#[derive(Debug)]
pub struct SessionStore {
    entries: Mutex<HashMap<String, SessionEntry>>,
    ttl: Duration,
}

#[derive(Debug)]
struct SessionEntry {
    values: HashMap<String, String>,
    expires_at: Instant,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub async fn get(&self, session_id: &str, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        match entries.get(session_id) {
            Some(entry) if entry.expires_at > now => entry.values.get(key).cloned(),
            Some(_) => {
                entries.remove(session_id);
                None
            }
            None => None,
        }
    }

    pub async fn put(&self, session_id: &str, key: &str, value: &str) {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let entry = entries
            .entry(session_id.to_string())
            .or_insert_with(|| SessionEntry {
                values: HashMap::new(),
                expires_at: now + self.ttl,
            });
        if entry.expires_at <= now {
            entry.values.clear();
        }
        entry.values.insert(key.to_string(), value.to_string());
        entry.expires_at = now + self.ttl;
    }

    /// Removes the given keys. Absent keys and absent sessions are fine.
    pub async fn remove(&self, session_id: &str, keys: &[&str]) {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(session_id) {
            for key in keys {
                entry.values.remove(*key);
            }
        }
    }

    /// 清理过期会话。
    pub async fn prune_expired(&self) {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        entries.retain(|_, entry| entry.expires_at > now);
    }
}
