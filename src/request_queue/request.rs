use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Where a request sits in the engine's processing lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestState {
    Unprocessed,
    RequestHandler,
    ErrorHandler,
    Done,
    Failed,
}

/// A single unit of crawl work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: Uuid,
    pub url: String,
    /// Post-redirect URL, filled in once the transport resolves it.
    pub loaded_url: Option<String>,
    pub method: String,
    pub payload: Option<Vec<u8>>,
    pub headers: HashMap<String, String>,
    pub user_data: Value,
    pub label: Option<String>,
    pub retry_count: u32,
    pub max_retries: Option<u32>,
    pub no_retry: bool,
    pub error_messages: Vec<String>,
    pub state: RequestState,
    pub session_rotation_count: u32,
    /// Overrides the default dedup key derived from url+method+payload.
    pub unique_key: Option<String>,
}

impl Request {
    pub fn new(url: String) -> Self {
        let mut request = Request {
            id: Uuid::nil(),
            url,
            loaded_url: None,
            method: "GET".to_string(),
            payload: None,
            headers: HashMap::new(),
            user_data: Value::Null,
            label: None,
            retry_count: 0,
            max_retries: None,
            no_retry: false,
            error_messages: Vec::new(),
            state: RequestState::Unprocessed,
            session_rotation_count: 0,
            unique_key: None,
        };
        request.sync_id();
        request
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_user_data(mut self, user_data: Value) -> Self {
        self.user_data = user_data;
        self
    }

    /// Effective retry budget: per-request override if set, otherwise the
    /// caller-supplied default.
    pub fn effective_max_retries(&self, default_max_retries: u32) -> u32 {
        self.max_retries.unwrap_or(default_max_retries)
    }

    pub fn is_retry_budget_exhausted(&self, default_max_retries: u32) -> bool {
        self.no_retry || self.retry_count >= self.effective_max_retries(default_max_retries)
    }

    pub fn push_error(&mut self, message: impl Into<String>) {
        self.error_messages.push(message.into());
    }

    /// Stable fingerprint used for queue deduplication: the explicit
    /// `unique_key` if the caller set one, otherwise a hash of method, url
    /// and payload.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        match &self.unique_key {
            Some(key) => key.hash(&mut hasher),
            None => {
                self.method.hash(&mut hasher);
                self.url.hash(&mut hasher);
                self.payload.hash(&mut hasher);
            }
        }
        hasher.finish()
    }

    /// Recomputes `id` from the current fingerprint. `Request::new` calls
    /// this once; the queue calls it again before dedup so a caller who sets
    /// `unique_key` after construction still gets an id consistent with it.
    pub(crate) fn sync_id(&mut self) {
        let fingerprint = self.fingerprint();
        self.id = Uuid::from_u64_pair(fingerprint, fingerprint);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_ignores_unrelated_fields() {
        let mut a = Request::new("https://example.com".to_string());
        let mut b = Request::new("https://example.com".to_string());
        a.retry_count = 3;
        b.label = Some("x".to_string());
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn unique_key_override_changes_fingerprint() {
        let mut a = Request::new("https://example.com".to_string());
        let mut b = Request::new("https://example.com".to_string());
        a.unique_key = Some("a".to_string());
        b.unique_key = Some("b".to_string());
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
