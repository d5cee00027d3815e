use std::sync::{Arc, RwLock};
use tracing::debug;

use crate::utils::fingerprint;

const BEARER_PREFIX: &str = "Bearer ";

/// Latest bearer credential supplied by the hosted content.
///
/// Last writer wins; readers always see a whole value.
#[derive(Debug, Default)]
pub struct TokenStore {
    current: RwLock<Option<Arc<str>>>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a credential, adding the `Bearer ` scheme when missing
    pub fn set(&self, token: &str) {
        let token = token.trim();
        let value: Arc<str> = if token.starts_with(BEARER_PREFIX) {
            Arc::from(token)
        } else {
            Arc::from(format!("{}{}", BEARER_PREFIX, token))
        };

        debug!(token = %fingerprint(&value), "Bearer credential updated");

        let mut current = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *current = Some(value);
    }

    pub fn get(&self) -> Option<Arc<str>> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}
