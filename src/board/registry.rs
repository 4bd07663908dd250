//! Session-token connection registry for the board server
//!
//! One live connection per session token. The registry is an explicit object
//! handed to the routes that need it; registering a token a second time
//! replaces the earlier connection.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Failure to forward a command to a live connection
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ForwardError {
    /// No live connection for the token
    #[error("no connection for session {0}")]
    NotFound(String),

    /// The connection's outbound queue is gone
    #[error("connection for session {0} is closed")]
    Closed(String),
}

/// Registry mapping session tokens to outbound message senders
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<HashMap<String, mpsc::UnboundedSender<String>>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for a token, replacing any prior one
    pub fn register(&self, token: impl Into<String>, sender: mpsc::UnboundedSender<String>) {
        let token = token.into();
        let replaced = self.inner.write().insert(token.clone(), sender).is_some();
        if replaced {
            info!("Replaced existing connection for session {}", token);
        } else {
            info!("Registered connection for session {}", token);
        }
    }

    /// Remove the connection for a token
    pub fn unregister(&self, token: &str) {
        if self.inner.write().remove(token).is_some() {
            info!("Unregistered connection for session {}", token);
        }
    }

    /// Remove the connection for a token only if it still belongs to `sender`
    ///
    /// A replaced connection must not tear down its replacement on the way
    /// out.
    pub fn unregister_sender(&self, token: &str, sender: &mpsc::UnboundedSender<String>) {
        let mut map = self.inner.write();
        let owns_entry = map
            .get(token)
            .map(|current| current.same_channel(sender))
            .unwrap_or(false);
        if owns_entry {
            map.remove(token);
            info!("Unregistered connection for session {}", token);
        }
    }

    /// Check if a token has a live connection
    pub fn contains(&self, token: &str) -> bool {
        self.inner.read().contains_key(token)
    }

    /// Number of live connections
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Check if there are no live connections
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Forward a JSON payload to the connection for a token
    pub fn forward(&self, token: &str, payload: &Value) -> Result<(), ForwardError> {
        let sender = self
            .inner
            .read()
            .get(token)
            .cloned()
            .ok_or_else(|| ForwardError::NotFound(token.to_string()))?;

        sender
            .send(payload.to_string())
            .map_err(|_| ForwardError::Closed(token.to_string()))?;
        debug!("Forwarded payload to session {}", token);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_register_and_forward() {
        let registry = ConnectionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register("abc", tx);

        assert!(registry.contains("abc"));
        assert_eq!(registry.len(), 1);

        let payload = json!({"cmd": "clearCanvas", "args": {}});
        registry.forward("abc", &payload).unwrap();

        let received = rx.try_recv().unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(&received).unwrap(),
            payload
        );
    }

    #[test]
    fn test_forward_to_unknown_token() {
        let registry = ConnectionRegistry::new();
        let result = registry.forward("missing", &json!({}));
        assert_eq!(result, Err(ForwardError::NotFound("missing".into())));
    }

    #[test]
    fn test_forward_to_dropped_connection() {
        let registry = ConnectionRegistry::new();
        let (tx, rx) = mpsc::unbounded_channel::<String>();
        registry.register("abc", tx);
        drop(rx);

        let result = registry.forward("abc", &json!({}));
        assert_eq!(result, Err(ForwardError::Closed("abc".into())));
    }

    #[test]
    fn test_unregister() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.register("abc", tx);
        registry.unregister("abc");
        assert!(!registry.contains("abc"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unregister_sender_spares_replacement() {
        let registry = ConnectionRegistry::new();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        registry.register("abc", tx1.clone());
        registry.register("abc", tx2);

        // The replaced connection leaves; the replacement must survive
        registry.unregister_sender("abc", &tx1);
        assert!(registry.contains("abc"));
    }

    #[test]
    fn test_register_replaces_prior_connection() {
        let registry = ConnectionRegistry::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        registry.register("abc", tx1);
        registry.register("abc", tx2);

        registry.forward("abc", &json!({"n": 1})).unwrap();
        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_ok());
        assert_eq!(registry.len(), 1);
    }
}
