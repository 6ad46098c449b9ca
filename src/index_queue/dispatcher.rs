//! Dispatch boundary between the queue and the operations it runs.
//!
//! Queued rows name their target as a `(handler, method)` string pair. A
//! [`HandlerRegistry`] populated at startup resolves the handler name to a
//! [`JobHandler`], which maps the method name onto its own closed set of
//! operations. The scheduler itself never knows what operations exist.

use super::models::JobPayload;
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;

/// Errors from resolving a `(handler, method)` pair.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no handler registered under '{0}'")]
    UnknownHandler(String),
    #[error("handler '{handler}' has no method '{method}'")]
    UnknownMethod { handler: String, method: String },
}

/// The scheduler's view of job execution.
pub trait Dispatcher: Send + Sync {
    fn invoke(&self, handler: &str, method: &str, payload: &JobPayload) -> Result<()>;
}

/// One registered owner of queued operations.
///
/// Implementations match on `method` and return
/// [`DispatchError::UnknownMethod`] for names they do not know.
pub trait JobHandler: Send + Sync {
    fn invoke(&self, method: &str, payload: &JobPayload) -> Result<()>;
}

/// Startup-populated map from handler name to handler.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under a name. Last registration wins.
    pub fn register(&mut self, name: &str, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(name.to_string(), handler);
    }

    pub fn handler_names(&self) -> Vec<&str> {
        self.handlers.keys().map(|k| k.as_str()).collect()
    }
}

impl Dispatcher for HandlerRegistry {
    fn invoke(&self, handler: &str, method: &str, payload: &JobPayload) -> Result<()> {
        let target = self
            .handlers
            .get(handler)
            .ok_or_else(|| DispatchError::UnknownHandler(handler.to_string()))?;
        target.invoke(method, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::sync::Mutex;

    struct EchoHandler {
        calls: Mutex<Vec<String>>,
    }

    impl JobHandler for EchoHandler {
        fn invoke(&self, method: &str, _payload: &JobPayload) -> Result<()> {
            if method == "unsupported" {
                bail!(DispatchError::UnknownMethod {
                    handler: "echo".to_string(),
                    method: method.to_string(),
                });
            }
            self.calls.lock().unwrap().push(method.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_invoke_routes_to_registered_handler() {
        let handler = Arc::new(EchoHandler {
            calls: Mutex::new(Vec::new()),
        });
        let mut registry = HandlerRegistry::new();
        registry.register("echo", handler.clone());

        registry
            .invoke("echo", "index_entities", &JobPayload::new())
            .unwrap();

        assert_eq!(*handler.calls.lock().unwrap(), vec!["index_entities"]);
    }

    #[test]
    fn test_invoke_unknown_handler() {
        let registry = HandlerRegistry::new();
        let err = registry
            .invoke("missing", "index_entities", &JobPayload::new())
            .unwrap_err();
        assert!(err.to_string().contains("no handler registered"));
    }

    #[test]
    fn test_invoke_unknown_method_propagates() {
        let mut registry = HandlerRegistry::new();
        registry.register(
            "echo",
            Arc::new(EchoHandler {
                calls: Mutex::new(Vec::new()),
            }),
        );

        let err = registry
            .invoke("echo", "unsupported", &JobPayload::new())
            .unwrap_err();
        assert!(err.to_string().contains("no method"));
    }

    #[test]
    fn test_last_registration_wins() {
        let first = Arc::new(EchoHandler {
            calls: Mutex::new(Vec::new()),
        });
        let second = Arc::new(EchoHandler {
            calls: Mutex::new(Vec::new()),
        });
        let mut registry = HandlerRegistry::new();
        registry.register("echo", first.clone());
        registry.register("echo", second.clone());

        registry.invoke("echo", "apply_settings", &JobPayload::new()).unwrap();

        assert!(first.calls.lock().unwrap().is_empty());
        assert_eq!(*second.calls.lock().unwrap(), vec!["apply_settings"]);
    }
}
