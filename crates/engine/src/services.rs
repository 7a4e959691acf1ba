//! Named service registry for `call_service` actions.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use reflex_core::EngineError;

/// A callable service registered with the engine.
#[async_trait]
pub trait ServiceHandler: Send + Sync {
    async fn call(&self, method: &str, args: Value) -> Result<Value, EngineError>;
}

pub struct ServiceRegistry {
    services: RwLock<HashMap<String, Arc<dyn ServiceHandler>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
        }
    }

    /// Register a service, replacing any handler with the same name.
    pub fn register(&self, name: impl Into<String>, handler: Arc<dyn ServiceHandler>) {
        self.services
            .write()
            .expect("services lock poisoned")
            .insert(name.into(), handler);
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.services
            .write()
            .expect("services lock poisoned")
            .remove(name)
            .is_some()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .services
            .read()
            .expect("services lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Invoke a service method, with an optional timeout.
    ///
    /// A timeout failure surfaces as `action_timeout`; an unknown service
    /// is a `NotFound` the action executor wraps.
    pub async fn call(
        &self,
        service: &str,
        method: &str,
        args: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, EngineError> {
        let handler = self
            .services
            .read()
            .expect("services lock poisoned")
            .get(service)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("service '{}'", service)))?;

        match timeout {
            Some(limit) => tokio::time::timeout(limit, handler.call(method, args))
                .await
                .map_err(|_| EngineError::ActionFailed {
                    action_type: "call_service".to_string(),
                    message: format!("action_timeout after {}ms", limit.as_millis()),
                })?,
            None => handler.call(method, args).await,
        }
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
