//! Service catalog.
//!
//! Service definitions and tokens are owned by the external publishing
//! workflow. The gateway reads them through [`ServiceCatalog`];
//! [`MemoryCatalog`] keeps them in process for embedders and tests.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::info;

use crate::Result;
use crate::types::ServiceDefinition;

/// Read access to published services.
#[async_trait]
pub trait ServiceCatalog: Send + Sync {
    /// Look up a published service. `None` when it does not exist.
    async fn service(&self, service_id: &str) -> Result<Option<Arc<ServiceDefinition>>>;

    /// Whether `token` grants access to `service_id`.
    async fn verify_token(&self, service_id: &str, token: &str) -> Result<bool>;
}

/// In-memory catalog.
#[derive(Default)]
pub struct MemoryCatalog {
    services: DashMap<String, Arc<ServiceDefinition>>,
    tokens: DashMap<String, HashSet<String>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish or replace a service. Returns the previous definition.
    ///
    /// Rejects definitions whose declared cell addresses do not parse.
    pub fn publish(&self, service: ServiceDefinition) -> Result<Option<Arc<ServiceDefinition>>> {
        service.validate_addresses()?;
        info!(service_id = %service.service_id, version = service.version, "publishing service");
        Ok(self
            .services
            .insert(service.service_id.clone(), Arc::new(service)))
    }

    /// Remove a service and its tokens.
    pub fn unpublish(&self, service_id: &str) -> Option<Arc<ServiceDefinition>> {
        self.tokens.remove(service_id);
        self.services.remove(service_id).map(|(_, service)| service)
    }

    /// Grant `token` access to `service_id`.
    pub fn add_token(&self, service_id: &str, token: impl Into<String>) {
        self.tokens
            .entry(service_id.to_string())
            .or_default()
            .insert(token.into());
    }

    pub fn revoke_token(&self, service_id: &str, token: &str) -> bool {
        self.tokens
            .get_mut(service_id)
            .is_some_and(|mut tokens| tokens.remove(token))
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

#[async_trait]
impl ServiceCatalog for MemoryCatalog {
    async fn service(&self, service_id: &str) -> Result<Option<Arc<ServiceDefinition>>> {
        Ok(self.services.get(service_id).map(|s| s.clone()))
    }

    async fn verify_token(&self, service_id: &str, token: &str) -> Result<bool> {
        Ok(self
            .tokens
            .get(service_id)
            .is_some_and(|tokens| tokens.contains(token)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CellgateError;

    #[tokio::test]
    async fn publish_and_lookup() {
        let catalog = MemoryCatalog::new();
        assert!(
            catalog
                .publish(ServiceDefinition::new("svc", "{}"))
                .unwrap()
                .is_none()
        );
        let service = catalog.service("svc").await.unwrap().unwrap();
        assert_eq!(service.service_id, "svc");
        assert!(catalog.service("other").await.unwrap().is_none());

        let previous = catalog
            .publish(ServiceDefinition::new("svc", "{}").version(2))
            .unwrap();
        assert_eq!(previous.unwrap().version, 0);
    }

    #[tokio::test]
    async fn malformed_addresses_are_rejected_at_publish() {
        use crate::types::{InputDef, InputType, OutputDef};

        let catalog = MemoryCatalog::new();
        let bad_input = ServiceDefinition::new("svc", "{}")
            .input(InputDef::new("x", "Sheet1!ZZZZ1", InputType::Number))
            .output(OutputDef::new("y", "Sheet1!A1"));
        let err = catalog.publish(bad_input).unwrap_err();
        assert!(matches!(err, CellgateError::InvalidAddress(ref a) if a == "Sheet1!ZZZZ1"));
        assert_eq!(err.code(), "INTERNAL_ERROR");

        let bad_output =
            ServiceDefinition::new("svc", "{}").output(OutputDef::new("y", "Sheet1!A0"));
        assert!(catalog.publish(bad_output).is_err());
        assert!(catalog.service("svc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn tokens_are_per_service() {
        let catalog = MemoryCatalog::new();
        catalog.add_token("a", "secret");
        assert!(catalog.verify_token("a", "secret").await.unwrap());
        assert!(!catalog.verify_token("b", "secret").await.unwrap());
        assert!(catalog.revoke_token("a", "secret"));
        assert!(!catalog.verify_token("a", "secret").await.unwrap());
    }

    #[tokio::test]
    async fn unpublish_removes_tokens() {
        let catalog = MemoryCatalog::new();
        catalog.publish(ServiceDefinition::new("svc", "{}")).unwrap();
        catalog.add_token("svc", "t");
        assert!(catalog.unpublish("svc").is_some());
        assert!(catalog.is_empty());
        assert!(!catalog.verify_token("svc", "t").await.unwrap());
    }
}
