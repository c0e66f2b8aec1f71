//! Discovery service — validates and admits agent descriptors into the
//! registry and answers capability lookups.

use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use super::registry::Registry;
use super::types::{AgentDescriptor, EntrySnapshot};
use crate::error::{MeshError, Result};

pub struct DiscoveryService {
    registry: Arc<Registry>,
}

impl DiscoveryService {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Validate and admit a descriptor.
    ///
    /// An already-registered name is treated as a re-registration: the
    /// descriptor is replaced and health resets to Unknown.
    pub fn register(&self, descriptor: AgentDescriptor) -> Result<EntrySnapshot> {
        Self::validate(&descriptor)?;

        let replaced = self.registry.get(&descriptor.name).is_some();
        let snapshot = self.registry.insert(descriptor);
        if replaced {
            warn!(
                agent = %snapshot.descriptor.name,
                "re-registered agent; health reset to unknown"
            );
        } else {
            info!(
                agent = %snapshot.descriptor.name,
                version = %snapshot.descriptor.version,
                capabilities = ?snapshot.descriptor.capabilities,
                "registered agent"
            );
        }
        Ok(snapshot)
    }

    /// All entries advertising the capability, in registration order.
    pub fn lookup(&self, capability: &str) -> Vec<EntrySnapshot> {
        self.registry.for_capability(capability)
    }

    /// Remove an agent. In-flight route calls complete or fail naturally.
    pub fn deregister(&self, name: &str) -> Result<()> {
        if self.registry.remove(name) {
            Ok(())
        } else {
            Err(MeshError::AgentNotFound(name.to_string()))
        }
    }

    fn validate(descriptor: &AgentDescriptor) -> Result<()> {
        if descriptor.name.trim().is_empty() {
            return Err(MeshError::RegistrationInvalid(
                "agent name must not be empty".to_string(),
            ));
        }

        if descriptor.capabilities.is_empty() {
            return Err(MeshError::RegistrationInvalid(format!(
                "agent {} declares no capabilities",
                descriptor.name
            )));
        }

        if descriptor.capabilities.iter().any(|c| c.trim().is_empty()) {
            return Err(MeshError::RegistrationInvalid(format!(
                "agent {} declares an empty capability string",
                descriptor.name
            )));
        }

        if descriptor.endpoints.is_empty() {
            return Err(MeshError::RegistrationInvalid(format!(
                "agent {} declares no endpoints",
                descriptor.name
            )));
        }

        for endpoint in &descriptor.endpoints {
            if endpoint.protocol.trim().is_empty() || endpoint.address.trim().is_empty() {
                return Err(MeshError::RegistrationInvalid(format!(
                    "agent {} has an endpoint with empty protocol or address",
                    descriptor.name
                )));
            }
            if matches!(endpoint.protocol.as_str(), "http" | "https")
                && Url::parse(&endpoint.address).is_err()
            {
                return Err(MeshError::RegistrationInvalid(format!(
                    "agent {} endpoint address is not a valid URL: {}",
                    descriptor.name, endpoint.address
                )));
            }
        }

        if descriptor.health.interval_ms == 0 || descriptor.health.timeout_ms == 0 {
            return Err(MeshError::RegistrationInvalid(format!(
                "agent {} probe interval and timeout must be positive",
                descriptor.name
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::types::{Endpoint, HealthState, ProbeConfig};
    use std::collections::HashMap;

    fn descriptor(name: &str, capabilities: Vec<&str>, address: &str) -> AgentDescriptor {
        AgentDescriptor {
            name: name.to_string(),
            version: "0.3.1".to_string(),
            capabilities: capabilities.into_iter().map(String::from).collect(),
            endpoints: vec![Endpoint {
                protocol: "http".to_string(),
                address: address.to_string(),
                operations: vec!["invoke".to_string()],
            }],
            health: ProbeConfig::default(),
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let discovery = DiscoveryService::new(Arc::new(Registry::new()));
        let snap = discovery
            .register(descriptor("navi", vec!["task.manage"], "http://localhost:9001"))
            .unwrap();
        assert_eq!(snap.health.state, HealthState::Unknown);

        let found = discovery.lookup("task.manage");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].descriptor.name, "navi");
        assert!(discovery.lookup("lead.score").is_empty());
    }

    #[test]
    fn test_rejects_empty_capability_set() {
        let discovery = DiscoveryService::new(Arc::new(Registry::new()));
        let err = discovery
            .register(descriptor("navi", vec![], "http://localhost:9001"))
            .unwrap_err();
        assert!(matches!(err, MeshError::RegistrationInvalid(_)));
    }

    #[test]
    fn test_rejects_malformed_endpoint() {
        let discovery = DiscoveryService::new(Arc::new(Registry::new()));
        let err = discovery
            .register(descriptor("navi", vec!["task.manage"], "not a url"))
            .unwrap_err();
        assert!(matches!(err, MeshError::RegistrationInvalid(_)));
    }

    #[test]
    fn test_deregister_unknown_agent() {
        let discovery = DiscoveryService::new(Arc::new(Registry::new()));
        assert!(matches!(
            discovery.deregister("ghost"),
            Err(MeshError::AgentNotFound(_))
        ));
    }
}
