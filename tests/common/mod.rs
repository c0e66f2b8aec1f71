//! Shared test fixtures: an in-process scripted agent connector.
#![allow(dead_code)]

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::collections::HashMap;
use switchboard::{AgentCallError, AgentConnector, AgentDescriptor, Endpoint, ProbeConfig};

/// Connector whose probe and call behavior is scripted per agent.
#[derive(Default)]
pub struct ScriptedConnector {
    probe_ok: DashMap<String, bool>,
    call_responses: DashMap<String, Result<Value, AgentCallError>>,
    pub calls: DashMap<String, u64>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_probe_ok(&self, agent: &str, ok: bool) {
        self.probe_ok.insert(agent.to_string(), ok);
    }

    pub fn set_call_response(&self, agent: &str, response: Result<Value, AgentCallError>) {
        self.call_responses.insert(agent.to_string(), response);
    }

    pub fn calls_to(&self, agent: &str) -> u64 {
        self.calls.get(agent).map(|c| *c).unwrap_or(0)
    }
}

#[async_trait]
impl AgentConnector for ScriptedConnector {
    async fn call(
        &self,
        descriptor: &AgentDescriptor,
        _capability: &str,
        _payload: &Value,
    ) -> Result<Value, AgentCallError> {
        *self.calls.entry(descriptor.name.clone()).or_insert(0) += 1;
        self.call_responses
            .get(&descriptor.name)
            .map(|r| r.clone())
            .unwrap_or_else(|| Ok(json!({"agent": descriptor.name, "ok": true})))
    }

    async fn probe(&self, descriptor: &AgentDescriptor) -> Result<(), AgentCallError> {
        let ok = self
            .probe_ok
            .get(&descriptor.name)
            .map(|v| *v)
            .unwrap_or(true);
        if ok {
            Ok(())
        } else {
            Err(AgentCallError::Unreachable {
                reason: "scripted failure".to_string(),
            })
        }
    }
}

pub fn descriptor(name: &str, capabilities: &[&str]) -> AgentDescriptor {
    AgentDescriptor {
        name: name.to_string(),
        version: "1.0.0".to_string(),
        capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
        endpoints: vec![Endpoint {
            protocol: "http".to_string(),
            address: format!("http://localhost:9000/{name}"),
            operations: vec!["call".to_string()],
        }],
        health: ProbeConfig::default(),
        metadata: HashMap::new(),
    }
}
