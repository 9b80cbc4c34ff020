use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::AssistantId;

pub const STDIO_TRANSPORT: &str = "stdio";

/// A remote capability server an assistant may talk to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteServerConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default = "default_transport")]
    pub transport: String,
}

fn default_transport() -> String {
    STDIO_TRANSPORT.to_string()
}

impl RemoteServerConfig {
    pub fn stdio(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: Some(command.into()),
            args: Vec::new(),
            env: BTreeMap::new(),
            transport: default_transport(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assistant {
    pub id: AssistantId,
    pub name: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub enabled_capability_providers: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remote_servers: Vec<RemoteServerConfig>,
}

impl Assistant {
    pub fn new(id: AssistantId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            system_prompt: String::new(),
            enabled_capability_providers: Vec::new(),
            remote_servers: Vec::new(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.enabled_capability_providers.push(provider.into());
        self
    }

    pub fn with_remote(mut self, server: RemoteServerConfig) -> Self {
        self.remote_servers.push(server);
        self
    }

    pub fn enables(&self, provider: &str) -> bool {
        self.enabled_capability_providers.iter().any(|p| p == provider)
    }
}
