use serde::{Deserialize, Serialize};

use crate::extension::{extension_declaration, AgentExtension};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSkill {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCapabilities {
    pub streaming: bool,
    #[serde(default)]
    pub extensions: Vec<AgentExtension>,
}

/// Public description of an agent, served at `/.well-known/agent.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCard {
    pub name: String,
    pub description: String,
    pub url: String,
    pub version: String,
    pub default_input_modes: Vec<String>,
    pub default_output_modes: Vec<String>,
    pub capabilities: AgentCapabilities,
    #[serde(default)]
    pub skills: Vec<AgentSkill>,
}

impl AgentCard {
    pub fn supports_x402(&self) -> bool {
        self.capabilities
            .extensions
            .iter()
            .any(|e| e.uri == crate::EXTENSION_URI)
    }
}

/// Agent card advertising the x402 extension as required.
pub fn create_x402_agent_card(
    name: impl Into<String>,
    description: impl Into<String>,
    url: impl Into<String>,
    skills: Vec<AgentSkill>,
) -> AgentCard {
    let text_modes = vec!["text".to_string(), "text/plain".to_string()];
    AgentCard {
        name: name.into(),
        description: description.into(),
        url: url.into(),
        version: "1.0.0".to_string(),
        default_input_modes: text_modes.clone(),
        default_output_modes: text_modes,
        capabilities: AgentCapabilities {
            streaming: true,
            extensions: vec![extension_declaration(None, true)],
        },
        skills,
    }
}
