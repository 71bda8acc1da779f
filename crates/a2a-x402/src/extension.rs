//! Extension activation: a caller opts in by echoing [`EXTENSION_URI`].

use serde::{Deserialize, Serialize};

use crate::EXTENSION_URI;

/// Extension entry advertised in an agent card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentExtension {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

/// The x402 entry for an agent card.
pub fn extension_declaration(description: Option<&str>, required: bool) -> AgentExtension {
    AgentExtension {
        uri: EXTENSION_URI.to_string(),
        description: Some(
            description
                .unwrap_or("Supports payments using the x402 protocol.")
                .to_string(),
        ),
        required,
    }
}

/// Split a comma-separated `X-A2A-Extensions` header value.
pub fn parse_extensions_header(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Whether the caller activated x402 among the extensions it requested.
pub fn check_extension_activation(requested: &[String]) -> bool {
    requested
        .iter()
        .any(|uri| uri.trim().trim_end_matches('/') == EXTENSION_URI)
}

/// Header value echoing the activated extensions back to the caller.
pub fn extensions_header_value(activated: &[String]) -> String {
    activated.join(", ")
}
