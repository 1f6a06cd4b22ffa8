use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM provider system
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Role names the runtime resolves against `[llm.roles]`.
pub const ROLE_CONVERSATION: &str = "conversation";
pub const ROLE_EXTRACTION: &str = "extraction";
pub const ROLE_DRAFTING: &str = "drafting";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "d_60000u")]
    pub default_timeout_ms: u64,
    /// Model roles: conversation, extraction, drafting. A role that is not
    /// listed falls back to the first registered provider's default model.
    #[serde(default)]
    pub roles: HashMap<String, RoleConfig>,
    /// Registered LLM providers (data-driven: adding a provider = adding config).
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: d_60000u(),
            roles: HashMap::new(),
            providers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleConfig {
    /// Format: "provider_id/model_name"
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl RoleConfig {
    /// Split `provider_id/model_name`. A bare name has no provider part.
    pub fn split_model(&self) -> (Option<&str>, &str) {
        match self.model.split_once('/') {
            Some((provider, model)) => (Some(provider), model),
            None => (None, self.model.as_str()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    #[serde(default = "d_kind")]
    pub kind: ProviderKind,
    pub base_url: String,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub default_model: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenaiCompat,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    /// Header name (e.g. "Authorization", "x-api-key").
    #[serde(default)]
    pub header: Option<String>,
    /// Header value prefix (e.g. "Bearer ").
    #[serde(default)]
    pub prefix: Option<String>,
    /// Env var containing the key.
    #[serde(default)]
    pub env: Option<String>,
    /// Direct key (for config-only setups; prefer env).
    #[serde(default)]
    pub key: Option<String>,
}

// ── serde default helpers ───────────────────────────────────────────

fn d_60000u() -> u64 {
    60_000
}
fn d_kind() -> ProviderKind {
    ProviderKind::OpenaiCompat
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn providers_and_roles_parse() {
        let cfg: LlmConfig = toml::from_str(
            r#"
            [[providers]]
            id = "openai"
            base_url = "https://api.openai.com/v1"
            default_model = "gpt-4o-mini"
            auth = { env = "OPENAI_API_KEY" }

            [roles.drafting]
            model = "openai/gpt-4o"
            temperature = 0.8
        "#,
        )
        .unwrap();
        assert_eq!(cfg.providers.len(), 1);
        assert_eq!(cfg.providers[0].kind, ProviderKind::OpenaiCompat);
        assert_eq!(cfg.providers[0].auth.env.as_deref(), Some("OPENAI_API_KEY"));
        let role = &cfg.roles[ROLE_DRAFTING];
        assert_eq!(role.split_model(), (Some("openai"), "gpt-4o"));
        assert_eq!(role.temperature, Some(0.8));
    }

    #[test]
    fn bare_model_name_has_no_provider() {
        let role = RoleConfig {
            model: "gpt-4o".into(),
            temperature: None,
            max_tokens: None,
        };
        assert_eq!(role.split_model(), (None, "gpt-4o"));
    }
}
