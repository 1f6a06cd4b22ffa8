mod generation;
mod images;
mod llm;
mod observability;
mod server;
mod storage;

pub use generation::*;
pub use images::*;
pub use llm::*;
pub use observability::*;
pub use server::*;
pub use storage::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub images: ImagesConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub plans: PlansConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl ConfigError {
    fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ConfigError::error(
                "server.port",
                "port must be greater than 0",
            ));
        }
        if self.server.host.is_empty() {
            errors.push(ConfigError::error("server.host", "host must not be empty"));
        }

        if self.llm.providers.is_empty() {
            errors.push(ConfigError::warning(
                "llm.providers",
                "no LLM providers configured; chat and generation will return 503",
            ));
        }
        for (i, provider) in self.llm.providers.iter().enumerate() {
            if provider.id.is_empty() {
                errors.push(ConfigError::error(
                    format!("llm.providers[{i}].id"),
                    "provider id must not be empty",
                ));
            }
            if provider.base_url.is_empty() {
                errors.push(ConfigError::error(
                    format!("llm.providers[{i}].base_url"),
                    "provider base_url must not be empty",
                ));
            }
        }
        for (role, rc) in &self.llm.roles {
            if let (Some(provider), _) = rc.split_model() {
                if !self.llm.providers.iter().any(|p| p.id == provider) {
                    errors.push(ConfigError::error(
                        format!("llm.roles.{role}.model"),
                        format!("unknown provider \"{provider}\""),
                    ));
                }
            }
        }

        if self.images.base_url.is_none() {
            errors.push(ConfigError::warning(
                "images.base_url",
                "no image provider configured; card images will fail",
            ));
        }
        if self.images.max_attempts == 0 {
            errors.push(ConfigError::error(
                "images.max_attempts",
                "must be at least 1",
            ));
        }
        if self.images.art_styles.is_empty() {
            errors.push(ConfigError::warning(
                "images.art_styles",
                "no art styles configured; image prompts get no style suffix",
            ));
        } else if !self
            .images
            .art_styles
            .iter()
            .any(|s| s.id == self.images.default_style)
        {
            errors.push(ConfigError::warning(
                "images.default_style",
                format!(
                    "\"{}\" is not a configured style; the first style is used",
                    self.images.default_style
                ),
            ));
        }

        if self.generation.bulk_max_attempts == 0 {
            errors.push(ConfigError::error(
                "generation.bulk_max_attempts",
                "must be at least 1",
            ));
        }
        if self.generation.min_card_count == 0
            || self.generation.min_card_count > self.generation.max_card_count
        {
            errors.push(ConfigError::error(
                "generation.min_card_count",
                "must be between 1 and max_card_count",
            ));
        }

        if self.server.cors.allowed_origins.len() == 1
            && self.server.cors.allowed_origins[0] == "*"
        {
            errors.push(ConfigError::warning(
                "server.cors.allowed_origins",
                "wildcard \"*\" allows all origins (not recommended for production)",
            ));
        }

        errors
    }
}
