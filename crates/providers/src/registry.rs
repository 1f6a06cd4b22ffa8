//! Provider registry.
//!
//! Constructs and holds every configured chat provider plus the optional
//! image provider. Roles (`conversation`, `extraction`, `drafting`) resolve
//! to a provider and model through `[llm.roles]`.

use crate::images::OpenAiImageProvider;
use crate::openai_compat::OpenAiCompatProvider;
use crate::traits::{ImageProvider, LlmProvider};
use dw_domain::config::{ImagesConfig, LlmConfig, ProviderKind, RoleConfig};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ResolvedModel
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider plus the per-role request settings to use with it.
#[derive(Clone)]
pub struct ResolvedModel {
    pub provider: Arc<dyn LlmProvider>,
    /// `None` lets the provider use its default model.
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl ResolvedModel {
    /// Wrap a provider with no role overrides.
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            model: None,
            temperature: None,
            max_tokens: None,
        }
    }
}

impl std::fmt::Debug for ResolvedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedModel")
            .field("provider", &self.provider.provider_id())
            .field("model", &self.model)
            .finish()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ProviderRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    /// Config order, so the role fallback is deterministic.
    order: Vec<String>,
    roles: HashMap<String, RoleConfig>,
    images: Option<Arc<dyn ImageProvider>>,
    /// Providers that failed to initialize, with the reason.
    init_errors: Vec<(String, String)>,
}

impl ProviderRegistry {
    /// Build the registry from configuration.
    ///
    /// Providers that fail to initialize (usually a missing API key) are
    /// logged and skipped; the server still boots and the affected
    /// endpoints answer 503.
    pub fn from_config(llm: &LlmConfig, images: &ImagesConfig) -> Self {
        let mut registry = Self {
            roles: llm.roles.clone(),
            ..Self::default()
        };
        let timeout = Duration::from_millis(llm.default_timeout_ms);

        for pc in &llm.providers {
            let result = match pc.kind {
                ProviderKind::OpenaiCompat => OpenAiCompatProvider::from_config(pc, timeout)
                    .map(|p| Arc::new(p) as Arc<dyn LlmProvider>),
            };
            match result {
                Ok(provider) => {
                    tracing::info!(
                        provider_id = %pc.id,
                        kind = ?pc.kind,
                        "registered LLM provider"
                    );
                    registry.insert(pc.id.clone(), provider);
                }
                Err(e) => {
                    tracing::warn!(
                        provider_id = %pc.id,
                        error = %e,
                        "failed to initialize LLM provider, skipping"
                    );
                    registry.init_errors.push((pc.id.clone(), e.to_string()));
                }
            }
        }

        if images.base_url.is_some() {
            match OpenAiImageProvider::from_config(images) {
                Ok(p) => registry.images = Some(Arc::new(p)),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to initialize image provider");
                    registry.init_errors.push(("images".into(), e.to_string()));
                }
            }
        }

        if registry.providers.is_empty() {
            tracing::warn!("no LLM providers initialized; chat and generation return 503");
        }
        registry
    }

    /// Register a provider directly (tests, embedding).
    pub fn insert(&mut self, id: String, provider: Arc<dyn LlmProvider>) {
        if !self.order.contains(&id) {
            self.order.push(id.clone());
        }
        self.providers.insert(id, provider);
    }

    pub fn set_images(&mut self, provider: Arc<dyn ImageProvider>) {
        self.images = Some(provider);
    }

    pub fn set_role(&mut self, role: impl Into<String>, cfg: RoleConfig) {
        self.roles.insert(role.into(), cfg);
    }

    /// Resolve a role to a provider and model.
    ///
    /// An unassigned role, or one pointing at a provider that failed to
    /// initialize, falls back to the first registered provider.
    pub fn for_role(&self, role: &str) -> Option<ResolvedModel> {
        if let Some(rc) = self.roles.get(role) {
            let (provider_id, model) = rc.split_model();
            let provider = match provider_id {
                Some(id) => self.providers.get(id).cloned(),
                None => self.first(),
            };
            if let Some(provider) = provider {
                return Some(ResolvedModel {
                    provider,
                    model: Some(model.to_string()),
                    temperature: rc.temperature,
                    max_tokens: rc.max_tokens,
                });
            }
        }
        self.first().map(ResolvedModel::new)
    }

    fn first(&self) -> Option<Arc<dyn LlmProvider>> {
        self.order.iter().find_map(|id| self.providers.get(id).cloned())
    }

    pub fn images(&self) -> Option<Arc<dyn ImageProvider>> {
        self.images.clone()
    }

    /// Whether chat/generation can run at all.
    pub fn is_configured(&self) -> bool {
        !self.providers.is_empty()
    }

    /// List all registered provider IDs in config order.
    pub fn list_providers(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn init_errors(&self) -> &[(String, String)] {
        &self.init_errors
    }
}
