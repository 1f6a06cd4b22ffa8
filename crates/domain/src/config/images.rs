use serde::{Deserialize, Serialize};

use super::llm::AuthConfig;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Image generation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagesConfig {
    /// OpenAI-compatible images endpoint base (`{base_url}/images/generations`).
    /// When absent the image pipeline reports the service as unconfigured.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default = "d_model")]
    pub model: String,
    #[serde(default = "d_size")]
    pub size: String,
    #[serde(default = "d_timeout_ms")]
    pub timeout_ms: u64,
    /// Attempts per card before it is marked `failed`.
    #[serde(default = "d_max_attempts")]
    pub max_attempts: u32,
    /// First backoff wait; doubled after every failed attempt.
    #[serde(default = "d_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Pause between consecutive cards in a batch.
    #[serde(default = "d_batch_delay_ms")]
    pub batch_delay_ms: u64,
    /// Capacity of the in-process batch job queue.
    #[serde(default = "d_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "d_default_style")]
    pub default_style: String,
    #[serde(default = "d_art_styles")]
    pub art_styles: Vec<ArtStyle>,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            auth: AuthConfig::default(),
            model: d_model(),
            size: d_size(),
            timeout_ms: d_timeout_ms(),
            max_attempts: d_max_attempts(),
            retry_base_delay_ms: d_retry_base_delay_ms(),
            batch_delay_ms: d_batch_delay_ms(),
            queue_capacity: d_queue_capacity(),
            default_style: d_default_style(),
            art_styles: d_art_styles(),
        }
    }
}

/// A named visual style whose prompt is appended to every card's image prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtStyle {
    pub id: String,
    pub name: String,
    pub prompt: String,
}

impl ImagesConfig {
    /// Look up a style by id, falling back to `default_style` and then to
    /// the first configured style.
    pub fn resolve_style(&self, id: Option<&str>) -> Option<&ArtStyle> {
        id.and_then(|id| self.art_styles.iter().find(|s| s.id == id))
            .or_else(|| self.art_styles.iter().find(|s| s.id == self.default_style))
            .or_else(|| self.art_styles.first())
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_model() -> String {
    "dall-e-3".into()
}
fn d_size() -> String {
    "1024x1792".into()
}
fn d_timeout_ms() -> u64 {
    120_000
}
fn d_max_attempts() -> u32 {
    3
}
fn d_retry_base_delay_ms() -> u64 {
    1_000
}
fn d_batch_delay_ms() -> u64 {
    500
}
fn d_queue_capacity() -> usize {
    64
}
fn d_default_style() -> String {
    "tarot-classic".into()
}
fn d_art_styles() -> Vec<ArtStyle> {
    let style = |id: &str, name: &str, prompt: &str| ArtStyle {
        id: id.into(),
        name: name.into(),
        prompt: prompt.into(),
    };
    vec![
        style(
            "tarot-classic",
            "Classic Tarot",
            "in the style of a classic Rider-Waite tarot card, bold outlines, rich flat colors, ornate border",
        ),
        style(
            "watercolor",
            "Watercolor Dream",
            "soft watercolor illustration, flowing washes of color, dreamy and ethereal, delicate details",
        ),
        style(
            "celestial",
            "Celestial",
            "celestial art nouveau illustration, deep indigo and gold, stars and moons, intricate linework",
        ),
        style(
            "botanical",
            "Botanical",
            "vintage botanical engraving, muted earth tones, detailed flora, aged paper texture",
        ),
    ]
}
