use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Card generation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Total attempts for bulk draft generation. Edit and regenerate
    /// always make a single attempt.
    #[serde(default = "d_bulk_max_attempts")]
    pub bulk_max_attempts: u32,
    /// Upper bound on model/tool round-trips in one conversation turn.
    #[serde(default = "d_max_tool_steps")]
    pub max_tool_steps: usize,
    #[serde(default = "d_min_cards")]
    pub min_card_count: u32,
    #[serde(default = "d_max_cards")]
    pub max_card_count: u32,
    /// Anchors kept when regenerating a single card.
    #[serde(default = "d_regenerate_anchor_limit")]
    pub regenerate_anchor_limit: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            bulk_max_attempts: d_bulk_max_attempts(),
            max_tool_steps: d_max_tool_steps(),
            min_card_count: d_min_cards(),
            max_card_count: d_max_cards(),
            regenerate_anchor_limit: d_regenerate_anchor_limit(),
        }
    }
}

impl GenerationConfig {
    pub fn card_count_in_range(&self, count: u32) -> bool {
        (self.min_card_count..=self.max_card_count).contains(&count)
    }
}

fn d_bulk_max_attempts() -> u32 {
    3
}
fn d_max_tool_steps() -> usize {
    5
}
fn d_min_cards() -> u32 {
    1
}
fn d_max_cards() -> u32 {
    30
}
fn d_regenerate_anchor_limit() -> usize {
    5
}
