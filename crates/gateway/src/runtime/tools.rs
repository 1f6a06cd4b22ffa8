//! Conversation tools.
//!
//! The model sees three tools. Calls are parsed into a closed enum so the
//! turn engine dispatches with an exhaustive `match`; a new tool is a new
//! variant, not a new string key.

use dw_domain::deck::CardContent;
use dw_domain::tool::{ToolCall, ToolDefinition};
use serde::Deserialize;
use serde_json::json;

pub const ENTER_EDIT_MODE: &str = "enter_edit_mode";
pub const UPDATE_CARD: &str = "update_card";
pub const RESTART_JOURNEY: &str = "restart_journey";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolInvocation {
    /// The user wants to revise drafted cards; the model gets the listing.
    EnterEditMode,
    UpdateCard(CardUpdate),
    /// Only acted on when `confirmed` is true.
    RestartJourney { confirmed: bool },
}

/// Fields to overwrite on one draft card. Absent fields keep their value.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardUpdate {
    pub card_number: u32,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub meaning: Option<String>,
    #[serde(default)]
    pub guidance: Option<String>,
    #[serde(default)]
    pub image_prompt: Option<String>,
}

impl CardUpdate {
    pub fn apply_to(&self, current: &CardContent) -> CardContent {
        CardContent {
            title: self.title.clone().unwrap_or_else(|| current.title.clone()),
            meaning: self.meaning.clone().unwrap_or_else(|| current.meaning.clone()),
            guidance: self.guidance.clone().unwrap_or_else(|| current.guidance.clone()),
            image_prompt: self
                .image_prompt
                .clone()
                .unwrap_or_else(|| current.image_prompt.clone()),
        }
    }
}

#[derive(Deserialize)]
struct RestartArgs {
    #[serde(default)]
    confirmed: bool,
}

pub fn definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::new(
            ENTER_EDIT_MODE,
            "Call when the user wants to review or change drafted cards. Returns the current cards.",
            json!({ "type": "object", "properties": {} }),
        ),
        ToolDefinition::new(
            UPDATE_CARD,
            "Rewrite fields of one drafted card. Only the fields given are changed.",
            json!({
                "type": "object",
                "properties": {
                    "cardNumber": { "type": "integer", "minimum": 1 },
                    "title": { "type": "string" },
                    "meaning": { "type": "string" },
                    "guidance": { "type": "string" },
                    "imagePrompt": { "type": "string" }
                },
                "required": ["cardNumber"]
            }),
        ),
        ToolDefinition::new(
            RESTART_JOURNEY,
            "Discard this deck and start over. Only call with confirmed=true after the user explicitly agreed.",
            json!({
                "type": "object",
                "properties": { "confirmed": { "type": "boolean" } },
                "required": ["confirmed"]
            }),
        ),
    ]
}

/// Parse a model tool call. The error string goes back to the model as a
/// tool error result.
pub fn parse(call: &ToolCall) -> Result<ToolInvocation, String> {
    let args = || {
        if call.arguments.is_null() {
            json!({})
        } else {
            call.arguments.clone()
        }
    };
    match call.tool_name.as_str() {
        ENTER_EDIT_MODE => Ok(ToolInvocation::EnterEditMode),
        UPDATE_CARD => serde_json::from_value::<CardUpdate>(args())
            .map(ToolInvocation::UpdateCard)
            .map_err(|e| format!("invalid {UPDATE_CARD} arguments: {e}")),
        RESTART_JOURNEY => serde_json::from_value::<RestartArgs>(args())
            .map(|a| ToolInvocation::RestartJourney {
                confirmed: a.confirmed,
            })
            .map_err(|e| format!("invalid {RESTART_JOURNEY} arguments: {e}")),
        other => Err(format!("unknown tool: {other}")),
    }
}
