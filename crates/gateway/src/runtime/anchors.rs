//! Anchor extraction: transcript in, `{anchors, summary, readinessAssessment}`
//! out via structured generation.
//!
//! The model's `readinessAssessment` is narrative only. Callers recompute
//! readiness from `anchors.len()` with [`crate::runtime::readiness`].

use std::time::Instant;

use dw_domain::deck::{Anchor, ChatMessage};
use dw_domain::error::Result;
use dw_domain::tool::Message;
use dw_providers::{generate_object, ResolvedModel};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Extraction {
    pub anchors: Vec<Anchor>,
    pub summary: String,
    #[serde(default)]
    pub readiness_assessment: String,
}

const EXTRACTION_PROMPT: &str = "\
You analyse a conversation between a user and a guide who is helping them \
design a personal oracle card deck. Extract the recurring anchors of the \
user's story: each anchor is a theme, the emotion attached to it, and a \
symbol or visual element that could appear on a card. Do not invent \
anchors the user has not expressed.

Also write a short summary of the conversation so far, and a brief \
readiness assessment judged on four criteria:
1. Specific personal stories are present.
2. Clear emotional threads run through the conversation.
3. Symbolic or visual elements have been described.
4. There is enough diversity for distinct cards.";

/// Render `ROLE: content` lines, one per message, in order.
pub fn render_transcript(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role.label(), m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

fn schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "anchors": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "theme": { "type": "string" },
                        "emotion": { "type": "string" },
                        "symbol": { "type": "string" }
                    },
                    "required": ["theme", "emotion", "symbol"],
                    "additionalProperties": false
                }
            },
            "summary": { "type": "string" },
            "readinessAssessment": { "type": "string" }
        },
        "required": ["anchors", "summary", "readinessAssessment"],
        "additionalProperties": false
    })
}

/// Run one extraction pass over the full transcript.
pub async fn extract_anchors(
    model: &ResolvedModel,
    transcript: &[ChatMessage],
) -> Result<Extraction> {
    let mut req = super::request_for(model);
    req.messages = vec![
        Message::system(EXTRACTION_PROMPT),
        Message::user(format!(
            "Conversation transcript:\n\n{}",
            render_transcript(transcript)
        )),
    ];
    let started = Instant::now();
    let result = generate_object(model.provider.as_ref(), req, "anchor_extraction", schema()).await;
    super::trace_llm(model, "anchor_extraction", false, started, None);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedLlm;
    use dw_domain::deck::ChatRole;
    use std::sync::Arc;

    fn msg(role: ChatRole, content: &str) -> ChatMessage {
        ChatMessage {
            role,
            content: content.into(),
        }
    }

    #[test]
    fn transcript_is_role_prefixed_lines() {
        let t = render_transcript(&[
            msg(ChatRole::User, "I grew up by the sea"),
            msg(ChatRole::Assistant, "Tell me more"),
        ]);
        assert_eq!(t, "USER: I grew up by the sea\nASSISTANT: Tell me more");
    }

    #[tokio::test]
    async fn parses_structured_reply() {
        let llm = Arc::new(ScriptedLlm::new());
        llm.push_chat(
            r#"{"anchors":[{"theme":"home","emotion":"longing","symbol":"lighthouse"}],
                "summary":"sea childhood","readinessAssessment":"early"}"#,
        );
        let model = ResolvedModel::new(llm.clone());
        let out = extract_anchors(&model, &[msg(ChatRole::User, "the sea")])
            .await
            .unwrap();

        assert_eq!(out.anchors.len(), 1);
        assert_eq!(out.anchors[0].symbol, "lighthouse");
        assert_eq!(out.summary, "sea childhood");

        let sent = llm.requests();
        let user_text = sent[0].messages[1].content.extract_all_text();
        assert!(user_text.contains("USER: the sea"));
    }

    #[tokio::test]
    async fn malformed_reply_is_an_error() {
        let llm = Arc::new(ScriptedLlm::new());
        llm.push_chat("not json at all");
        let model = ResolvedModel::new(llm);
        assert!(extract_anchors(&model, &[]).await.is_err());
    }
}
