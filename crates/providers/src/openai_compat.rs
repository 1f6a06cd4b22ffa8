//! OpenAI-compatible chat adapter.
//!
//! Works with OpenAI, Ollama, vLLM, LM Studio, Together and any other
//! endpoint that follows the chat completions contract, including
//! `response_format: json_schema` for structured output.

use crate::traits::{ChatRequest, ChatResponse, LlmProvider, ResponseFormat};
use crate::util::{from_reqwest, resolve_api_key};
use dw_domain::config::ProviderConfig;
use dw_domain::error::{Error, Result};
use dw_domain::stream::{BoxStream, StreamEvent, Usage};
use dw_domain::tool::{ContentPart, Message, MessageContent, Role, ToolCall, ToolDefinition};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OpenAiCompatProvider {
    id: String,
    base_url: String,
    api_key: String,
    auth_header: String,
    auth_prefix: String,
    default_model: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new provider from the deserialized provider config.
    ///
    /// The API key is resolved eagerly; a missing key fails construction so
    /// the registry can skip the provider and report it unconfigured.
    pub fn from_config(cfg: &ProviderConfig, timeout: Duration) -> Result<Self> {
        let api_key = resolve_api_key(&cfg.auth)?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            id: cfg.id.clone(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            auth_header: cfg
                .auth
                .header
                .clone()
                .unwrap_or_else(|| "Authorization".into()),
            auth_prefix: cfg.auth.prefix.clone().unwrap_or_else(|| "Bearer ".into()),
            default_model: cfg
                .default_model
                .clone()
                .unwrap_or_else(|| "gpt-4o-mini".into()),
            client,
        })
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header(&self.auth_header, format!("{}{}", self.auth_prefix, self.api_key))
            .header("Content-Type", "application/json")
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn build_chat_body(&self, req: &ChatRequest, stream: bool) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(msg_to_openai).collect();
        let model = req.model.clone().unwrap_or_else(|| self.default_model.clone());

        let mut body = serde_json::json!({
            "model": model,
            "messages": messages,
            "stream": stream,
        });

        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(tool_to_openai).collect();
            body["tools"] = Value::Array(tools);
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(max) = req.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        if let ResponseFormat::JsonSchema { name, schema } = &req.response_format {
            body["response_format"] = serde_json::json!({
                "type": "json_schema",
                "json_schema": { "name": name, "schema": schema, "strict": false },
            });
        }
        if stream {
            body["stream_options"] = serde_json::json!({"include_usage": true});
        }
        body
    }

    async fn post_checked(&self, body: &Value) -> Result<reqwest::Response> {
        let resp = self
            .authed_post(&self.chat_url())
            .json(body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let err_text = resp.text().await.map_err(from_reqwest)?;
            return Err(Error::provider(
                &self.id,
                format!("HTTP {} - {}", status.as_u16(), err_text),
            ));
        }
        Ok(resp)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn msg_to_openai(msg: &Message) -> Value {
    match msg.role {
        Role::Tool => tool_result_to_openai(msg),
        Role::Assistant => assistant_to_openai(msg),
        _ => serde_json::json!({
            "role": role_to_str(msg.role),
            "content": msg.content.extract_all_text(),
        }),
    }
}

fn assistant_to_openai(msg: &Message) -> Value {
    let mut obj = serde_json::json!({"role": "assistant"});
    let mut text_parts: Vec<&str> = Vec::new();
    let mut tool_calls: Vec<Value> = Vec::new();

    match &msg.content {
        MessageContent::Text(t) => text_parts.push(t),
        MessageContent::Parts(parts) => {
            for part in parts {
                match part {
                    ContentPart::Text { text } => text_parts.push(text),
                    ContentPart::ToolUse { id, name, input } => {
                        tool_calls.push(serde_json::json!({
                            "id": id,
                            "type": "function",
                            "function": { "name": name, "arguments": input.to_string() },
                        }));
                    }
                    ContentPart::ToolResult { .. } => {}
                }
            }
        }
    }

    obj["content"] = if text_parts.is_empty() {
        Value::Null
    } else {
        Value::String(text_parts.join("\n"))
    };
    if !tool_calls.is_empty() {
        obj["tool_calls"] = Value::Array(tool_calls);
    }
    obj
}

fn tool_result_to_openai(msg: &Message) -> Value {
    let (id, content) = match &msg.content {
        MessageContent::Parts(parts) => parts
            .iter()
            .find_map(|p| match p {
                ContentPart::ToolResult {
                    tool_use_id,
                    content,
                    ..
                } => Some((tool_use_id.as_str(), content.as_str())),
                _ => None,
            })
            .unwrap_or(("", "")),
        MessageContent::Text(t) => ("", t.as_str()),
    };
    serde_json::json!({ "role": "tool", "tool_call_id": id, "content": content })
}

fn tool_to_openai(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response deserialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_chat_response(provider: &str, body: &Value) -> Result<ChatResponse> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| Error::provider(provider, "no choices in response"))?;

    let message = choice
        .get("message")
        .ok_or_else(|| Error::provider(provider, "no message in choice"))?;

    Ok(ChatResponse {
        content: message
            .get("content")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string(),
        tool_calls: parse_openai_tool_calls(message),
        usage: body.get("usage").and_then(parse_openai_usage),
        model: body
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string(),
        finish_reason: choice
            .get("finish_reason")
            .and_then(|v| v.as_str())
            .map(String::from),
    })
}

fn parse_openai_tool_calls(message: &Value) -> Vec<ToolCall> {
    let Some(arr) = message.get("tool_calls").and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    arr.iter()
        .filter_map(|tc| {
            let func = tc.get("function")?;
            let args_str = func.get("arguments")?.as_str().unwrap_or("{}");
            Some(ToolCall {
                call_id: tc.get("id")?.as_str()?.to_string(),
                tool_name: func.get("name")?.as_str()?.to_string(),
                arguments: serde_json::from_str(args_str)
                    .unwrap_or(Value::Object(Default::default())),
            })
        })
        .collect()
}

fn parse_openai_usage(v: &Value) -> Option<Usage> {
    Some(Usage {
        prompt_tokens: v.get("prompt_tokens")?.as_u64()? as u32,
        completion_tokens: v.get("completion_tokens")?.as_u64()? as u32,
        total_tokens: v.get("total_tokens")?.as_u64()? as u32,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSE streaming helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-stream parser state. Argument deltas only carry the tool call's
/// `index`, so the id announced in the first chunk is remembered here.
#[derive(Default)]
struct StreamState {
    call_ids: HashMap<u64, String>,
}

impl StreamState {
    fn parse(&mut self, data: &str) -> Vec<Result<StreamEvent>> {
        if data.trim() == "[DONE]" {
            return Vec::new();
        }

        let v: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => return vec![Err(Error::Json(e))],
        };

        let Some(choice) = v
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|a| a.first())
        else {
            // Usage-only chunk (stream_options.include_usage).
            return v
                .get("usage")
                .and_then(parse_openai_usage)
                .map(|usage| {
                    vec![Ok(StreamEvent::Done {
                        usage: Some(usage),
                        finish_reason: None,
                    })]
                })
                .unwrap_or_default();
        };

        let mut events = Vec::new();
        let delta = choice.get("delta").unwrap_or(&Value::Null);

        if let Some(text) = delta.get("content").and_then(|v| v.as_str()) {
            if !text.is_empty() {
                events.push(Ok(StreamEvent::Token {
                    text: text.to_string(),
                }));
            }
        }

        if let Some(tc_arr) = delta.get("tool_calls").and_then(|v| v.as_array()) {
            for tc in tc_arr {
                let index = tc.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
                let func = tc.get("function");

                if let Some(id) = tc.get("id").and_then(|v| v.as_str()) {
                    self.call_ids.insert(index, id.to_string());
                    let name = func
                        .and_then(|f| f.get("name"))
                        .and_then(|v| v.as_str())
                        .unwrap_or("");
                    events.push(Ok(StreamEvent::ToolCallStarted {
                        call_id: id.to_string(),
                        tool_name: name.to_string(),
                    }));
                }

                let args = func
                    .and_then(|f| f.get("arguments"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                if !args.is_empty() {
                    if let Some(call_id) = self.call_ids.get(&index) {
                        events.push(Ok(StreamEvent::ToolCallDelta {
                            call_id: call_id.clone(),
                            delta: args.to_string(),
                        }));
                    }
                }
            }
        }

        // Usage arrives in a trailing chunk, so a finish_reason chunk is
        // still a `Done` the turn loop can act on.
        if let Some(fr) = choice.get("finish_reason").and_then(|f| f.as_str()) {
            events.push(Ok(StreamEvent::Done {
                usage: v.get("usage").and_then(parse_openai_usage),
                finish_reason: Some(fr.to_string()),
            }));
        }

        events
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let body = self.build_chat_body(req, false);
        tracing::debug!(provider = %self.id, "openai_compat chat request");

        let resp = self.post_checked(&body).await?;
        let resp_text = resp.text().await.map_err(from_reqwest)?;
        let resp_json: Value = serde_json::from_str(&resp_text)?;
        parse_chat_response(&self.id, &resp_json)
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let body = self.build_chat_body(req, true);
        tracing::debug!(provider = %self.id, "openai_compat stream request");

        let resp = self.post_checked(&body).await?;
        let mut state = StreamState::default();
        Ok(crate::sse::sse_response_stream(resp, move |data| {
            state.parse(data)
        }))
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}
