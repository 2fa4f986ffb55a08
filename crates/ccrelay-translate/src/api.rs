//! Anthropic Messages API wire types — the client-facing dialect.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// POST /v1/messages request body.
#[derive(Debug, Clone, Deserialize)]
pub struct MessagesRequest {
    #[serde(default)]
    pub model: Option<String>,
    pub messages: Vec<InboundMessage>,
    #[serde(default)]
    pub system: Option<SystemField>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    /// Accepted and ignored — tool selection is the model's call here.
    #[serde(default)]
    pub tool_choice: Option<Value>,
}

fn default_max_tokens() -> u32 {
    4096
}

#[derive(Debug, Clone, Deserialize)]
pub struct InboundMessage {
    pub role: Role,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Message content is either plain text or an array of content blocks
/// (text, tool_use, tool_result, images, ...). Blocks are carried verbatim:
/// the prompt builder serializes the whole structure rather than dropping
/// anything it doesn't understand.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<Value>),
}

impl MessageContent {
    /// The text this message contributes to the prompt.
    pub fn as_prompt_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Blocks(blocks) => {
                serde_json::to_string(blocks).unwrap_or_else(|_| String::new())
            }
        }
    }
}

/// `system` is a string or an array of text blocks.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SystemField {
    Text(String),
    Blocks(Vec<Value>),
}

impl SystemField {
    pub fn as_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n\n"),
        }
    }
}

/// Tool definition as supplied by the client.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub input_schema: InputSchema,
}

/// JSON-schema subset the schema renderer understands. `properties` keeps
/// the client's declaration order.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InputSchema {
    #[serde(rename = "type", default)]
    pub schema_type: Option<String>,
    #[serde(default)]
    pub properties: Option<serde_json::Map<String, Value>>,
    #[serde(default)]
    pub required: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PropertySchema {
    #[serde(rename = "type", default)]
    pub prop_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "enum", default)]
    pub allowed: Option<Vec<Value>>,
}

/// Outbound content block in the Messages response.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_and_block_content_both_parse() {
        let req: MessagesRequest = serde_json::from_str(
            r#"{"messages":[
                {"role":"user","content":"hi"},
                {"role":"assistant","content":[{"type":"text","text":"hello"},{"type":"tool_use","id":"t1","name":"Read","input":{}}]}
            ]}"#,
        )
        .unwrap();

        assert_eq!(req.messages.len(), 2);
        assert_eq!(req.max_tokens, 4096);
        assert!(!req.stream);
        assert_eq!(req.messages[0].content.as_prompt_text(), "hi");
        // block arrays serialize back to their JSON text, nothing dropped
        let text = req.messages[1].content.as_prompt_text();
        assert!(text.contains(r#""type":"tool_use""#));
        assert!(text.contains(r#""name":"Read""#));
    }

    #[test]
    fn system_accepts_string_or_blocks() {
        let s: SystemField = serde_json::from_str(r#""be nice""#).unwrap();
        assert_eq!(s.as_text(), "be nice");

        let s: SystemField = serde_json::from_str(
            r#"[{"type":"text","text":"one"},{"type":"text","text":"two"}]"#,
        )
        .unwrap();
        assert_eq!(s.as_text(), "one\n\ntwo");
    }

    #[test]
    fn tool_definition_preserves_property_order() {
        let tool: ToolDefinition = serde_json::from_str(
            r#"{"name":"Read","input_schema":{"type":"object","properties":{"zebra":{"type":"string"},"alpha":{"type":"number"}},"required":["zebra"]}}"#,
        )
        .unwrap();
        let keys: Vec<&String> = tool.input_schema.properties.as_ref().unwrap().keys().collect();
        assert_eq!(keys, vec!["zebra", "alpha"]);
    }

    #[test]
    fn content_block_wire_shape() {
        let block = ContentBlock::ToolUse {
            id: "toolu_1_0".into(),
            name: "Read".into(),
            input: serde_json::json!({"path": "/tmp/x"}),
        };
        let json = serde_json::to_string(&block).unwrap();
        assert!(json.contains(r#""type":"tool_use""#));
        assert!(json.contains(r#""id":"toolu_1_0""#));
    }
}
