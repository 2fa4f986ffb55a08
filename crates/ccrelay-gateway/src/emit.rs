//! Anthropic event-model emission — the single JSON message for buffered
//! requests and the SSE frame sequence for streaming ones.

use chrono::Utc;
use serde_json::{json, Value};

use ccrelay_translate::{ContentBlock, ExtractedResponse, ToolUseBlock};

/// Model echoed back when the client didn't name one.
pub const DEFAULT_MODEL: &str = "ccapi-relay";

/// Best-effort token estimate — a stable contract, not a placeholder:
/// callers that need exact counts wire in their own counter.
pub fn estimate_tokens(text: &str) -> u32 {
    std::cmp::max(1, (text.chars().count() / 4) as u32)
}

pub fn stop_reason(extraction: &ExtractedResponse) -> &'static str {
    if extraction.has_tool_uses() {
        "tool_use"
    } else {
        "end_turn"
    }
}

fn tool_use_block(tu: &ToolUseBlock) -> ContentBlock {
    ContentBlock::ToolUse {
        id: tu.id.clone(),
        name: tu.name.clone(),
        input: Value::Object(tu.input.clone()),
    }
}

fn tool_use_json(tu: &ToolUseBlock) -> Value {
    serde_json::to_value(tool_use_block(tu)).unwrap_or(Value::Null)
}

/// Build the non-streaming response body.
pub fn message_json(
    model: &str,
    extraction: &ExtractedResponse,
    input_tokens: u32,
    output_tokens: u32,
) -> Value {
    let mut blocks: Vec<ContentBlock> = Vec::new();
    // the text block carries everything before the first tool call, or the
    // whole response when no call was extracted
    if !extraction.text_before.is_empty() || !extraction.has_tool_uses() {
        blocks.push(ContentBlock::Text {
            text: extraction.text_before.clone(),
        });
    }
    blocks.extend(extraction.tool_uses.iter().map(tool_use_block));
    let content = serde_json::to_value(blocks).unwrap_or(Value::Null);

    json!({
        "id": format!("msg_{}", Utc::now().timestamp_millis()),
        "type": "message",
        "role": "assistant",
        "model": model,
        "content": content,
        "stop_reason": stop_reason(extraction),
        "stop_sequence": null,
        "usage": {
            "input_tokens": input_tokens,
            "output_tokens": output_tokens,
        },
    })
}

/// One SSE frame: `event: <type>\ndata: <json>\n\n`.
pub struct SseFrame {
    pub event: &'static str,
    pub data: Value,
}

impl SseFrame {
    pub fn into_axum_event(self) -> axum::response::sse::Event {
        axum::response::sse::Event::default()
            .event(self.event)
            .data(self.data.to_string())
    }
}

pub fn message_start(id: &str, model: &str, input_tokens: u32) -> SseFrame {
    SseFrame {
        event: "message_start",
        data: json!({
            "type": "message_start",
            "message": {
                "id": id,
                "type": "message",
                "role": "assistant",
                "model": model,
                "content": [],
                "stop_reason": null,
                "stop_sequence": null,
                "usage": {"input_tokens": input_tokens, "output_tokens": 0},
            },
        }),
    }
}

pub fn text_block_start() -> SseFrame {
    SseFrame {
        event: "content_block_start",
        data: json!({
            "type": "content_block_start",
            "index": 0,
            "content_block": {"type": "text", "text": ""},
        }),
    }
}

pub fn text_delta(text: &str) -> SseFrame {
    SseFrame {
        event: "content_block_delta",
        data: json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": {"type": "text_delta", "text": text},
        }),
    }
}

pub fn content_block_stop(index: usize) -> SseFrame {
    SseFrame {
        event: "content_block_stop",
        data: json!({"type": "content_block_stop", "index": index}),
    }
}

pub fn tool_block_start(index: usize, tu: &ToolUseBlock) -> SseFrame {
    SseFrame {
        event: "content_block_start",
        data: json!({
            "type": "content_block_start",
            "index": index,
            "content_block": tool_use_json(tu),
        }),
    }
}

pub fn message_delta(stop_reason: &str, output_tokens: u32) -> SseFrame {
    SseFrame {
        event: "message_delta",
        data: json!({
            "type": "message_delta",
            "delta": {"stop_reason": stop_reason, "stop_sequence": null},
            "usage": {"output_tokens": output_tokens},
        }),
    }
}

pub fn message_stop() -> SseFrame {
    SseFrame {
        event: "message_stop",
        data: json!({"type": "message_stop"}),
    }
}

pub fn error_frame(message: &str) -> SseFrame {
    SseFrame {
        event: "error",
        data: json!({
            "type": "error",
            "error": {"type": "api_error", "message": message},
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccrelay_translate::extract_tool_uses;

    #[test]
    fn token_estimate_floor_is_one() {
        assert_eq!(estimate_tokens(""), 1);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
    }

    #[test]
    fn plain_text_message_shape() {
        let extraction = extract_tool_uses("pong");
        let body = message_json(DEFAULT_MODEL, &extraction, 1, 1);

        assert_eq!(body["type"], "message");
        assert_eq!(body["role"], "assistant");
        assert_eq!(body["stop_reason"], "end_turn");
        assert_eq!(body["content"][0]["type"], "text");
        assert_eq!(body["content"][0]["text"], "pong");
        assert!(body["id"].as_str().unwrap().starts_with("msg_"));
    }

    #[test]
    fn tool_use_message_shape() {
        let text = "I'll read it.\n<tool_uses><tool_use name=\"Read\"><parameter name=\"path\">/tmp/x</parameter><parameter name=\"limit\">100</parameter></tool_use></tool_uses>";
        let extraction = extract_tool_uses(text);
        let body = message_json("m", &extraction, 5, 5);

        assert_eq!(body["stop_reason"], "tool_use");
        assert_eq!(body["content"][0]["text"], "I'll read it.");
        assert_eq!(body["content"][1]["type"], "tool_use");
        assert_eq!(body["content"][1]["name"], "Read");
        assert_eq!(body["content"][1]["input"]["path"], "/tmp/x");
        assert_eq!(body["content"][1]["input"]["limit"], 100);
    }

    #[test]
    fn tool_use_with_no_prose_omits_text_block() {
        let text = "<tool_uses><tool_use name=\"Ping\"></tool_use></tool_uses>";
        let extraction = extract_tool_uses(text);
        let body = message_json("m", &extraction, 1, 1);

        assert_eq!(body["content"][0]["type"], "tool_use");
        assert_eq!(body["content"].as_array().unwrap().len(), 1);
    }

    // Compose frames the way the streaming handler does and check the
    // event sequence against the contract:
    //   message_start, content_block_start, content_block_delta*,
    //   content_block_stop, (content_block_start, content_block_stop)*,
    //   message_delta, message_stop
    #[test]
    fn stream_frame_order_invariant() {
        let text = "I'll read it.\n<tool_uses><tool_use name=\"Read\"><parameter name=\"path\">/tmp/x</parameter></tool_use></tool_uses>";
        let extraction = extract_tool_uses(text);

        let mut frames = vec![
            message_start("msg_1", "m", 1),
            text_block_start(),
            text_delta("Hel"),
            text_delta("lo"),
            content_block_stop(0),
        ];
        for (offset, tu) in extraction.tool_uses.iter().enumerate() {
            frames.push(tool_block_start(offset + 1, tu));
            frames.push(content_block_stop(offset + 1));
        }
        frames.push(message_delta(stop_reason(&extraction), 1));
        frames.push(message_stop());

        let events: Vec<&str> = frames.iter().map(|f| f.event).collect();
        assert_eq!(
            events,
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "content_block_start",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );

        // every data payload's type field mirrors its event name
        for frame in &frames {
            assert_eq!(frame.data["type"], frame.event);
        }
    }

    #[test]
    fn frame_payload_types_match_event_names() {
        assert_eq!(message_start("msg_1", "m", 1).data["type"], "message_start");
        assert_eq!(text_block_start().data["index"], 0);
        assert_eq!(text_delta("Hel").data["delta"]["text"], "Hel");
        assert_eq!(content_block_stop(2).data["index"], 2);
        assert_eq!(
            message_delta("end_turn", 3).data["delta"]["stop_reason"],
            "end_turn"
        );
        assert_eq!(message_stop().event, "message_stop");
        assert_eq!(error_frame("x").data["error"]["message"], "x");
    }
}
