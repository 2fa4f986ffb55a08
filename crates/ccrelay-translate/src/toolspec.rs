//! Renders tool definitions into the Markdown/XML instruction block that is
//! appended to the system preamble. The exact text is a wire contract — the
//! extractor's format examples and the tests both pin it.

use serde_json::Value;

use crate::api::{PropertySchema, ToolDefinition};

const HEADER: &str = "# Available Tools\n\n\
IMPORTANT: You MUST use <tool_use> tags (Anthropic format). Do NOT use <invoke> or <use_tool> tags.\n\n\
Use tools by outputting XML in EXACTLY this format:\n\
<tool_uses><tool_use name=\"tool_name\"><parameter name=\"param_name\">value</parameter></tool_use></tool_uses>\n\n\
CRITICAL: Use <tool_use name=\"...\"> with the standard Anthropic format. The tag name MUST be 'tool_use'.\n";

/// Render the full tools block. Empty input renders nothing at all.
pub fn render_tools(tools: &[ToolDefinition]) -> String {
    if tools.is_empty() {
        return String::new();
    }

    let mut out = String::from(HEADER);
    for tool in tools {
        out.push('\n');
        render_tool(&mut out, tool);
    }
    out
}

fn render_tool(out: &mut String, tool: &ToolDefinition) {
    out.push_str("## Tool: ");
    out.push_str(&tool.name);
    out.push('\n');

    if let Some(desc) = tool.description.as_deref().filter(|d| !d.is_empty()) {
        out.push_str("**Description:** ");
        out.push_str(desc);
        out.push('\n');
    }

    let required: Vec<&str> = tool
        .input_schema
        .required
        .as_deref()
        .unwrap_or_default()
        .iter()
        .map(String::as_str)
        .collect();

    match tool.input_schema.properties.as_ref().filter(|p| !p.is_empty()) {
        None => out.push_str("**Parameters:** (No parameters)\n"),
        Some(properties) => {
            out.push_str("**Parameters:**\n");
            for (name, raw) in properties {
                let schema: PropertySchema =
                    serde_json::from_value(raw.clone()).unwrap_or_default();
                render_parameter(out, name, &schema, required.contains(&name.as_str()));
            }
        }
    }
}

fn render_parameter(out: &mut String, name: &str, schema: &PropertySchema, required: bool) {
    out.push_str("  - `");
    out.push_str(name);
    out.push('`');
    if required {
        out.push_str(" **(required)**");
    }
    if let Some(ty) = schema.prop_type.as_deref() {
        out.push_str(" - Type: `");
        out.push_str(ty);
        out.push('`');
    }
    out.push('\n');

    if let Some(desc) = schema.description.as_deref().filter(|d| !d.is_empty()) {
        out.push_str("    ");
        out.push_str(desc);
        out.push('\n');
    }

    if let Some(allowed) = schema.allowed.as_deref().filter(|a| !a.is_empty()) {
        let rendered: Vec<String> = allowed.iter().map(enum_member).collect();
        out.push_str("    Allowed values: ");
        out.push_str(&rendered.join(", "));
        out.push('\n');
    }
}

fn enum_member(value: &Value) -> String {
    match value {
        Value::String(s) => format!("`{}`", s),
        other => format!("`{}`", other),
    }
}
