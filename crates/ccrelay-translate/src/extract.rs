//! Tool-call extraction — recovers structured `<tool_uses>` XML islands from
//! free-form assistant text. Parameter bodies are taken as exact raw slices
//! of the original text, so embedded markup, entities, and whitespace all
//! survive untouched.

use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use tracing::debug;

use crate::coerce::coerce_value;

static WRAPPED_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<tool_uses\s*>").expect("tool_uses open regex"));
static BARE_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<tool_use[\s>]").expect("tool_use open regex"));

/// One extracted call, surfaced to the client as a tool_use content block.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolUseBlock {
    pub id: String,
    pub name: String,
    pub input: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedResponse {
    /// Assistant prose preceding the first tool-bearing element, trimmed.
    /// The whole input when nothing was extracted.
    pub text_before: String,
    pub tool_uses: Vec<ToolUseBlock>,
}

impl ExtractedResponse {
    fn plain(text: &str) -> Self {
        Self {
            text_before: text.to_string(),
            tool_uses: Vec::new(),
        }
    }

    pub fn has_tool_uses(&self) -> bool {
        !self.tool_uses.is_empty()
    }
}

/// Extract tool calls from assistant text. A `<tool_uses>` wrapper wins;
/// bare top-level `<tool_use>` elements are the fallback. Text that parses
/// as neither comes back verbatim with no calls.
pub fn extract_tool_uses(text: &str) -> ExtractedResponse {
    let island_start = WRAPPED_OPEN
        .find(text)
        .or_else(|| BARE_OPEN.find(text))
        .map(|m| m.start());

    let Some(start) = island_start else {
        return ExtractedResponse::plain(text);
    };

    let island = &text[start..];
    let raw_uses = match parse_island(island) {
        Ok(uses) => uses,
        Err(e) => {
            debug!(err = %e, "tool_use island failed to parse, passing text through");
            return ExtractedResponse::plain(text);
        }
    };

    if raw_uses.is_empty() {
        return ExtractedResponse::plain(text);
    }

    let ms = chrono::Utc::now().timestamp_millis();
    let tool_uses = raw_uses
        .into_iter()
        .enumerate()
        .map(|(index, raw)| {
            let mut input = serde_json::Map::new();
            for (param, value) in raw.params {
                input.insert(param.clone(), coerce_value(&raw.name, &param, &value));
            }
            ToolUseBlock {
                id: format!("toolu_{}_{}", ms, index),
                name: raw.name,
                input,
            }
        })
        .collect();

    ExtractedResponse {
        text_before: text[..start].trim().to_string(),
        tool_uses,
    }
}

struct RawToolUse {
    name: String,
    /// Parameter name → exact serialized body, in document order.
    params: Vec<(String, String)>,
}

fn parse_island(island: &str) -> Result<Vec<RawToolUse>, quick_xml::Error> {
    let mut reader = Reader::from_str(island);
    reader.config_mut().check_end_names = false;

    let mut uses = Vec::new();
    let mut in_wrapper = false;
    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"tool_uses" => in_wrapper = true,
                b"tool_use" => {
                    let name = attribute(&e, "name")?.unwrap_or_default();
                    let params = parse_parameters(&mut reader, island)?;
                    uses.push(RawToolUse { name, params });
                }
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"tool_use" => {
                let name = attribute(&e, "name")?.unwrap_or_default();
                uses.push(RawToolUse {
                    name,
                    params: Vec::new(),
                });
            }
            // the first wrapper is the whole island; trailing prose is not
            // part of the document
            Event::End(e) if in_wrapper && e.local_name().as_ref() == b"tool_uses" => break,
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(uses)
}

/// Read the children of one `<tool_use>` element. Parameter bodies come
/// back as raw byte-range slices of the island, not re-serialized events.
fn parse_parameters(
    reader: &mut Reader<&[u8]>,
    island: &str,
) -> Result<Vec<(String, String)>, quick_xml::Error> {
    let mut params = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Start(e) if e.local_name().as_ref() == b"parameter" => {
                let name = attribute(&e, "name")?.unwrap_or_default();
                let end = e.to_end().into_owned();
                let span = reader.read_to_end(end.name())?;
                let value = island[span.start as usize..span.end as usize].to_string();
                params.push((name, value));
            }
            Event::Start(e) => {
                // unknown child — skip it wholesale
                let end = e.to_end().into_owned();
                reader.read_to_end(end.name())?;
            }
            Event::End(e) if e.local_name().as_ref() == b"tool_use" => break,
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(params)
}

fn attribute(
    element: &quick_xml::events::BytesStart<'_>,
    key: &str,
) -> Result<Option<String>, quick_xml::Error> {
    let attr = element
        .try_get_attribute(key)
        .map_err(quick_xml::Error::from)?;
    match attr {
        Some(attr) => {
            let value = attr.unescape_value().map_err(quick_xml::Error::from)?;
            Ok(Some(value.into_owned()))
        }
        None => Ok(None),
    }
}
