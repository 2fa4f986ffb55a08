//! Message-history → single-prompt encoding. Deterministic: identical
//! requests produce identical bytes.
//!
//! Conversation structure survives inside one prompt string via XML-style
//! boundary tags. A tag is only usable when none of the content it will
//! frame contains it; colliding bases get numeric suffixes, assigned in
//! message order.

use crate::api::{MessagesRequest, Role};
use crate::toolspec::render_tools;

const TAG_SYSTEM: &str = "custom_system_prompt";
const TAG_FORMATTING: &str = "formatting_instructions";
const TAG_USER: &str = "user";
const TAG_ASSISTANT: &str = "ai_assistant";

/// Highest numeric suffix tried before giving up on finding a free tag.
const MAX_TAG_SUFFIX: usize = 999;

/// Finds collision-free boundary tags against a fixed set of content
/// strings. Each base keeps a cursor so repeated finds hand out tags in
/// order.
struct TagAllocator {
    contents: Vec<String>,
    cursors: std::collections::HashMap<&'static str, usize>,
}

impl TagAllocator {
    fn new(contents: Vec<String>) -> Self {
        Self {
            contents,
            cursors: std::collections::HashMap::new(),
        }
    }

    /// Next free tag for `base`, advancing the cursor past it.
    fn next(&mut self, base: &'static str) -> String {
        let start = *self.cursors.get(base).unwrap_or(&0);
        let (tag, index) = self.find_from(base, start);
        self.cursors.insert(base, index + 1);
        tag
    }

    /// First free tag for `base` at suffix `start` or later, without
    /// touching the cursor.
    fn peek_from(&self, base: &'static str, start: usize) -> String {
        self.find_from(base, start).0
    }

    fn find_from(&self, base: &str, start: usize) -> (String, usize) {
        for index in start..=MAX_TAG_SUFFIX {
            let candidate = candidate_tag(base, index);
            if !self.collides(&candidate) {
                return (candidate, index);
            }
        }
        // Pathological content containing a thousand suffixed tags; use the
        // last candidate rather than failing the request.
        (candidate_tag(base, MAX_TAG_SUFFIX), MAX_TAG_SUFFIX)
    }

    /// A candidate collides when any content string contains the bare tag
    /// or either of its bracketed forms.
    fn collides(&self, candidate: &str) -> bool {
        let open = format!("<{}>", candidate);
        let close = format!("</{}>", candidate);
        self.contents
            .iter()
            .any(|c| c.contains(candidate) || c.contains(&open) || c.contains(&close))
    }
}

fn candidate_tag(base: &str, index: usize) -> String {
    if index == 0 {
        base.to_string()
    } else {
        format!("{}_{}", base, index)
    }
}

fn wrap(tag: &str, content: &str) -> String {
    format!("<{tag}>{content}</{tag}>")
}

fn formatting_block(final_assistant_tag: &str) -> String {
    format!(
        "This conversation uses XML-style tags for message boundaries.\n\
You are fulfilling the role of `<{final_assistant_tag}>`.\n\
Respond with ONLY your answer as plain text.\n\
Do NOT include XML tags in your response."
    )
}

/// Build the upstream prompt for a Messages request.
///
/// Single-turn (exactly one user message, no history): the user text goes
/// through raw, preceded by the wrapped system preamble when one exists.
/// Multi-turn: system block, formatting instructions announcing the tag the
/// model is asked to fill, then every message wrapped in its role tag.
pub fn build_prompt(req: &MessagesRequest) -> String {
    let raw_system = req.system.as_ref().map(|s| s.as_text()).unwrap_or_default();
    let tools_text = render_tools(&req.tools);
    let system_text = join_nonempty(&raw_system, &tools_text);

    let messages: Vec<(Role, String)> = req
        .messages
        .iter()
        .map(|m| (m.role, m.content.as_prompt_text()))
        .collect();

    let single_turn = messages.len() == 1 && messages[0].0 == Role::User;
    if single_turn {
        let user_text = &messages[0].1;
        if system_text.is_empty() {
            return user_text.clone();
        }
        let allocator =
            TagAllocator::new(vec![system_text.clone(), user_text.clone()]);
        let tag = allocator.peek_from(TAG_SYSTEM, 0);
        return format!("{}\n\n{}", wrap(&tag, &system_text), user_text);
    }

    // multi-turn: every string that will appear in the prompt takes part in
    // collision detection
    let mut contents: Vec<String> = Vec::with_capacity(messages.len() + 1);
    if !system_text.is_empty() {
        contents.push(system_text.clone());
    }
    contents.extend(messages.iter().map(|(_, text)| text.clone()));

    let mut allocator = TagAllocator::new(contents);
    let assistant_count = messages
        .iter()
        .filter(|(role, _)| *role == Role::Assistant)
        .count();
    // the tag the model is asked to fill, announced in the formatting block
    let final_assistant_tag = allocator.peek_from(TAG_ASSISTANT, assistant_count);

    let mut blocks: Vec<String> = Vec::with_capacity(messages.len() + 2);
    if !system_text.is_empty() {
        let tag = allocator.next(TAG_SYSTEM);
        blocks.push(wrap(&tag, &system_text));
    }
    {
        let tag = allocator.next(TAG_FORMATTING);
        blocks.push(wrap(&tag, &formatting_block(&final_assistant_tag)));
    }
    for (role, text) in &messages {
        let base = match role {
            Role::User => TAG_USER,
            Role::Assistant => TAG_ASSISTANT,
        };
        let tag = allocator.next(base);
        blocks.push(wrap(&tag, text));
    }

    blocks.join("\n\n").trim_end().to_string()
}

fn join_nonempty(a: &str, b: &str) -> String {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => String::new(),
        (true, false) => b.to_string(),
        (false, true) => a.to_string(),
        (false, false) => format!("{}\n\n{}", a, b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(json: &str) -> MessagesRequest {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn single_turn_without_system_is_raw() {
        let req = request(r#"{"messages":[{"role":"user","content":"ping"}]}"#);
        assert_eq!(build_prompt(&req), "ping");
    }

    #[test]
    fn single_turn_is_not_trimmed() {
        let req = request(r#"{"messages":[{"role":"user","content":"ping  \n"}]}"#);
        assert_eq!(build_prompt(&req), "ping  \n");
    }

    #[test]
    fn single_turn_with_system_wraps_preamble_only() {
        let req = request(
            r#"{"system":"Be terse.","messages":[{"role":"user","content":"ping"}]}"#,
        );
        assert_eq!(
            build_prompt(&req),
            "<custom_system_prompt>Be terse.</custom_system_prompt>\n\nping"
        );
    }

    #[test]
    fn multi_turn_layout_and_final_tag() {
        let req = request(
            r#"{"messages":[
                {"role":"user","content":"one"},
                {"role":"assistant","content":"two"},
                {"role":"user","content":"three"}
            ]}"#,
        );
        let prompt = build_prompt(&req);

        assert!(prompt.starts_with("<formatting_instructions>This conversation uses XML-style tags"));
        assert!(prompt.contains("You are fulfilling the role of `<ai_assistant_1>`."));
        assert!(prompt.contains("<user>one</user>\n\n<ai_assistant>two</ai_assistant>\n\n<user_1>three</user_1>"));
        assert!(!prompt.ends_with('\n'));
    }

    #[test]
    fn collision_bumps_message_tags_in_order() {
        // assistant history references a literal <user> tag
        let req = request(
            r#"{"messages":[
                {"role":"user","content":"before <user>"},
                {"role":"assistant","content":"ok"},
                {"role":"user","content":"after"}
            ]}"#,
        );
        let prompt = build_prompt(&req);

        assert!(prompt.contains("<user_1>before <user></user_1>"));
        assert!(prompt.contains("<ai_assistant>ok</ai_assistant>"));
        assert!(prompt.contains("<user_2>after</user_2>"));
        assert!(prompt.contains("You are fulfilling the role of `<ai_assistant_1>`."));
    }

    #[test]
    fn chosen_tags_never_appear_in_content() {
        let req = request(
            r#"{"system":"prose mentioning user and even user_1","messages":[
                {"role":"user","content":"first"},
                {"role":"assistant","content":"fine"},
                {"role":"user","content":"done"}
            ]}"#,
        );
        let prompt = build_prompt(&req);

        // user and user_1 collide with the system text, so messages skip ahead
        assert!(prompt.contains("<user_2>first</user_2>"));
        assert!(prompt.contains("<user_3>done</user_3>"));
        assert!(prompt.contains("<ai_assistant>fine</ai_assistant>"));
        assert!(prompt.contains("You are fulfilling the role of `<ai_assistant_1>`."));
    }

    #[test]
    fn structured_content_is_serialized_verbatim() {
        let req = request(
            r#"{"messages":[
                {"role":"user","content":"run it"},
                {"role":"assistant","content":[{"type":"tool_use","id":"t1","name":"Bash","input":{"command":"ls"}}]},
                {"role":"user","content":[{"type":"tool_result","tool_use_id":"t1","content":"ok"}]}
            ]}"#,
        );
        let prompt = build_prompt(&req);

        assert!(prompt.contains(r#"<ai_assistant>[{"type":"tool_use","id":"t1","name":"Bash","input":{"command":"ls"}}]</ai_assistant>"#));
        assert!(prompt.contains(r#"<user_1>[{"type":"tool_result","tool_use_id":"t1","content":"ok"}]</user_1>"#));
    }

    #[test]
    fn tools_append_to_system_preamble() {
        let req = request(
            r#"{"system":"Base.","tools":[{"name":"Ping","input_schema":{}}],
                "messages":[{"role":"user","content":"go"}]}"#,
        );
        let prompt = build_prompt(&req);
        assert!(prompt.starts_with("<custom_system_prompt>Base.\n\n# Available Tools"));
        assert!(prompt.ends_with("</custom_system_prompt>\n\ngo"));
    }

    #[test]
    fn determinism() {
        let raw = r#"{"system":"s","messages":[
            {"role":"user","content":"a"},
            {"role":"assistant","content":"b"},
            {"role":"user","content":"c"}
        ]}"#;
        assert_eq!(build_prompt(&request(raw)), build_prompt(&request(raw)));
    }
}
