pub mod api;
pub mod coerce;
pub mod extract;
pub mod heuristic;
pub mod prompt;
pub mod toolspec;

pub use api::{ContentBlock, MessageContent, MessagesRequest, Role, ToolDefinition};
pub use extract::{extract_tool_uses, ExtractedResponse, ToolUseBlock};
pub use prompt::build_prompt;
