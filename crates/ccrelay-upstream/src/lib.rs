pub mod client;
pub mod error;
pub mod sse;

pub use client::{CcapiClient, ConversationHandle, ConversationMeta};
pub use error::{classify, FailureKind, UpstreamError};
pub use sse::{CompletionEvent, SseDecoder};
