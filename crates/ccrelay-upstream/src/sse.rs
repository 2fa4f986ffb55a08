use serde::Deserialize;
use tracing::debug;

/// Semantic events decoded from the upstream completion stream.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionEvent {
    /// Incremental completion text.
    Delta(String),
    /// Terminal stop reason; no further deltas follow.
    Stop(String),
    /// Upstream reported an error mid-stream.
    Error(String),
}

#[derive(Deserialize)]
struct CompletionFrame {
    completion: Option<String>,
    stop_reason: Option<String>,
    error: Option<FrameError>,
}

#[derive(Deserialize)]
struct FrameError {
    message: Option<String>,
    #[serde(rename = "type")]
    error_type: Option<String>,
}

/// Resumable decoder for the upstream `data:`-framed completion stream.
///
/// Chunks arrive split at arbitrary byte boundaries, so complete lines are
/// dispatched as they close and the partial tail is carried between calls.
/// Comment lines (`: ping`) and frames without known fields are ignored.
#[derive(Default)]
pub struct SseDecoder {
    line_buf: String,
    stopped: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of stream text, get back any events it completed.
    pub fn push(&mut self, chunk: &str) -> Vec<CompletionEvent> {
        self.line_buf.push_str(chunk);

        let mut events = Vec::new();
        // keep the unterminated last line in the buffer
        while let Some(newline) = self.line_buf.find('\n') {
            let line: String = self.line_buf.drain(..=newline).collect();
            self.decode_line(line.trim(), &mut events);
        }
        events
    }

    /// Drain whatever is left once the transport closes.
    pub fn finish(&mut self) -> Vec<CompletionEvent> {
        let tail = std::mem::take(&mut self.line_buf);
        let mut events = Vec::new();
        self.decode_line(tail.trim(), &mut events);
        events
    }

    /// True once a stop_reason frame has been seen.
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    fn decode_line(&mut self, line: &str, events: &mut Vec<CompletionEvent>) {
        if self.stopped || line.is_empty() || line.starts_with(':') {
            return;
        }
        let Some(data) = line.strip_prefix("data:") else {
            // `event:` lines and anything else carry no completion payload
            return;
        };

        let frame: CompletionFrame = match serde_json::from_str(data.trim_start()) {
            Ok(f) => f,
            Err(e) => {
                debug!(err = %e, "skipping undecodable SSE frame");
                return;
            }
        };

        if let Some(err) = frame.error {
            let message = err
                .message
                .or(err.error_type)
                .unwrap_or_else(|| "upstream error".to_string());
            events.push(CompletionEvent::Error(message));
            return;
        }

        if let Some(text) = frame.completion {
            if !text.is_empty() {
                events.push(CompletionEvent::Delta(text));
            }
        }

        if let Some(reason) = frame.stop_reason {
            self.stopped = true;
            events.push(CompletionEvent::Stop(reason));
        }
    }
}

/// Decode a fully buffered SSE body in one pass.
pub fn decode_buffered(body: &str) -> Vec<CompletionEvent> {
    let mut decoder = SseDecoder::new();
    let mut events = decoder.push(body);
    events.extend(decoder.finish());
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_complete_frames() {
        let mut d = SseDecoder::new();
        let events = d.push("data: {\"completion\":\"Hel\"}\n\ndata: {\"completion\":\"lo\"}\n\n");
        assert_eq!(
            events,
            vec![
                CompletionEvent::Delta("Hel".into()),
                CompletionEvent::Delta("lo".into())
            ]
        );
    }

    #[test]
    fn reassembles_split_lines() {
        let mut d = SseDecoder::new();
        assert!(d.push("data: {\"comp").is_empty());
        assert!(d.push("letion\":\"pong\"}").is_empty());
        let events = d.push("\n");
        assert_eq!(events, vec![CompletionEvent::Delta("pong".into())]);
    }

    #[test]
    fn stop_reason_terminates() {
        let mut d = SseDecoder::new();
        let events =
            d.push("data: {\"completion\":\"x\",\"stop_reason\":\"stop_sequence\"}\n");
        assert_eq!(
            events,
            vec![
                CompletionEvent::Delta("x".into()),
                CompletionEvent::Stop("stop_sequence".into())
            ]
        );
        assert!(d.is_stopped());
        // frames after stop are discarded
        assert!(d.push("data: {\"completion\":\"late\"}\n").is_empty());
    }

    #[test]
    fn pings_and_unknown_frames_are_ignored() {
        let mut d = SseDecoder::new();
        let events = d.push(": ping\n\nevent: completion\ndata: {\"unrelated\":true}\n");
        assert!(events.is_empty());
    }

    #[test]
    fn error_frames_surface() {
        let mut d = SseDecoder::new();
        let events =
            d.push("data: {\"error\":{\"type\":\"overloaded\",\"message\":\"busy\"}}\n");
        assert_eq!(events, vec![CompletionEvent::Error("busy".into())]);
    }

    #[test]
    fn malformed_json_is_skipped() {
        let mut d = SseDecoder::new();
        assert!(d.push("data: {not json}\n").is_empty());
        let events = d.push("data: {\"completion\":\"ok\"}\n");
        assert_eq!(events, vec![CompletionEvent::Delta("ok".into())]);
    }

    #[test]
    fn finish_drains_unterminated_tail() {
        let mut d = SseDecoder::new();
        assert!(d.push("data: {\"completion\":\"tail\"}").is_empty());
        let events = d.finish();
        assert_eq!(events, vec![CompletionEvent::Delta("tail".into())]);
    }

    #[test]
    fn buffered_decode_concatenates() {
        let body = "data: {\"completion\":\"a\"}\n\ndata: {\"completion\":\"b\"}\n\ndata: {\"stop_reason\":\"stop_sequence\"}\n\n";
        let events = decode_buffered(body);
        let text: String = events
            .iter()
            .filter_map(|e| match e {
                CompletionEvent::Delta(t) => Some(t.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "ab");
        assert!(matches!(events.last(), Some(CompletionEvent::Stop(_))));
    }
}
