use serde::Deserialize;

use crate::content::{Citation, CompletionMetadata, Progress, null_to_default};
use crate::stream::StreamEvent;

#[derive(Deserialize)]
struct SocketFrame {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    accumulated_content: Option<String>,
    #[serde(default)]
    final_content: Option<String>,
    #[serde(default, deserialize_with = "null_to_default")]
    citations: Vec<serde_json::Value>,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<serde_json::Value>,
    #[serde(default)]
    progress: Option<serde_json::Value>,
}

/// Parses one nested record, dropping it alone when it is malformed.
fn lenient<T: serde::de::DeserializeOwned>(value: serde_json::Value, what: &str) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            tracing::debug!(record = what, error = %e, "skipping malformed record in socket frame");
            None
        }
    }
}

/// Decodes one socket text frame.
pub(crate) fn decode_frame(data: &str) -> Vec<StreamEvent> {
    let frame: SocketFrame = match serde_json::from_str(data) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::debug!(error = %e, "undecodable socket frame");
            return vec![StreamEvent::parse_failure()];
        }
    };

    let mut events = Vec::with_capacity(2);
    if let Some(progress) = frame
        .progress
        .filter(|v| !v.is_null())
        .and_then(|v| lenient::<Progress>(v, "progress"))
    {
        events.push(StreamEvent::Progress(progress));
    }
    let Some(kind) = frame.kind else {
        return events;
    };
    match kind.as_str() {
        "thinking_started" => events.push(StreamEvent::ReasoningStarted),
        "thinking_chunk" => {
            if let Some(text) = frame.content.filter(|t| !t.is_empty()) {
                events.push(StreamEvent::ReasoningChunk { text });
            }
        }
        "thinking_complete" => events.push(StreamEvent::ReasoningComplete),
        "content_chunk" => {
            if let Some(text) = frame.content.filter(|t| !t.is_empty()) {
                events.push(StreamEvent::ContentChunk { text });
            }
        }
        "completion" => events.push(StreamEvent::Completion {
            accumulated_text: frame.accumulated_content,
            final_text: frame.final_content,
            citations: frame
                .citations
                .into_iter()
                .filter_map(|v| lenient::<Citation>(v, "citation"))
                .collect(),
            metadata: frame
                .metadata
                .filter(|v| !v.is_null())
                .and_then(|v| lenient::<CompletionMetadata>(v, "metadata")),
        }),
        "error" => events.push(StreamEvent::Error {
            message: frame
                .message
                .or(frame.content)
                .unwrap_or_else(|| "research service reported an error".to_string()),
            code: frame.code.map(|code| match code {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            }),
        }),
        other => tracing::trace!(frame_type = other, "ignoring socket frame"),
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_thinking_and_content_frames() {
        assert_eq!(
            decode_frame(r#"{"type":"thinking_started"}"#),
            vec![StreamEvent::ReasoningStarted]
        );
        assert_eq!(
            decode_frame(r#"{"type":"thinking_chunk","content":"Sizing the market"}"#),
            vec![StreamEvent::ReasoningChunk {
                text: "Sizing the market".into()
            }]
        );
        assert_eq!(
            decode_frame(r###"{"type":"content_chunk","content":"## Verdict"}"###),
            vec![StreamEvent::ContentChunk {
                text: "## Verdict".into()
            }]
        );
    }

    #[test]
    fn progress_precedes_the_main_event() {
        let events = decode_frame(
            r#"{"type":"thinking_complete","progress":{"phase":"writing","percentage":60.0,"detail":"drafting"}}"#,
        );
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], StreamEvent::Progress(p) if p.phase == "writing"));
        assert_eq!(events[1], StreamEvent::ReasoningComplete);
    }

    #[test]
    fn completion_carries_fallback_text_citations_and_metadata() {
        let events = decode_frame(
            r#"{"type":"completion","accumulated_content":"A","final_content":"B",
                "citations":[{"url":"https://a.example","title":"A"}],
                "metadata":{"tokens_used":42}}"#,
        );
        let StreamEvent::Completion {
            accumulated_text,
            final_text,
            citations,
            metadata,
        } = &events[0]
        else {
            panic!("expected completion, got {events:?}");
        };
        assert_eq!(accumulated_text.as_deref(), Some("A"));
        assert_eq!(final_text.as_deref(), Some("B"));
        assert_eq!(citations[0].url, "https://a.example");
        assert_eq!(metadata.as_ref().and_then(|m| m.tokens_used), Some(42));
    }

    #[test]
    fn error_frame_keeps_message_and_code() {
        assert_eq!(
            decode_frame(r#"{"type":"error","message":"rate limited","code":429}"#),
            vec![StreamEvent::Error {
                message: "rate limited".into(),
                code: Some("429".into())
            }]
        );
    }

    #[test]
    fn bad_nested_records_do_not_discard_the_completion() {
        let events = decode_frame(
            r#"{"type":"completion","accumulated_content":"Report",
                "citations":[{"title":"Internal note"},42,{"url":"https://a.example","title":"A"}],
                "metadata":{"tokens_used":"1200","model":7}}"#,
        );
        let StreamEvent::Completion {
            accumulated_text,
            citations,
            metadata,
            ..
        } = &events[0]
        else {
            panic!("expected completion, got {events:?}");
        };
        assert_eq!(accumulated_text.as_deref(), Some("Report"));
        assert_eq!(citations.len(), 2);
        assert_eq!(citations[0].url, "");
        assert_eq!(citations[1].url, "https://a.example");
        assert_eq!(metadata, &None);
    }

    #[test]
    fn string_token_count_is_read() {
        let events = decode_frame(r#"{"type":"completion","metadata":{"tokens_used":"1200"}}"#);
        let StreamEvent::Completion { metadata, .. } = &events[0] else {
            panic!("expected completion, got {events:?}");
        };
        assert_eq!(metadata.as_ref().and_then(|m| m.tokens_used), Some(1200));
    }

    #[test]
    fn malformed_progress_is_dropped() {
        assert_eq!(
            decode_frame(r#"{"type":"thinking_started","progress":{"percentage":"half"}}"#),
            vec![StreamEvent::ReasoningStarted]
        );
    }

    #[test]
    fn malformed_json_becomes_parse_failure() {
        assert_eq!(decode_frame("{not json"), vec![StreamEvent::parse_failure()]);
    }

    #[test]
    fn unknown_and_untyped_frames_decode_to_nothing() {
        assert!(decode_frame(r#"{"type":"pong"}"#).is_empty());
        assert!(decode_frame(r#"{"status":"connected"}"#).is_empty());
        assert!(decode_frame(r#"{"type":"content_chunk","content":""}"#).is_empty());
    }
}
