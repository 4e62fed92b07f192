use serde::Deserialize;

use crate::content::{Citation, FeedbackOption, FeedbackRequest, null_to_default};
use crate::stream::StreamEvent;

/// Longest tool result excerpt copied into the reasoning trace.
const RESULT_EXCERPT_CHARS: usize = 160;

#[derive(Deserialize)]
struct MessageChunk {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

#[derive(Deserialize)]
struct ToolCall {
    #[serde(default)]
    name: String,
    #[serde(default)]
    args: serde_json::Value,
}

#[derive(Deserialize)]
struct ToolCalls {
    #[serde(default, deserialize_with = "null_to_default")]
    tool_calls: Vec<ToolCall>,
}

#[derive(Deserialize)]
struct ToolCallResult {
    #[serde(default)]
    content: serde_json::Value,
}

#[derive(Deserialize)]
struct SearchPayload {
    #[serde(default)]
    query: String,
}

#[derive(Deserialize)]
struct VisitPayload {
    #[serde(default)]
    url: String,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Deserialize)]
struct InterruptPayload {
    #[serde(default)]
    id: String,
    #[serde(default)]
    content: String,
    #[serde(default, deserialize_with = "null_to_default")]
    options: Vec<FeedbackOption>,
}

#[derive(Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct SearchHit {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

/// Decodes one server-sent event from the event-stream backend.
///
/// The backend's agent vocabulary is folded into the common event set: tool
/// activity, searches and page visits become reasoning text; message chunks
/// become reasoning or content text.
pub(crate) fn decode_event(event: Option<&str>, data: &str) -> Vec<StreamEvent> {
    if data.trim().is_empty() || data.trim() == "[DONE]" {
        return Vec::new();
    }
    let name = event.unwrap_or("message_chunk");
    let decoded = match name {
        "message_chunk" => parse(data).map(map_message_chunk),
        "tool_calls" => parse(data).map(map_tool_calls),
        "tool_call_result" => parse(data).map(map_tool_result),
        "search" => parse::<SearchPayload>(data).map(|p| reasoning(format!("Searching: {}\n", p.query))),
        "visit" => parse::<VisitPayload>(data).map(|p| {
            let label = p.title.filter(|t| !t.is_empty()).unwrap_or_else(|| p.url.clone());
            reasoning(format!("Reading: {label} ({})\n", p.url))
        }),
        "interrupt" => parse::<InterruptPayload>(data).map(|p| {
            vec![StreamEvent::AwaitingFeedback(FeedbackRequest {
                id: p.id,
                prompt: p.content,
                options: p.options,
            })]
        }),
        "error" => parse::<ErrorPayload>(data).map(|p| {
            vec![StreamEvent::Error {
                message: p
                    .message
                    .or(p.error)
                    .unwrap_or_else(|| "research service reported an error".to_string()),
                code: p.code.and_then(|code| match code {
                    serde_json::Value::Null => None,
                    serde_json::Value::String(s) => Some(s),
                    other => Some(other.to_string()),
                }),
            }]
        }),
        other => {
            tracing::trace!(event = other, "ignoring server event");
            Ok(Vec::new())
        }
    };
    decoded.unwrap_or_else(|e| {
        tracing::debug!(event = name, error = %e, "undecodable server event");
        vec![StreamEvent::parse_failure()]
    })
}

fn parse<'a, T: Deserialize<'a>>(data: &'a str) -> Result<T, serde_json::Error> {
    serde_json::from_str(data)
}

fn reasoning(text: String) -> Vec<StreamEvent> {
    vec![StreamEvent::ReasoningChunk { text }]
}

fn map_message_chunk(chunk: MessageChunk) -> Vec<StreamEvent> {
    let mut events = Vec::with_capacity(2);
    if let Some(text) = chunk.reasoning_content.filter(|t| !t.is_empty()) {
        events.push(StreamEvent::ReasoningChunk { text });
    }
    if let Some(text) = chunk.content.filter(|t| !t.is_empty()) {
        events.push(StreamEvent::ContentChunk { text });
    }
    events
}

fn map_tool_calls(calls: ToolCalls) -> Vec<StreamEvent> {
    let mut text = String::new();
    for call in calls.tool_calls.iter().filter(|c| !c.name.is_empty()) {
        match call.args.get("query").and_then(|q| q.as_str()) {
            Some(query) => text.push_str(&format!("Searching: {query}\n")),
            None => text.push_str(&format!("Calling tool: {}\n", call.name)),
        }
    }
    if text.is_empty() {
        Vec::new()
    } else {
        reasoning(text)
    }
}

fn map_tool_result(result: ToolCallResult) -> Vec<StreamEvent> {
    let hits = match &result.content {
        serde_json::Value::Array(items) => Some(items.clone()),
        serde_json::Value::String(raw) => match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(serde_json::Value::Array(items)) => Some(items),
            _ => None,
        },
        _ => None,
    };

    if let Some(items) = hits {
        let citations: Vec<Citation> = items
            .into_iter()
            .filter_map(|item| serde_json::from_value::<SearchHit>(item).ok())
            .filter_map(|hit| {
                let url = hit.url.filter(|u| !u.is_empty())?;
                Some(Citation::new(
                    url,
                    hit.title.unwrap_or_default(),
                    excerpt(hit.content.as_deref().unwrap_or_default()),
                ))
            })
            .collect();
        if !citations.is_empty() {
            return vec![
                StreamEvent::ReasoningChunk {
                    text: format!("Found {} sources\n", citations.len()),
                },
                StreamEvent::Citations { citations },
            ];
        }
    }

    let summary = match &result.content {
        serde_json::Value::String(raw) => excerpt(raw),
        serde_json::Value::Null => String::new(),
        other => excerpt(&other.to_string()),
    };
    if summary.is_empty() {
        Vec::new()
    } else {
        reasoning(format!("Result: {summary}\n"))
    }
}

fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(RESULT_EXCERPT_CHARS) {
        Some((cut, _)) => format!("{}…", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}
