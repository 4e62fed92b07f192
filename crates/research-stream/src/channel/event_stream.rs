use std::collections::VecDeque;
use std::pin::Pin;

use futures::StreamExt as _;
use futures::stream;
use tracing::debug;

use crate::config::EngineConfig;
use crate::errors::{ChannelError, ResearchError};
use crate::model::BackendKind;

use super::options::EventStreamOptions;
use super::sse::SseDecoder;
use super::{Channel, ChannelHandle, ChannelRequest, RawMessage, read_options};

const BACKEND: BackendKind = BackendKind::EventStream;

type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static>>;

/// Channel for the server-push event-stream backend.
///
/// Each `open` issues one POST and decodes the `text/event-stream` body.
/// Resuming after feedback issues a fresh POST on the same thread.
pub struct EventStreamChannel {
    client: reqwest::Client,
    url: String,
}

impl EventStreamChannel {
    /// Creates a channel from engine configuration.
    pub fn new(config: &EngineConfig) -> Result<Self, ResearchError> {
        if config.event_stream_url.trim().is_empty() {
            return Err(ResearchError::Config(
                "event_stream_url must not be empty".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| ResearchError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: config.event_stream_url.clone(),
        })
    }
}

#[async_trait::async_trait]
impl Channel for EventStreamChannel {
    fn kind(&self) -> BackendKind {
        BACKEND
    }

    fn supports_feedback(&self) -> bool {
        true
    }

    async fn open(&self, request: &ChannelRequest) -> Result<ChannelHandle, ChannelError> {
        let options: EventStreamOptions = read_options(BACKEND, request)?;
        let body = build_request_body(request, &options);
        debug!(session_id = %request.session_id, resume = request.feedback.is_some(), "opening event stream");

        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::refused(BACKEND, format!("request failed: {e}"), None))?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ChannelError::refused(
                BACKEND,
                format!("stream request failed with status {status}: {body}"),
                Some(status.as_u16()),
            ));
        }
        if let Some(content_type) = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            && !content_type.contains("text/event-stream")
        {
            return Err(ChannelError::protocol(
                BACKEND,
                format!("expected text/event-stream response, got {content_type}"),
            ));
        }

        let bytes_stream: ByteStream = Box::pin(response.bytes_stream());
        Ok(ChannelHandle::new(
            BACKEND,
            Box::pin(raw_message_stream(bytes_stream)),
        ))
    }
}

pub(crate) fn build_request_body(
    request: &ChannelRequest,
    options: &EventStreamOptions,
) -> serde_json::Value {
    let content = request.feedback.as_deref().unwrap_or(&request.query);
    let thread_id = options
        .thread_id
        .clone()
        .unwrap_or_else(|| request.session_id.clone());

    let mut body = serde_json::json!({
        "messages": [{ "role": "user", "content": content }],
        "thread_id": thread_id,
        "max_plan_iterations": options.max_plan_iterations,
        "max_step_num": options.max_step_num,
        "max_search_results": options.max_search_results,
        "auto_accepted_plan": options.auto_accepted_plan,
        "enable_background_investigation": options.enable_background_investigation,
        "report_style": options.report_style,
        "enable_deep_thinking": options.enable_deep_thinking,
    });
    if let Some(feedback) = request.feedback.as_ref() {
        body["interrupt_feedback"] = serde_json::Value::String(feedback.clone());
    }
    body
}

fn raw_message_stream(
    bytes_stream: ByteStream,
) -> impl futures::Stream<Item = Result<RawMessage, ChannelError>> + Send {
    struct State {
        bytes_stream: ByteStream,
        decoder: SseDecoder,
        pending: VecDeque<RawMessage>,
        done: bool,
    }

    stream::try_unfold(
        State {
            bytes_stream,
            decoder: SseDecoder::default(),
            pending: VecDeque::new(),
            done: false,
        },
        |mut state| async move {
            loop {
                if let Some(frame) = state.pending.pop_front() {
                    return Ok(Some((frame, state)));
                }
                if state.done {
                    return Ok(None);
                }

                match state.bytes_stream.next().await {
                    Some(Ok(chunk)) => {
                        state.pending.extend(state.decoder.push_chunk(&chunk));
                    }
                    Some(Err(e)) => {
                        return Err(ChannelError::transport(
                            BACKEND,
                            format!("event stream read failed: {e}"),
                        ));
                    }
                    None => {
                        state.pending.extend(state.decoder.finish());
                        state.done = true;
                    }
                }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};

    fn request(feedback: Option<&str>) -> ChannelRequest {
        ChannelRequest {
            session_id: "session-1".into(),
            query: "Is a dog-walking app viable?".into(),
            options: None,
            feedback: feedback.map(str::to_string),
        }
    }

    #[test]
    fn request_body_has_wire_fields_and_defaults() {
        let body = build_request_body(&request(None), &EventStreamOptions::default());
        assert_eq!(body["thread_id"], "session-1");
        assert_eq!(body["messages"][0]["content"], "Is a dog-walking app viable?");
        assert_eq!(body["max_plan_iterations"], 1);
        assert_eq!(body["auto_accepted_plan"], false);
        assert_eq!(body["report_style"], "academic");
        assert!(body.get("interrupt_feedback").is_none());
    }

    #[test]
    fn resume_body_carries_feedback_on_the_same_thread() {
        let options = EventStreamOptions::default().thread_id("thread-9");
        let body = build_request_body(&request(Some("[ACCEPTED]")), &options);
        assert_eq!(body["thread_id"], "thread-9");
        assert_eq!(body["interrupt_feedback"], "[ACCEPTED]");
        assert_eq!(body["messages"][0]["content"], "[ACCEPTED]");
    }

    #[tokio::test]
    async fn raw_stream_reassembles_frames_across_chunks() {
        let chunks: Vec<Result<bytes::Bytes, reqwest::Error>> = vec![
            Ok(bytes::Bytes::from_static(b"event: message_chunk\ndata: {\"con")),
            Ok(bytes::Bytes::from_static(b"tent\":\"Hi\"}\n\nevent: message_chunk\n")),
            Ok(bytes::Bytes::from_static(b"data: {\"content\":\"!\"}")),
        ];
        let messages: Vec<_> = raw_message_stream(Box::pin(stream::iter(chunks)))
            .collect()
            .await;
        assert_eq!(messages.len(), 2);
        assert_eq!(
            messages[0].as_ref().expect("first"),
            &RawMessage::event("message_chunk", "{\"content\":\"Hi\"}")
        );
        assert_eq!(
            messages[1].as_ref().expect("second"),
            &RawMessage::event("message_chunk", "{\"content\":\"!\"}")
        );
    }

    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut buf = vec![0_u8; 8192];
            let _ = socket.read(&mut buf).await;
            let head = format!(
                "{status_line}\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n"
            );
            socket.write_all(head.as_bytes()).await.expect("head");
            for piece in body.as_bytes().chunks(7) {
                socket.write_all(piece).await.expect("body");
                socket.flush().await.expect("flush");
            }
            let _ = socket.shutdown().await;
        });
        format!("http://{addr}/api/chat/stream")
    }

    #[tokio::test]
    async fn open_streams_frames_from_http_body() {
        let url = serve_once(
            "HTTP/1.1 200 OK",
            "event: message_chunk\ndata: {\"content\":\"Hello\"}\n\n: ping\n\nevent: message_chunk\ndata: {\"content\":\" world\"}\n\n",
        )
        .await;
        let channel =
            EventStreamChannel::new(&EngineConfig::default().event_stream_url(url)).expect("channel");
        let mut handle = channel.open(&request(None)).await.expect("open");
        let first = handle.next_message().await.expect("first").expect("ok");
        assert_eq!(first.data, "{\"content\":\"Hello\"}");
        let second = handle.next_message().await.expect("second").expect("ok");
        assert_eq!(second.data, "{\"content\":\" world\"}");
        assert!(handle.next_message().await.is_none());
    }

    #[tokio::test]
    async fn open_maps_error_status_to_connection_refused() {
        let url = serve_once("HTTP/1.1 503 Service Unavailable", "busy").await;
        let channel =
            EventStreamChannel::new(&EngineConfig::default().event_stream_url(url)).expect("channel");
        let err = match channel.open(&request(None)).await {
            Ok(_) => panic!("503 should fail"),
            Err(err) => err,
        };
        assert!(matches!(
            err,
            ChannelError::ConnectionRefused {
                status_code: Some(503),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn open_against_closed_port_is_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        let channel = EventStreamChannel::new(
            &EngineConfig::default().event_stream_url(format!("http://{addr}/stream")),
        )
        .expect("channel");
        assert!(matches!(
            channel.open(&request(None)).await,
            Err(ChannelError::ConnectionRefused { .. })
        ));
    }
}
