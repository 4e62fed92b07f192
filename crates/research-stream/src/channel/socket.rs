use std::time::Duration;

use futures::stream::SplitStream;
use futures::{SinkExt as _, StreamExt as _, stream};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

use crate::config::EngineConfig;
use crate::errors::{ChannelError, ResearchError};
use crate::model::BackendKind;
use crate::supervisor;

use super::options::SocketOptions;
use super::{Channel, ChannelHandle, ChannelRequest, RawMessage, read_options};

const BACKEND: BackendKind = BackendKind::Socket;
const DEFAULT_SCOPE: &str = "comprehensive";
const DEFAULT_DEPTH: &str = "detailed";
const DEFAULT_URGENCY: &str = "normal";
/// Close code reported when the peer vanished without a close frame.
const ABNORMAL_CLOSE: u16 = 1006;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Channel for the persistent WebSocket backend.
///
/// Sends one request frame after the handshake, then only reads. A writer task
/// keeps the connection alive with ping frames until the handle is closed.
pub struct SocketChannel {
    url: String,
    connect_timeout: Duration,
    heartbeat_interval: Duration,
}

impl SocketChannel {
    /// Creates a channel from engine configuration.
    pub fn new(config: &EngineConfig) -> Result<Self, ResearchError> {
        if config.socket_url.trim().is_empty() {
            return Err(ResearchError::Config("socket_url must not be empty".into()));
        }
        if config.heartbeat_interval.is_zero() {
            return Err(ResearchError::Config(
                "heartbeat_interval must be greater than 0".into(),
            ));
        }
        Ok(Self {
            url: config.socket_url.clone(),
            connect_timeout: config.connect_timeout,
            heartbeat_interval: config.heartbeat_interval,
        })
    }
}

#[async_trait::async_trait]
impl Channel for SocketChannel {
    fn kind(&self) -> BackendKind {
        BACKEND
    }

    async fn open(&self, request: &ChannelRequest) -> Result<ChannelHandle, ChannelError> {
        let options: SocketOptions = read_options(BACKEND, request)?;
        let frame = build_request_frame(request, &options);
        debug!(session_id = %request.session_id, url = %self.url, "opening research socket");

        let (ws, _response) =
            tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(self.url.as_str()))
                .await
                .map_err(|_| ChannelError::refused(BACKEND, "connect timed out", None))?
                .map_err(map_connect_error)?;
        let (mut sink, read) = ws.split();
        sink.send(Message::Text(frame.to_string()))
            .await
            .map_err(|e| ChannelError::transport(BACKEND, format!("failed to send request frame: {e}")))?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(heartbeat_writer(
            sink,
            self.heartbeat_interval,
            shutdown_rx,
            request.session_id.clone(),
        ));

        Ok(
            ChannelHandle::new(BACKEND, Box::pin(raw_message_stream(read))).with_closer(move || {
                let _ = shutdown_tx.send(());
            }),
        )
    }
}

pub(crate) fn build_request_frame(
    request: &ChannelRequest,
    options: &SocketOptions,
) -> serde_json::Value {
    serde_json::json!({
        "query": request.query,
        "research_type": options.resolved_research_type(),
        "scope": options.scope.as_deref().unwrap_or(DEFAULT_SCOPE),
        "depth": options.depth.as_deref().unwrap_or(DEFAULT_DEPTH),
        "urgency": options.urgency.as_deref().unwrap_or(DEFAULT_URGENCY),
        "stream": true,
        "client_message_id": request.session_id,
    })
}

async fn heartbeat_writer<S>(
    mut sink: S,
    period: Duration,
    mut shutdown: oneshot::Receiver<()>,
    session_id: String,
) where
    S: futures::Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let mut ticker = supervisor::heartbeat_interval(period);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                let close = Message::Close(Some(CloseFrame {
                    code: CloseCode::Normal,
                    reason: "session closed".into(),
                }));
                if let Err(e) = sink.send(close).await {
                    trace!(session_id = %session_id, error = %e, "close frame not delivered");
                }
                break;
            }
            _ = ticker.tick() => {
                let ping = Message::Text(supervisor::heartbeat_frame().to_string());
                if let Err(e) = sink.send(ping).await {
                    debug!(session_id = %session_id, error = %e, "heartbeat failed, stopping writer");
                    break;
                }
                trace!(session_id = %session_id, "heartbeat sent");
            }
        }
    }
}

fn raw_message_stream(
    read: SplitStream<WsStream>,
) -> impl futures::Stream<Item = Result<RawMessage, ChannelError>> + Send {
    stream::unfold(Some(read), |state| async move {
        let mut read = state?;
        loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => return Some((Ok(RawMessage::frame(text)), Some(read))),
                Some(Ok(Message::Binary(bytes))) => {
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    return Some((Ok(RawMessage::frame(text)), Some(read)));
                }
                Some(Ok(Message::Close(frame))) => {
                    return close_outcome(frame).map(|err| (Err(err), None));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Some((Err(map_read_error(e)), None)),
                None => {
                    let err = ChannelError::closed(
                        BACKEND,
                        Some(ABNORMAL_CLOSE),
                        "connection dropped without close frame",
                    );
                    return Some((Err(err), None));
                }
            }
        }
    })
}

/// A normal close (code 1000, or no status at all) ends the stream cleanly;
/// anything else surfaces as an abnormal close.
fn close_outcome(frame: Option<CloseFrame<'static>>) -> Option<ChannelError> {
    match frame {
        None => None,
        Some(frame) if frame.code == CloseCode::Normal => None,
        Some(frame) => Some(ChannelError::closed(
            BACKEND,
            Some(u16::from(frame.code)),
            frame.reason.into_owned(),
        )),
    }
}

fn map_connect_error(err: tungstenite::Error) -> ChannelError {
    match err {
        tungstenite::Error::Io(e) => ChannelError::refused(BACKEND, e.to_string(), None),
        tungstenite::Error::Http(response) => ChannelError::refused(
            BACKEND,
            format!("handshake rejected with status {}", response.status()),
            Some(response.status().as_u16()),
        ),
        tungstenite::Error::Url(e) => {
            ChannelError::refused(BACKEND, format!("invalid socket url: {e}"), None)
        }
        other => ChannelError::protocol(BACKEND, format!("handshake failed: {other}")),
    }
}

fn map_read_error(err: tungstenite::Error) -> ChannelError {
    match err {
        tungstenite::Error::ConnectionClosed
        | tungstenite::Error::AlreadyClosed
        | tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
            ChannelError::closed(BACKEND, Some(ABNORMAL_CLOSE), err.to_string())
        }
        tungstenite::Error::Protocol(e) => ChannelError::protocol(BACKEND, e.to_string()),
        other => ChannelError::transport(BACKEND, other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use tokio::net::TcpListener;

    type ServerStream = WebSocketStream<TcpStream>;

    async fn spawn_server<F, Fut>(handler: F) -> String
    where
        F: FnOnce(ServerStream) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.expect("accept");
            let ws = tokio_tungstenite::accept_async(tcp).await.expect("handshake");
            handler(ws).await;
        });
        format!("ws://{addr}/ws/research")
    }

    fn channel(url: String, heartbeat: Duration) -> SocketChannel {
        SocketChannel::new(
            &EngineConfig::default()
                .socket_url(url)
                .heartbeat_interval(heartbeat),
        )
        .expect("channel")
    }

    fn request() -> ChannelRequest {
        ChannelRequest {
            session_id: "msg-42".into(),
            query: "Validate a meal-kit subscription for students".into(),
            options: Some(serde_json::json!({"research_type": "tarot", "depth": "deep"})),
            feedback: None,
        }
    }

    async fn next_text(ws: &mut ServerStream) -> serde_json::Value {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str(&text).expect("json frame");
                }
                Some(Ok(_)) => continue,
                other => panic!("expected text frame, got {other:?}"),
            }
        }
    }

    #[test]
    fn request_frame_coerces_unknown_research_type() {
        let options: SocketOptions =
            read_options(BACKEND, &request()).expect("socket options");
        let frame = build_request_frame(&request(), &options);
        assert_eq!(frame["research_type"], "comprehensive");
        assert_eq!(frame["depth"], "deep");
        assert_eq!(frame["scope"], DEFAULT_SCOPE);
        assert_eq!(frame["stream"], true);
        assert_eq!(frame["client_message_id"], "msg-42");
    }

    #[tokio::test]
    async fn sends_request_then_yields_frames_until_normal_close() {
        let (seen_tx, seen_rx) = oneshot::channel();
        let url = spawn_server(|mut ws| async move {
            let request = next_text(&mut ws).await;
            let _ = seen_tx.send(request);
            ws.send(Message::Text(r#"{"type":"content_chunk","content":"Hi"}"#.into()))
                .await
                .expect("send");
            ws.send(Message::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "done".into(),
            })))
            .await
            .expect("close");
        })
        .await;

        let mut handle = channel(url, Duration::from_secs(30))
            .open(&request())
            .await
            .expect("open");
        let frame = handle.next_message().await.expect("frame").expect("ok");
        assert!(frame.data.contains("content_chunk"));
        assert!(handle.next_message().await.is_none());

        let request = seen_rx.await.expect("request frame");
        assert_eq!(request["query"], "Validate a meal-kit subscription for students");
    }

    #[tokio::test]
    async fn abnormal_close_code_is_reported() {
        let url = spawn_server(|mut ws| async move {
            let _ = next_text(&mut ws).await;
            ws.send(Message::Close(Some(CloseFrame {
                code: CloseCode::Error,
                reason: "internal error".into(),
            })))
            .await
            .expect("close");
        })
        .await;

        let mut handle = channel(url, Duration::from_secs(30))
            .open(&request())
            .await
            .expect("open");
        let err = handle.next_message().await.expect("item").expect_err("abnormal");
        assert!(matches!(
            err,
            ChannelError::ClosedAbnormally { code: Some(1011), ref reason, .. } if reason == "internal error"
        ));
    }

    #[tokio::test]
    async fn heartbeat_pings_arrive_on_interval() {
        let (ping_tx, ping_rx) = oneshot::channel();
        let url = spawn_server(|mut ws| async move {
            let _ = next_text(&mut ws).await;
            let ping = next_text(&mut ws).await;
            let _ = ping_tx.send(ping);
        })
        .await;

        let _handle = channel(url, Duration::from_millis(50))
            .open(&request())
            .await
            .expect("open");
        let ping = tokio::time::timeout(Duration::from_secs(5), ping_rx)
            .await
            .expect("ping in time")
            .expect("ping frame");
        assert_eq!(ping["type"], "ping");
    }

    #[tokio::test]
    async fn closing_handle_sends_close_frame() {
        let (closed_tx, closed_rx) = oneshot::channel();
        let url = spawn_server(|mut ws| async move {
            let _ = next_text(&mut ws).await;
            while let Some(Ok(message)) = ws.next().await {
                if let Message::Close(frame) = message {
                    let _ = closed_tx.send(frame.map(|f| u16::from(f.code)));
                    break;
                }
            }
        })
        .await;

        let mut handle = channel(url, Duration::from_secs(30))
            .open(&request())
            .await
            .expect("open");
        assert!(handle.close());
        assert!(!handle.close());
        let code = tokio::time::timeout(Duration::from_secs(5), closed_rx)
            .await
            .expect("close in time")
            .expect("close frame");
        assert_eq!(code, Some(1000));
    }

    #[tokio::test]
    async fn refused_connection_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        let result = channel(format!("ws://{addr}/ws"), Duration::from_secs(30))
            .open(&request())
            .await;
        assert!(matches!(result, Err(ChannelError::ConnectionRefused { .. })));
    }
}
