//! End-to-end stream tests against an in-process axum WebSocket server.

use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{
    Router,
    extract::{
        Query, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::HeaderMap,
    response::Response,
    routing::get,
};
use claw_core::{AccessToken, ConnectionState, IssueError, StreamTarget, TokenIssuer};
use claw_transport::{
    EndpointTemplate, Frame, LogEntry, Payload, StreamClient, StreamConfig, StreamMessage,
    TokenPlacement, WsConnector,
};
use tokio::{net::TcpListener, sync::mpsc};

struct StaticIssuer(&'static str);

#[async_trait]
impl TokenIssuer for StaticIssuer {
    async fn issue(&self, _target: &StreamTarget) -> Result<AccessToken, IssueError> {
        Ok(AccessToken::new(self.0))
    }
}

async fn logs(
    ws: WebSocketUpgrade,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    ws.on_upgrade(move |mut socket: WebSocket| async move {
        let token = query.get("ws_token").cloned().unwrap_or_default();
        let tail = query.get("tail_lines").cloned().unwrap_or_default();
        let lines = [
            format!(r#"{{"event":"log","log":"token={token} tail={tail}"}}"#),
            r#"{"event":"status","status":"running"}"#.to_owned(),
            "plain text".to_owned(),
        ];
        for line in lines {
            if socket.send(Message::Text(line.into())).await.is_err() {
                return;
            }
        }
        // Hold the socket open until the client leaves.
        while let Some(Ok(_)) = socket.recv().await {}
    })
}

async fn shell(ws: WebSocketUpgrade, headers: HeaderMap) -> Response {
    let cookie = headers
        .get("cookie")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned();
    ws.on_upgrade(move |mut socket: WebSocket| async move {
        let _ = socket.send(Message::Text(format!("cookie:{cookie}").into())).await;
        while let Some(Ok(msg)) = socket.recv().await {
            if let Message::Text(text) = msg {
                if socket.send(Message::Text(format!("echo:{}", text.as_str()).into())).await.is_err() {
                    break;
                }
            }
        }
    })
}

async fn serve() -> SocketAddr {
    let app = Router::new()
        .route("/agents/{id}/logs/ws", get(logs))
        .route("/shell", get(shell));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn next(rx: &mut mpsc::UnboundedReceiver<StreamMessage>) -> StreamMessage {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("stream closed")
}

#[tokio::test]
async fn log_stream_over_real_websocket() {
    let addr = serve().await;
    let endpoint = EndpointTemplate::new(
        format!("http://{addr}/agents/{{id}}/logs/ws"),
        TokenPlacement::Query("ws_token".into()),
    )
    .with_query("tail_lines", "200");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut client = StreamClient::new(
        StreamConfig::logs(endpoint),
        Arc::new(StaticIssuer("secret")),
        Arc::new(WsConnector::new()),
        tx,
    );
    client.activate("agent-1");

    let entries: Vec<LogEntry> = [next(&mut rx).await, next(&mut rx).await, next(&mut rx).await]
        .into_iter()
        .map(|msg| {
            assert_eq!(msg.target.id, "agent-1");
            LogEntry::from_payload(msg.payload)
        })
        .collect();
    assert_eq!(
        entries,
        vec![
            LogEntry::Line("token=secret tail=200".into()),
            LogEntry::Status("running".into()),
            LogEntry::Raw("plain text".into()),
        ]
    );
    assert_eq!(client.status().state, ConnectionState::Connected);

    client.deactivate();
    assert_eq!(client.status().state, ConnectionState::Disconnected);
}

#[tokio::test]
async fn shell_stream_sends_cookie_and_echoes_input() {
    let addr = serve().await;
    let endpoint = EndpointTemplate::new(
        format!("ws://{{hostname}}:{}/shell", addr.port()),
        TokenPlacement::Cookie,
    );

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut client = StreamClient::new(
        StreamConfig::shell(endpoint),
        Arc::new(StaticIssuer("shell-secret")),
        Arc::new(WsConnector::new()),
        tx,
    );
    client.activate(StreamTarget::new("agent-1").with_hostname("localhost"));

    let Payload::Text(greeting) = next(&mut rx).await.payload else {
        panic!("shell frames are passed through raw");
    };
    assert_eq!(greeting, "cookie:localhost-token=shell-secret");

    client.send(Frame::text("ls\n")).unwrap();
    let Payload::Text(echo) = next(&mut rx).await.payload else {
        panic!("expected raw text");
    };
    assert_eq!(echo, "echo:ls\n");
}
