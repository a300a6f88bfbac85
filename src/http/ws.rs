//! WebSocket 接入
//!
//! 每条连接拆成读写两半：写任务消费 ConnectionManager 分配的通道，
//! 读循环把解析后的客户端事件转发给分发循环。
//! 已知事件的负载不合法时回一个 `error` 事件，其它无效帧只记录日志。

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tracing::{debug, warn};

use crate::http::HttpServerState;
use crate::infra::{Transport, TransportEvent};
use crate::model::ClientEvent;

/// GET <ws_path>：升级为 WebSocket
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<HttpServerState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: HttpServerState) {
    let (mut sink, mut stream) = socket.split();
    let (connection, mut outbound) = state.connections.register_connection();

    if state
        .events
        .send(TransportEvent::Connected(connection))
        .await
        .is_err()
    {
        warn!("⚠️ WebSocket: 分发循环已停止，拒绝连接 {}", connection);
        state.connections.unregister_connection(connection);
        return;
    }

    // 写任务：通道关闭或发出 Close 帧后退出
    let writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let closing = matches!(message, Message::Close(_));
            if let Err(e) = sink.send(message).await {
                debug!("📭 WebSocket: 写入 {} 失败: {}", connection, e);
                break;
            }
            if closing {
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        let message = match frame {
            Ok(message) => message,
            Err(e) => {
                debug!("📭 WebSocket: 读取 {} 失败: {}", connection, e);
                break;
            }
        };

        match message {
            Message::Text(text) => match ClientEvent::from_frame(text.as_str()) {
                Ok(event) => {
                    let inbound = TransportEvent::Inbound { connection, event };
                    if state.events.send(inbound).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("⚠️ WebSocket: 忽略来自 {} 的无效帧: {}", connection, e);
                    if let Some(rejection) = ClientEvent::rejection(text.as_str()) {
                        state.connections.send(connection, &rejection);
                    }
                }
            },
            Message::Ping(payload) => {
                state.connections.send_raw(connection, Message::Pong(payload));
            }
            Message::Pong(_) => {}
            Message::Binary(_) => {
                warn!("⚠️ WebSocket: 忽略来自 {} 的二进制帧", connection);
            }
            Message::Close(_) => break,
        }
    }

    state.connections.unregister_connection(connection);
    let _ = state
        .events
        .send(TransportEvent::Disconnected(connection))
        .await;

    let _ = writer.await;
    debug!("🔚 WebSocket: 连接 {} 已结束", connection);
}
