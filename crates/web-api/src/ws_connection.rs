use axum::extract::ws::{Message as WsMessage, WebSocket};
use domain::{ClientFrame, PresenceStatus, TypingStatus, UserId};
use futures_util::{SinkExt, StreamExt};

use crate::state::AppState;

/// WebSocket 连接管理器
///
/// 封装单个 WebSocket 连接的生命周期：
/// - 在注册表登记，拿到本连接的出站队列
/// - 上线/下线转换时回写在线标志并广播 status 事件
/// - 转发入站 typing 帧
/// - 断开时注销并清理
pub struct WebSocketConnection {
    socket: WebSocket,
    state: AppState,
    user_id: UserId,
}

impl WebSocketConnection {
    pub fn new(socket: WebSocket, state: AppState, user_id: UserId) -> Self {
        Self {
            socket,
            state,
            user_id,
        }
    }

    /// 运行连接主循环，返回即代表连接已结束并完成清理。
    pub async fn run(self) {
        let Self {
            socket,
            state,
            user_id,
        } = self;

        let registration = state.registry.register(user_id).await;
        let connection_id = registration.connection_id;
        let mut outbound = registration.receiver;

        tracing::info!(%user_id, %connection_id, "WebSocket 连接已建立");

        // 第一条连接才算真正上线
        if registration.first_for_user {
            Self::transition_presence(&state, user_id, true).await;
        }

        let (mut sender, mut incoming) = socket.split();

        // 发送任务：把出站队列里的帧写到 socket。
        // 队列关闭（连接被注销或被驱逐）或写失败即结束。
        let mut send_task = tokio::spawn(async move {
            while let Some(frame) = outbound.recv().await {
                if sender.send(WsMessage::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            let _ = sender.send(WsMessage::Close(None)).await;
        });

        // 接收任务：解析客户端帧并分发
        let recv_state = state.clone();
        let mut recv_task = tokio::spawn(async move {
            while let Some(Ok(message)) = incoming.next().await {
                match message {
                    WsMessage::Close(_) => break,
                    WsMessage::Text(text) => {
                        Self::handle_frame(&recv_state, user_id, text.as_str()).await;
                    }
                    // Ping/Pong 由 axum 自动应答
                    _ => {}
                }
            }
        });

        tokio::select! {
            _ = &mut send_task => recv_task.abort(),
            _ = &mut recv_task => send_task.abort(),
        }

        // 注销本连接；went_offline 与移除在同一把锁下判定，
        // 并发重连不会产生假下线。连接因通道满被注册表逐出时
        // 注销会扑空，此时离线跃迁通过 claim_offline 领取，
        // 两条路径加起来每次跃迁恰好广播一次。
        let went_offline = state.registry.unregister(connection_id).await
            || state.registry.claim_offline(user_id).await;
        if went_offline {
            Self::transition_presence(&state, user_id, false).await;
        }

        tracing::info!(%user_id, %connection_id, went_offline, "WebSocket 连接已断开");
    }

    /// 上下线转换：回写数据库标志（尽力而为）并广播 status 事件。
    async fn transition_presence(state: &AppState, user_id: UserId, online: bool) {
        if let Err(err) = state.user_service.set_presence(user_id, online).await {
            tracing::warn!(%user_id, online, error = %err, "failed to persist presence flag");
        }
        let status = PresenceStatus {
            user_id,
            is_online: online,
        };
        if let Err(err) = state.fanout.broadcast_presence(status).await {
            tracing::warn!(%user_id, online, error = %err, "failed to broadcast presence change");
        }
    }

    /// 处理来自客户端的一帧。无法解析或未识别的类型直接忽略，
    /// 不断开连接。
    async fn handle_frame(state: &AppState, user_id: UserId, raw: &str) {
        let frame = match serde_json::from_str::<ClientFrame>(raw) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::debug!(%user_id, error = %err, "ignoring malformed client frame");
                return;
            }
        };

        match frame {
            ClientFrame::Typing(request) => {
                let status = TypingStatus {
                    chat_id: request.chat_id,
                    // 发送者身份取自连接，客户端无法冒充他人
                    user_id,
                    is_typing: request.is_typing,
                };
                if let Err(err) = state.fanout.broadcast_typing(status).await {
                    tracing::debug!(%user_id, error = %err, "failed to broadcast typing status");
                }
            }
            ClientFrame::Unknown => {
                tracing::debug!(%user_id, "ignoring unknown client frame type");
            }
        }
    }
}
