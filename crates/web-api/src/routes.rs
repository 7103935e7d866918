use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

use application::services::{
    AuthenticateUserRequest, ChatSummary, CreateChatRequest, CreateGroupRequest,
    RegisterUserRequest, SendMessageRequest,
};
use domain::{Message, User, UserId};

use crate::{
    auth::LoginResponse, error::ApiError, state::AppState, ws_connection::WebSocketConnection,
};

#[derive(Debug, Deserialize)]
struct RegisterPayload {
    username: String,
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct LoginPayload {
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateChatPayload {
    participant_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateGroupPayload {
    name: String,
    participant_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
struct SendMessagePayload {
    content: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(websocket_upgrade))
        .nest("/api", api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register_user))
        .route("/auth/login", post(login_user))
        .route("/me", get(current_user))
        .route("/users", get(list_users))
        .route("/users/{user_id}", get(get_user))
        .route("/chats", get(list_chats).post(create_chat))
        .route("/chats/group", post(create_group_chat))
        .route("/chats/{chat_id}", get(get_chat))
        .route(
            "/chats/{chat_id}/messages",
            get(get_messages).post(send_message),
        )
        .route("/chats/{chat_id}/read", post(mark_read))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn register_user(
    State(state): State<AppState>,
    Json(payload): Json<RegisterPayload>,
) -> Result<(StatusCode, Json<LoginResponse>), ApiError> {
    let user = state
        .user_service
        .register(RegisterUserRequest {
            username: payload.username,
            email: payload.email,
            password: payload.password,
        })
        .await?;

    let token = state.jwt_service.generate_token(user.id.into())?;
    Ok((StatusCode::CREATED, Json(LoginResponse { user, token })))
}

async fn login_user(
    State(state): State<AppState>,
    Json(payload): Json<LoginPayload>,
) -> Result<Json<LoginResponse>, ApiError> {
    let user = state
        .user_service
        .authenticate(AuthenticateUserRequest {
            email: payload.email,
            password: payload.password,
        })
        .await?;

    let token = state.jwt_service.generate_token(user.id.into())?;
    Ok(Json(LoginResponse { user, token }))
}

async fn current_user(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<User>, ApiError> {
    let caller_id = state.jwt_service.extract_user_from_headers(&headers)?;
    let user = state.user_service.get_user(UserId::from(caller_id)).await?;
    Ok(Json(user))
}

async fn list_users(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<User>>, ApiError> {
    state.jwt_service.extract_user_from_headers(&headers)?;
    let users = state.user_service.list_users().await?;
    Ok(Json(users))
}

async fn get_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<Uuid>,
) -> Result<Json<User>, ApiError> {
    state.jwt_service.extract_user_from_headers(&headers)?;
    let user = state.user_service.get_user(UserId::from(user_id)).await?;
    Ok(Json(user))
}

async fn list_chats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ChatSummary>>, ApiError> {
    let caller_id = state.jwt_service.extract_user_from_headers(&headers)?;
    let summaries = state.chat_service.list_chats(caller_id).await?;
    Ok(Json(summaries))
}

/// 创建（或复用）私聊。participantIds 里只需要对方一个人，
/// 调用者自己由 token 决定。
async fn create_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateChatPayload>,
) -> Result<(StatusCode, Json<ChatSummary>), ApiError> {
    let caller_id = state.jwt_service.extract_user_from_headers(&headers)?;
    if payload.participant_ids.len() != 1 {
        return Err(ApiError::bad_request(
            "direct chat requires exactly one participant",
        ));
    }
    let participant_id = payload.participant_ids[0];

    let chat = state
        .chat_service
        .create_direct_chat(CreateChatRequest {
            creator_id: caller_id,
            participant_id,
        })
        .await?;

    let summary = state.chat_service.get_chat(chat.id.into(), caller_id).await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

async fn create_group_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateGroupPayload>,
) -> Result<(StatusCode, Json<ChatSummary>), ApiError> {
    let caller_id = state.jwt_service.extract_user_from_headers(&headers)?;
    let chat = state
        .chat_service
        .create_group_chat(CreateGroupRequest {
            creator_id: caller_id,
            name: payload.name,
            participant_ids: payload.participant_ids,
        })
        .await?;

    let summary = state.chat_service.get_chat(chat.id.into(), caller_id).await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

async fn get_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(chat_id): Path<Uuid>,
) -> Result<Json<ChatSummary>, ApiError> {
    let caller_id = state.jwt_service.extract_user_from_headers(&headers)?;
    let summary = state.chat_service.get_chat(chat_id, caller_id).await?;
    Ok(Json(summary))
}

/// 拉取历史消息，同时把别人发来的未读消息标记为已读。
async fn get_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(chat_id): Path<Uuid>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let caller_id = state.jwt_service.extract_user_from_headers(&headers)?;
    let messages = state.chat_service.get_messages(chat_id, caller_id).await?;
    Ok(Json(messages))
}

async fn send_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(chat_id): Path<Uuid>,
    Json(payload): Json<SendMessagePayload>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let caller_id = state.jwt_service.extract_user_from_headers(&headers)?;
    let message = state
        .chat_service
        .send_message(SendMessageRequest {
            chat_id,
            sender_id: caller_id,
            content: payload.content,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(message)))
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct MarkReadResponse {
    marked_read: u64,
}

async fn mark_read(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(chat_id): Path<Uuid>,
) -> Result<Json<MarkReadResponse>, ApiError> {
    let caller_id = state.jwt_service.extract_user_from_headers(&headers)?;
    let marked_read = state.chat_service.mark_read(chat_id, caller_id).await?;
    Ok(Json(MarkReadResponse { marked_read }))
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: String,
}

/// WebSocket 升级入口。浏览器无法在升级请求上带自定义 header，
/// 凭证走 `?token=` 查询参数。
async fn websocket_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let caller_id = state
        .jwt_service
        .extract_user_from_query_token(&query.token)?;
    // token 有效还不够，用户必须真实存在
    let user = state.user_service.get_user(UserId::from(caller_id)).await?;

    Ok(ws.on_upgrade(move |socket| async move {
        WebSocketConnection::new(socket, state, user.id).run().await;
    }))
}
