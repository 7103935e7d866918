//! Web API 层。
//!
//! 提供 Axum 路由，将 HTTP 请求委托给应用层服务，
//! 并承载 WebSocket 连接的生命周期管理。

mod auth;
mod error;
mod routes;
mod state;
mod ws_connection;

pub use auth::{Claims, JwtService, LoginResponse};
pub use config::JwtConfig;
pub use error::ApiError;
pub use routes::router;
pub use state::AppState;
