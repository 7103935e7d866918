//! 主应用程序入口
//!
//! 组装仓储、应用服务与在线注册表，启动 Axum Web 服务。

use std::sync::Arc;

use application::{
    services::{ChatService, ChatServiceDependencies, UserService, UserServiceDependencies},
    BcryptPasswordHasher, FanoutEngine, PresenceRegistry, SystemClock,
};
use config::AppConfig;
use infrastructure::{create_pg_pool, PgChatRepository, PgMessageRepository, PgUserRepository};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, JwtService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = AppConfig::from_env_with_defaults();

    tracing::info!(
        "连接数据库: {}",
        config.database.url.split('@').next_back().unwrap_or("unknown")
    );

    let pg_pool = create_pg_pool(&config.database.url, config.database.max_connections).await?;

    // 运行迁移
    sqlx::migrate!("../../migrations").run(&pg_pool).await?;

    // 仓储实例
    let user_repository = Arc::new(PgUserRepository::new(pg_pool.clone()));
    let chat_repository = Arc::new(PgChatRepository::new(pg_pool.clone()));
    let message_repository = Arc::new(PgMessageRepository::new(pg_pool));

    let password_hasher: Arc<dyn application::PasswordHasher> = match config.server.bcrypt_cost {
        Some(cost) => Arc::new(BcryptPasswordHasher::new(cost)),
        None => Arc::new(BcryptPasswordHasher::default()),
    };
    let clock: Arc<dyn application::Clock> = Arc::new(SystemClock);

    // 在线注册表 + 扇出引擎
    let registry = Arc::new(PresenceRegistry::new(config.websocket.outbound_capacity));
    let fanout = Arc::new(FanoutEngine::new(chat_repository.clone(), registry.clone()));

    // 应用层服务
    let user_service = UserService::new(UserServiceDependencies {
        user_repository: user_repository.clone(),
        password_hasher,
        clock: clock.clone(),
    });

    let chat_service = ChatService::new(ChatServiceDependencies {
        chat_repository,
        message_repository,
        user_repository,
        clock,
        fanout: fanout.clone(),
    });

    let jwt_service = Arc::new(JwtService::new(config.jwt.clone()));

    let state = AppState::new(
        Arc::new(user_service),
        Arc::new(chat_service),
        fanout,
        registry,
        jwt_service,
    );

    let app = router(state);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("聊天服务器启动在 http://{}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
