use std::sync::Arc;

use application::{ChatService, FanoutEngine, PresenceRegistry, UserService};

use crate::JwtService;

#[derive(Clone)]
pub struct AppState {
    pub user_service: Arc<UserService>,
    pub chat_service: Arc<ChatService>,
    pub fanout: Arc<FanoutEngine>,
    pub registry: Arc<PresenceRegistry>,
    pub jwt_service: Arc<JwtService>,
}

impl AppState {
    pub fn new(
        user_service: Arc<UserService>,
        chat_service: Arc<ChatService>,
        fanout: Arc<FanoutEngine>,
        registry: Arc<PresenceRegistry>,
        jwt_service: Arc<JwtService>,
    ) -> Self {
        Self {
            user_service,
            chat_service,
            fanout,
            registry,
            jwt_service,
        }
    }
}
