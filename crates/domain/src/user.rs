use crate::value_objects::{PasswordHash, Timestamp, UserEmail, UserId, Username};

/// 用户实体。
///
/// `is_online` 是派生状态：真正的权威在线信息由在线注册表持有，
/// 这里的标志只在注册表状态变化时回写（尽力而为）。
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub username: Username,
    pub email: UserEmail,
    #[serde(skip_serializing)] // 密码哈希不暴露给客户端
    pub password: PasswordHash,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub is_online: bool,
    pub last_seen: Timestamp,
    pub created_at: Timestamp,
}

impl User {
    pub fn register(
        id: UserId,
        username: Username,
        email: UserEmail,
        password: PasswordHash,
        now: Timestamp,
    ) -> Self {
        Self {
            id,
            username,
            email,
            password,
            avatar: None,
            is_online: true,
            last_seen: now,
            created_at: now,
        }
    }

    pub fn set_online(&mut self, online: bool, now: Timestamp) {
        self.is_online = online;
        self.last_seen = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn password_is_never_serialized() {
        let user = User::register(
            UserId::from(Uuid::new_v4()),
            Username::parse("alice").unwrap(),
            UserEmail::parse("alice@example.com").unwrap(),
            PasswordHash::new("$2b$12$secret"),
            chrono::Utc::now(),
        );
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password").is_none());
        assert_eq!(json["isOnline"], true);
        assert!(json.get("lastSeen").is_some());
    }
}
