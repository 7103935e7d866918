use crate::errors::DomainError;
use crate::value_objects::{ChatId, Timestamp, UserId};

/// 会话实体：一对一私聊或群聊，外加成员集合。
///
/// 不变量：成员 ≥ 2；私聊恰好 2 人，并且任意无序用户对最多存在
/// 一个私聊（由 `direct_key` 的唯一约束保证）。
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: ChatId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>, // 仅群聊有名字
    pub is_group: bool,
    pub participant_ids: Vec<UserId>,
    pub created_at: Timestamp,
}

impl Chat {
    /// 两个用户之间的私聊。
    pub fn new_direct(
        id: ChatId,
        a: UserId,
        b: UserId,
        created_at: Timestamp,
    ) -> Result<Self, DomainError> {
        if a == b {
            return Err(DomainError::invalid_argument(
                "participants",
                "direct chat requires two distinct users",
            ));
        }
        Ok(Self {
            id,
            name: None,
            is_group: false,
            participant_ids: Self::normalize(vec![a, b]),
            created_at,
        })
    }

    /// 带名字的群聊，成员含创建者。
    pub fn new_group(
        id: ChatId,
        name: impl Into<String>,
        participants: Vec<UserId>,
        created_at: Timestamp,
    ) -> Result<Self, DomainError> {
        let name = name.into().trim().to_owned();
        if name.is_empty() {
            return Err(DomainError::invalid_argument("name", "group name is required"));
        }
        let participants = Self::normalize(participants);
        if participants.len() < 2 {
            return Err(DomainError::invalid_argument(
                "participants",
                "a chat needs at least two members",
            ));
        }
        Ok(Self {
            id,
            name: Some(name),
            is_group: true,
            participant_ids: participants,
            created_at,
        })
    }

    /// 无序用户对的规范键，私聊去重用。
    pub fn direct_key(a: UserId, b: UserId) -> String {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        format!("{lo}:{hi}")
    }

    pub fn is_participant(&self, user_id: UserId) -> bool {
        self.participant_ids.contains(&user_id)
    }

    /// 排序去重，成员语义是集合而不是列表。
    fn normalize(mut participants: Vec<UserId>) -> Vec<UserId> {
        participants.sort();
        participants.dedup();
        participants
    }
}
