use std::sync::Arc;

use domain::{
    Chat, ChatId, ChatRepository, DomainError, Message, MessageBody, MessageId, MessageRepository,
    RepositoryError, User, UserId, UserRepository,
};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::fanout::FanoutEngine;

#[derive(Debug, Clone)]
pub struct CreateChatRequest {
    pub creator_id: Uuid,
    pub participant_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct CreateGroupRequest {
    pub creator_id: Uuid,
    pub name: String,
    pub participant_ids: Vec<Uuid>,
}

#[derive(Debug, Clone)]
pub struct SendMessageRequest {
    pub chat_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
}

/// 会话列表条目：会话本体 + 成员档案 + 给调用者的未读数 + 最新一条消息。
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    #[serde(flatten)]
    pub chat: Chat,
    pub participants: Vec<User>,
    pub unread_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<Message>,
}

pub struct ChatServiceDependencies {
    pub chat_repository: Arc<dyn ChatRepository>,
    pub message_repository: Arc<dyn MessageRepository>,
    pub user_repository: Arc<dyn UserRepository>,
    pub clock: Arc<dyn Clock>,
    pub fanout: Arc<FanoutEngine>,
}

pub struct ChatService {
    deps: ChatServiceDependencies,
}

impl ChatService {
    pub fn new(deps: ChatServiceDependencies) -> Self {
        Self { deps }
    }

    /// 创建（或复用）两个用户之间的私聊。
    ///
    /// 同一无序用户对的重复请求返回已有会话；并发竞争由
    /// direct_key 唯一约束兜底，撞上 Conflict 就重查。
    pub async fn create_direct_chat(
        &self,
        request: CreateChatRequest,
    ) -> Result<Chat, ApplicationError> {
        let creator_id = UserId::from(request.creator_id);
        let participant_id = UserId::from(request.participant_id);

        self.ensure_user_exists(participant_id).await?;

        if let Some(existing) = self
            .deps
            .chat_repository
            .find_direct(creator_id, participant_id)
            .await?
        {
            return Ok(existing);
        }

        let chat = Chat::new_direct(
            ChatId::new(Uuid::new_v4()),
            creator_id,
            participant_id,
            self.deps.clock.now(),
        )?;

        match self.deps.chat_repository.create(chat).await {
            Ok(created) => Ok(created),
            Err(RepositoryError::Conflict) => self
                .deps
                .chat_repository
                .find_direct(creator_id, participant_id)
                .await?
                .ok_or_else(|| {
                    ApplicationError::from(RepositoryError::storage(
                        "direct chat conflict without existing row",
                    ))
                }),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn create_group_chat(
        &self,
        request: CreateGroupRequest,
    ) -> Result<Chat, ApplicationError> {
        let creator_id = UserId::from(request.creator_id);
        if request.participant_ids.is_empty() {
            return Err(
                DomainError::invalid_argument("participants", "no participants specified").into(),
            );
        }

        let mut participants = Vec::with_capacity(request.participant_ids.len() + 1);
        for raw in request.participant_ids {
            let participant_id = UserId::from(raw);
            self.ensure_user_exists(participant_id).await?;
            participants.push(participant_id);
        }
        participants.push(creator_id);

        let chat = Chat::new_group(
            ChatId::new(Uuid::new_v4()),
            request.name,
            participants,
            self.deps.clock.now(),
        )?;
        Ok(self.deps.chat_repository.create(chat).await?)
    }

    pub async fn get_chat(
        &self,
        chat_id: Uuid,
        caller_id: Uuid,
    ) -> Result<ChatSummary, ApplicationError> {
        let chat_id = ChatId::new(chat_id);
        let caller_id = UserId::from(caller_id);
        let chat = self
            .deps
            .chat_repository
            .find_by_id(chat_id)
            .await?
            .ok_or(DomainError::ChatNotFound)?;
        if !chat.is_participant(caller_id) {
            return Err(DomainError::NotChatMember.into());
        }
        self.summarize(chat, caller_id).await
    }

    pub async fn list_chats(&self, caller_id: Uuid) -> Result<Vec<ChatSummary>, ApplicationError> {
        let caller_id = UserId::from(caller_id);
        let chats = self.deps.chat_repository.list_for_user(caller_id).await?;
        let mut summaries = Vec::with_capacity(chats.len());
        for chat in chats {
            summaries.push(self.summarize(chat, caller_id).await?);
        }
        Ok(summaries)
    }

    /// 发送消息：成员校验 → 持久化 → 扇出。
    ///
    /// 插入失败会中止整个发送并上抛；扇出阶段的失败不回头
    /// 影响发送者（消息已落库，离线成员靠历史拉取补课）。
    pub async fn send_message(
        &self,
        request: SendMessageRequest,
    ) -> Result<Message, ApplicationError> {
        let chat_id = ChatId::new(request.chat_id);
        let sender_id = UserId::from(request.sender_id);

        self.deps
            .chat_repository
            .find_by_id(chat_id)
            .await?
            .ok_or(DomainError::ChatNotFound)?;
        if !self
            .deps
            .chat_repository
            .is_participant(chat_id, sender_id)
            .await?
        {
            return Err(DomainError::NotChatMember.into());
        }

        let content = MessageBody::parse(request.content)?;
        let message = Message::new(
            MessageId::new(Uuid::new_v4()),
            chat_id,
            sender_id,
            content,
            self.deps.clock.now(),
        );

        let stored = self.deps.message_repository.create(message).await?;

        if let Err(err) = self.deps.fanout.broadcast_message(&stored).await {
            tracing::warn!(
                chat_id = %stored.chat_id,
                message_id = %stored.id,
                error = %err,
                "message persisted but fan-out failed"
            );
        }

        Ok(stored)
    }

    /// 历史查询，同时把别人发给 reader 的未读消息置为已读。
    /// 已读回写失败不挡住历史返回。
    pub async fn get_messages(
        &self,
        chat_id: Uuid,
        reader_id: Uuid,
    ) -> Result<Vec<Message>, ApplicationError> {
        let chat_id = ChatId::new(chat_id);
        let reader_id = UserId::from(reader_id);
        self.ensure_member(chat_id, reader_id).await?;

        let messages = self.deps.message_repository.list_for_chat(chat_id).await?;
        if let Err(err) = self.deps.message_repository.mark_read(chat_id, reader_id).await {
            tracing::warn!(%chat_id, %reader_id, error = %err, "failed to mark messages read");
        }
        Ok(messages)
    }

    /// 单独的已读回执入口，幂等。
    pub async fn mark_read(&self, chat_id: Uuid, reader_id: Uuid) -> Result<u64, ApplicationError> {
        let chat_id = ChatId::new(chat_id);
        let reader_id = UserId::from(reader_id);
        self.ensure_member(chat_id, reader_id).await?;
        Ok(self.deps.message_repository.mark_read(chat_id, reader_id).await?)
    }

    async fn summarize(
        &self,
        chat: Chat,
        caller_id: UserId,
    ) -> Result<ChatSummary, ApplicationError> {
        let mut participants = Vec::with_capacity(chat.participant_ids.len());
        for &participant_id in &chat.participant_ids {
            if let Some(user) = self.deps.user_repository.find_by_id(participant_id).await? {
                participants.push(user);
            }
        }
        let unread_count = self
            .deps
            .message_repository
            .unread_count(chat.id, caller_id)
            .await?;
        let last_message = self.deps.message_repository.last_message(chat.id).await?;
        Ok(ChatSummary {
            chat,
            participants,
            unread_count,
            last_message,
        })
    }

    async fn ensure_member(&self, chat_id: ChatId, user_id: UserId) -> Result<(), ApplicationError> {
        self.deps
            .chat_repository
            .find_by_id(chat_id)
            .await?
            .ok_or(DomainError::ChatNotFound)?;
        if !self
            .deps
            .chat_repository
            .is_participant(chat_id, user_id)
            .await?
        {
            return Err(DomainError::NotChatMember.into());
        }
        Ok(())
    }

    async fn ensure_user_exists(&self, user_id: UserId) -> Result<(), ApplicationError> {
        self.deps
            .user_repository
            .find_by_id(user_id)
            .await?
            .ok_or(DomainError::UserNotFound)?;
        Ok(())
    }
}
