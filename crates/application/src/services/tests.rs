//! 服务层单元测试：内存仓储 + 真实注册表/扇出引擎。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use domain::{
    Chat, ChatEvent, ChatId, ChatRepository, DomainError, Message, MessageRepository,
    PasswordHash, PresenceStatus, RepositoryError, RepositoryResult, Timestamp, TypingStatus,
    User, UserEmail, UserId, UserRepository,
};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::clock::SystemClock;
use crate::error::ApplicationError;
use crate::fanout::FanoutEngine;
use crate::password::{PasswordHasher, PasswordHasherError};
use crate::presence::PresenceRegistry;
use crate::services::chat_service::{
    ChatService, ChatServiceDependencies, CreateChatRequest, CreateGroupRequest,
    SendMessageRequest,
};
use crate::services::user_service::{
    AuthenticateUserRequest, RegisterUserRequest, UserService, UserServiceDependencies,
};

#[derive(Default)]
struct InMemoryUserRepository {
    users: Mutex<HashMap<UserId, User>>,
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn create(&self, user: User) -> RepositoryResult<User> {
        let mut users = self.users.lock().await;
        if users.values().any(|u| u.email == user.email) {
            return Err(RepositoryError::Conflict);
        }
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_id(&self, id: UserId) -> RepositoryResult<Option<User>> {
        Ok(self.users.lock().await.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &UserEmail) -> RepositoryResult<Option<User>> {
        Ok(self
            .users
            .lock()
            .await
            .values()
            .find(|u| &u.email == email)
            .cloned())
    }

    async fn list_all(&self) -> RepositoryResult<Vec<User>> {
        Ok(self.users.lock().await.values().cloned().collect())
    }

    async fn set_online(
        &self,
        id: UserId,
        online: bool,
        last_seen: Timestamp,
    ) -> RepositoryResult<()> {
        let mut users = self.users.lock().await;
        let user = users.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        user.set_online(online, last_seen);
        Ok(())
    }
}

#[derive(Default)]
struct InMemoryChatRepository {
    state: Mutex<ChatState>,
}

#[derive(Default)]
struct ChatState {
    chats: HashMap<ChatId, Chat>,
    direct_keys: HashMap<String, ChatId>,
}

impl InMemoryChatRepository {
    fn direct_key(chat: &Chat) -> String {
        Chat::direct_key(chat.participant_ids[0], chat.participant_ids[1])
    }
}

#[async_trait]
impl ChatRepository for InMemoryChatRepository {
    async fn create(&self, chat: Chat) -> RepositoryResult<Chat> {
        let mut state = self.state.lock().await;
        if !chat.is_group {
            let key = Self::direct_key(&chat);
            if state.direct_keys.contains_key(&key) {
                return Err(RepositoryError::Conflict);
            }
            state.direct_keys.insert(key, chat.id);
        }
        state.chats.insert(chat.id, chat.clone());
        Ok(chat)
    }

    async fn find_by_id(&self, id: ChatId) -> RepositoryResult<Option<Chat>> {
        Ok(self.state.lock().await.chats.get(&id).cloned())
    }

    async fn find_direct(&self, a: UserId, b: UserId) -> RepositoryResult<Option<Chat>> {
        let state = self.state.lock().await;
        Ok(state
            .direct_keys
            .get(&Chat::direct_key(a, b))
            .and_then(|id| state.chats.get(id))
            .cloned())
    }

    async fn list_for_user(&self, user_id: UserId) -> RepositoryResult<Vec<Chat>> {
        Ok(self
            .state
            .lock()
            .await
            .chats
            .values()
            .filter(|c| c.is_participant(user_id))
            .cloned()
            .collect())
    }

    async fn list_participants(&self, id: ChatId) -> RepositoryResult<Vec<UserId>> {
        self.state
            .lock()
            .await
            .chats
            .get(&id)
            .map(|c| c.participant_ids.clone())
            .ok_or(RepositoryError::NotFound)
    }

    async fn is_participant(&self, id: ChatId, user_id: UserId) -> RepositoryResult<bool> {
        Ok(self
            .state
            .lock()
            .await
            .chats
            .get(&id)
            .is_some_and(|c| c.is_participant(user_id)))
    }

    async fn list_contacts(&self, user_id: UserId) -> RepositoryResult<Vec<UserId>> {
        let state = self.state.lock().await;
        let mut contacts: Vec<UserId> = state
            .chats
            .values()
            .filter(|c| c.is_participant(user_id))
            .flat_map(|c| c.participant_ids.iter().copied())
            .filter(|&id| id != user_id)
            .collect();
        contacts.sort();
        contacts.dedup();
        Ok(contacts)
    }
}

#[derive(Default)]
struct InMemoryMessageRepository {
    messages: Mutex<Vec<Message>>,
}

#[async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn create(&self, message: Message) -> RepositoryResult<Message> {
        self.messages.lock().await.push(message.clone());
        Ok(message)
    }

    async fn list_for_chat(&self, chat_id: ChatId) -> RepositoryResult<Vec<Message>> {
        // 插入顺序即创建顺序，时间戳相同也保持稳定
        Ok(self
            .messages
            .lock()
            .await
            .iter()
            .filter(|m| m.chat_id == chat_id)
            .cloned()
            .collect())
    }

    async fn mark_read(&self, chat_id: ChatId, reader_id: UserId) -> RepositoryResult<u64> {
        let mut messages = self.messages.lock().await;
        let mut flipped = 0;
        for message in messages
            .iter_mut()
            .filter(|m| m.chat_id == chat_id && m.sender_id != reader_id && !m.is_read)
        {
            message.mark_read();
            flipped += 1;
        }
        Ok(flipped)
    }

    async fn unread_count(&self, chat_id: ChatId, reader_id: UserId) -> RepositoryResult<u64> {
        Ok(self
            .messages
            .lock()
            .await
            .iter()
            .filter(|m| m.chat_id == chat_id && m.sender_id != reader_id && !m.is_read)
            .count() as u64)
    }

    async fn last_message(&self, chat_id: ChatId) -> RepositoryResult<Option<Message>> {
        Ok(self
            .messages
            .lock()
            .await
            .iter()
            .filter(|m| m.chat_id == chat_id)
            .last()
            .cloned())
    }
}

/// 测试用明文哈希器，绕开 bcrypt 的成本。
struct PlainHasher;

#[async_trait]
impl PasswordHasher for PlainHasher {
    async fn hash(&self, plain: &str) -> Result<PasswordHash, PasswordHasherError> {
        Ok(PasswordHash::new(format!("plain:{plain}")))
    }

    async fn verify(&self, plain: &str, hash: &PasswordHash) -> Result<bool, PasswordHasherError> {
        Ok(hash.as_str() == format!("plain:{plain}"))
    }
}

struct TestEnv {
    user_service: UserService,
    chat_service: ChatService,
    registry: Arc<PresenceRegistry>,
    fanout: Arc<FanoutEngine>,
    messages: Arc<InMemoryMessageRepository>,
}

fn test_env() -> TestEnv {
    let users = Arc::new(InMemoryUserRepository::default());
    let chats = Arc::new(InMemoryChatRepository::default());
    let messages = Arc::new(InMemoryMessageRepository::default());
    let registry = Arc::new(PresenceRegistry::default());
    let fanout = Arc::new(FanoutEngine::new(chats.clone(), registry.clone()));
    let clock = Arc::new(SystemClock);

    let user_service = UserService::new(UserServiceDependencies {
        user_repository: users.clone(),
        password_hasher: Arc::new(PlainHasher),
        clock: clock.clone(),
    });
    let chat_service = ChatService::new(ChatServiceDependencies {
        chat_repository: chats,
        message_repository: messages.clone(),
        user_repository: users,
        clock,
        fanout: fanout.clone(),
    });

    TestEnv {
        user_service,
        chat_service,
        registry,
        fanout,
        messages,
    }
}

async fn register(env: &TestEnv, name: &str) -> User {
    env.user_service
        .register(RegisterUserRequest {
            username: name.to_owned(),
            email: format!("{name}@example.com"),
            password: "secret".to_owned(),
        })
        .await
        .unwrap()
}

fn parse_event(frame: &str) -> ChatEvent {
    serde_json::from_str(frame).unwrap()
}

#[tokio::test]
async fn register_then_login() {
    let env = test_env();
    let user = register(&env, "alice").await;

    let again = env
        .user_service
        .register(RegisterUserRequest {
            username: "alice2".to_owned(),
            email: "alice@example.com".to_owned(),
            password: "other".to_owned(),
        })
        .await;
    assert!(matches!(
        again,
        Err(ApplicationError::Domain(DomainError::EmailAlreadyInUse))
    ));

    let authenticated = env
        .user_service
        .authenticate(AuthenticateUserRequest {
            email: "alice@example.com".to_owned(),
            password: "secret".to_owned(),
        })
        .await
        .unwrap();
    assert_eq!(authenticated.id, user.id);
    assert!(authenticated.is_online);

    let wrong = env
        .user_service
        .authenticate(AuthenticateUserRequest {
            email: "alice@example.com".to_owned(),
            password: "nope".to_owned(),
        })
        .await;
    assert!(matches!(
        wrong,
        Err(ApplicationError::Domain(DomainError::InvalidCredentials))
    ));
}

#[tokio::test]
async fn direct_chat_is_deduplicated() {
    let env = test_env();
    let alice = register(&env, "alice").await;
    let bob = register(&env, "bob").await;

    let first = env
        .chat_service
        .create_direct_chat(CreateChatRequest {
            creator_id: alice.id.into(),
            participant_id: bob.id.into(),
        })
        .await
        .unwrap();

    // 反方向的重复请求拿到同一个会话
    let second = env
        .chat_service
        .create_direct_chat(CreateChatRequest {
            creator_id: bob.id.into(),
            participant_id: alice.id.into(),
        })
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(first.participant_ids.len(), 2);
    assert!(!first.is_group);
}

#[tokio::test]
async fn concurrent_direct_chat_creation_yields_one_chat() {
    let env = test_env();
    let alice = register(&env, "alice").await;
    let bob = register(&env, "bob").await;

    let (left, right) = tokio::join!(
        env.chat_service.create_direct_chat(CreateChatRequest {
            creator_id: alice.id.into(),
            participant_id: bob.id.into(),
        }),
        env.chat_service.create_direct_chat(CreateChatRequest {
            creator_id: bob.id.into(),
            participant_id: alice.id.into(),
        }),
    );
    assert_eq!(left.unwrap().id, right.unwrap().id);
}

#[tokio::test]
async fn message_reaches_members_but_not_outsiders() {
    let env = test_env();
    let alice = register(&env, "alice").await;
    let bob = register(&env, "bob").await;
    let carol = register(&env, "carol").await;

    let chat = env
        .chat_service
        .create_direct_chat(CreateChatRequest {
            creator_id: alice.id.into(),
            participant_id: bob.id.into(),
        })
        .await
        .unwrap();

    let mut bob_conn = env.registry.register(bob.id).await;
    let mut carol_conn = env.registry.register(carol.id).await;

    let sent = env
        .chat_service
        .send_message(SendMessageRequest {
            chat_id: chat.id.into(),
            sender_id: alice.id.into(),
            content: "hi".to_owned(),
        })
        .await
        .unwrap();

    let frame = bob_conn.receiver.try_recv().unwrap();
    match parse_event(&frame) {
        ChatEvent::Message(message) => {
            assert_eq!(message.id, sent.id);
            assert_eq!(message.chat_id, chat.id);
            assert_eq!(message.sender_id, alice.id);
            assert_eq!(message.content.as_str(), "hi");
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(bob_conn.receiver.try_recv().is_err(), "exactly one event");
    assert!(carol_conn.receiver.try_recv().is_err(), "outsider got an event");
}

#[tokio::test]
async fn sender_does_not_receive_own_message() {
    let env = test_env();
    let alice = register(&env, "alice").await;
    let bob = register(&env, "bob").await;
    let chat = env
        .chat_service
        .create_direct_chat(CreateChatRequest {
            creator_id: alice.id.into(),
            participant_id: bob.id.into(),
        })
        .await
        .unwrap();

    let mut alice_conn = env.registry.register(alice.id).await;
    env.chat_service
        .send_message(SendMessageRequest {
            chat_id: chat.id.into(),
            sender_id: alice.id.into(),
            content: "to myself?".to_owned(),
        })
        .await
        .unwrap();
    assert!(alice_conn.receiver.try_recv().is_err());
}

#[tokio::test]
async fn multi_device_user_gets_event_on_every_connection() {
    let env = test_env();
    let alice = register(&env, "alice").await;
    let bob = register(&env, "bob").await;
    let chat = env
        .chat_service
        .create_direct_chat(CreateChatRequest {
            creator_id: alice.id.into(),
            participant_id: bob.id.into(),
        })
        .await
        .unwrap();

    let mut phone = env.registry.register(alice.id).await;
    let mut laptop = env.registry.register(alice.id).await;

    env.chat_service
        .send_message(SendMessageRequest {
            chat_id: chat.id.into(),
            sender_id: bob.id.into(),
            content: "ping".to_owned(),
        })
        .await
        .unwrap();

    for conn in [&mut phone, &mut laptop] {
        let frame = conn.receiver.try_recv().unwrap();
        assert!(matches!(parse_event(&frame), ChatEvent::Message(_)));
        assert!(conn.receiver.try_recv().is_err(), "duplicate delivery");
    }
}

#[tokio::test]
async fn per_recipient_message_order_matches_insert_order() {
    let env = test_env();
    let alice = register(&env, "alice").await;
    let bob = register(&env, "bob").await;
    let chat = env
        .chat_service
        .create_direct_chat(CreateChatRequest {
            creator_id: alice.id.into(),
            participant_id: bob.id.into(),
        })
        .await
        .unwrap();

    let mut bob_conn = env.registry.register(bob.id).await;
    for text in ["one", "two", "three"] {
        env.chat_service
            .send_message(SendMessageRequest {
                chat_id: chat.id.into(),
                sender_id: alice.id.into(),
                content: text.to_owned(),
            })
            .await
            .unwrap();
    }

    for expected in ["one", "two", "three"] {
        let frame = bob_conn.receiver.try_recv().unwrap();
        match parse_event(&frame) {
            ChatEvent::Message(message) => assert_eq!(message.content.as_str(), expected),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}

#[tokio::test]
async fn non_member_send_is_rejected_without_side_effects() {
    let env = test_env();
    let alice = register(&env, "alice").await;
    let bob = register(&env, "bob").await;
    let mallory = register(&env, "mallory").await;
    let chat = env
        .chat_service
        .create_direct_chat(CreateChatRequest {
            creator_id: alice.id.into(),
            participant_id: bob.id.into(),
        })
        .await
        .unwrap();

    let mut bob_conn = env.registry.register(bob.id).await;
    let result = env
        .chat_service
        .send_message(SendMessageRequest {
            chat_id: chat.id.into(),
            sender_id: mallory.id.into(),
            content: "let me in".to_owned(),
        })
        .await;

    assert!(matches!(
        result,
        Err(ApplicationError::Domain(DomainError::NotChatMember))
    ));
    assert!(env.messages.messages.lock().await.is_empty(), "store mutated");
    assert!(bob_conn.receiver.try_recv().is_err(), "broadcast happened");
}

#[tokio::test]
async fn empty_body_is_rejected_before_insert() {
    let env = test_env();
    let alice = register(&env, "alice").await;
    let bob = register(&env, "bob").await;
    let chat = env
        .chat_service
        .create_direct_chat(CreateChatRequest {
            creator_id: alice.id.into(),
            participant_id: bob.id.into(),
        })
        .await
        .unwrap();

    let result = env
        .chat_service
        .send_message(SendMessageRequest {
            chat_id: chat.id.into(),
            sender_id: alice.id.into(),
            content: "   ".to_owned(),
        })
        .await;
    assert!(matches!(
        result,
        Err(ApplicationError::Domain(DomainError::EmptyMessageBody))
    ));
    assert!(env.messages.messages.lock().await.is_empty());
}

#[tokio::test]
async fn typing_is_broadcast_but_never_persisted() {
    let env = test_env();
    let alice = register(&env, "alice").await;
    let bob = register(&env, "bob").await;
    let chat = env
        .chat_service
        .create_direct_chat(CreateChatRequest {
            creator_id: alice.id.into(),
            participant_id: bob.id.into(),
        })
        .await
        .unwrap();

    let mut bob_conn = env.registry.register(bob.id).await;
    env.fanout
        .broadcast_typing(TypingStatus {
            chat_id: chat.id,
            user_id: alice.id,
            is_typing: true,
        })
        .await
        .unwrap();

    let frame = bob_conn.receiver.try_recv().unwrap();
    match parse_event(&frame) {
        ChatEvent::Typing(status) => {
            assert_eq!(status.user_id, alice.id);
            assert!(status.is_typing);
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(env.messages.messages.lock().await.is_empty());
}

#[tokio::test]
async fn presence_change_is_deduplicated_across_shared_chats() {
    let env = test_env();
    let alice = register(&env, "alice").await;
    let bob = register(&env, "bob").await;
    let carol = register(&env, "carol").await;

    // alice 和 bob 共享一个私聊和一个群聊
    env.chat_service
        .create_direct_chat(CreateChatRequest {
            creator_id: alice.id.into(),
            participant_id: bob.id.into(),
        })
        .await
        .unwrap();
    env.chat_service
        .create_group_chat(CreateGroupRequest {
            creator_id: alice.id.into(),
            name: "team".to_owned(),
            participant_ids: vec![bob.id.into(), carol.id.into()],
        })
        .await
        .unwrap();

    let mut bob_conn = env.registry.register(bob.id).await;
    let mut carol_conn = env.registry.register(carol.id).await;

    env.fanout
        .broadcast_presence(PresenceStatus {
            user_id: alice.id,
            is_online: false,
        })
        .await
        .unwrap();

    let frame = bob_conn.receiver.try_recv().unwrap();
    match parse_event(&frame) {
        ChatEvent::Status(status) => {
            assert_eq!(status.user_id, alice.id);
            assert!(!status.is_online);
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(bob_conn.receiver.try_recv().is_err(), "duplicate status event");

    // carol 只共享群聊，也恰好收到一条
    assert!(carol_conn.receiver.try_recv().is_ok());
    assert!(carol_conn.receiver.try_recv().is_err());
}

#[tokio::test]
async fn mark_read_flips_only_others_messages_and_is_idempotent() {
    let env = test_env();
    let alice = register(&env, "alice").await;
    let bob = register(&env, "bob").await;
    let chat = env
        .chat_service
        .create_direct_chat(CreateChatRequest {
            creator_id: alice.id.into(),
            participant_id: bob.id.into(),
        })
        .await
        .unwrap();

    for (sender, text) in [(alice.id, "from alice"), (bob.id, "from bob")] {
        env.chat_service
            .send_message(SendMessageRequest {
                chat_id: chat.id.into(),
                sender_id: sender.into(),
                content: text.to_owned(),
            })
            .await
            .unwrap();
    }

    let flipped = env
        .chat_service
        .mark_read(chat.id.into(), bob.id.into())
        .await
        .unwrap();
    assert_eq!(flipped, 1);

    let messages = env
        .chat_service
        .get_messages(chat.id.into(), bob.id.into())
        .await
        .unwrap();
    for message in &messages {
        if message.sender_id == alice.id {
            assert!(message.is_read);
        } else {
            assert!(!message.is_read, "own message must stay unread");
        }
    }

    // 再来一次是空操作
    let flipped = env
        .chat_service
        .mark_read(chat.id.into(), bob.id.into())
        .await
        .unwrap();
    assert_eq!(flipped, 0);
}

#[tokio::test]
async fn history_fetch_marks_messages_read() {
    let env = test_env();
    let alice = register(&env, "alice").await;
    let bob = register(&env, "bob").await;
    let chat = env
        .chat_service
        .create_direct_chat(CreateChatRequest {
            creator_id: alice.id.into(),
            participant_id: bob.id.into(),
        })
        .await
        .unwrap();

    env.chat_service
        .send_message(SendMessageRequest {
            chat_id: chat.id.into(),
            sender_id: alice.id.into(),
            content: "unread".to_owned(),
        })
        .await
        .unwrap();

    let history = env
        .chat_service
        .get_messages(chat.id.into(), bob.id.into())
        .await
        .unwrap();
    assert_eq!(history.len(), 1);

    let summary = env
        .chat_service
        .get_chat(chat.id.into(), bob.id.into())
        .await
        .unwrap();
    assert_eq!(summary.unread_count, 0);
    assert_eq!(
        summary.last_message.unwrap().content.as_str(),
        "unread"
    );
}

#[tokio::test]
async fn chat_listing_includes_unread_count() {
    let env = test_env();
    let alice = register(&env, "alice").await;
    let bob = register(&env, "bob").await;
    let chat = env
        .chat_service
        .create_direct_chat(CreateChatRequest {
            creator_id: alice.id.into(),
            participant_id: bob.id.into(),
        })
        .await
        .unwrap();

    for _ in 0..3 {
        env.chat_service
            .send_message(SendMessageRequest {
                chat_id: chat.id.into(),
                sender_id: alice.id.into(),
                content: "hey".to_owned(),
            })
            .await
            .unwrap();
    }

    let chats = env.chat_service.list_chats(bob.id.into()).await.unwrap();
    assert_eq!(chats.len(), 1);
    assert_eq!(chats[0].unread_count, 3);
    assert_eq!(chats[0].participants.len(), 2);

    // 发送者自己的未读数是 0
    let chats = env.chat_service.list_chats(alice.id.into()).await.unwrap();
    assert_eq!(chats[0].unread_count, 0);
}
