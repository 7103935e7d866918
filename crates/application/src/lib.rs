//! 应用层：用户/会话服务、在线注册表与事件扇出。

pub mod clock;
pub mod error;
pub mod fanout;
pub mod password;
pub mod presence;
pub mod services;

pub use clock::{Clock, SystemClock};
pub use error::ApplicationError;
pub use fanout::FanoutEngine;
pub use password::{BcryptPasswordHasher, PasswordHasher, PasswordHasherError};
pub use presence::{PresenceRegistry, Registration, DEFAULT_OUTBOUND_CAPACITY};
pub use services::*;
