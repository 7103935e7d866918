pub mod chat_service;
pub mod user_service;

#[cfg(test)]
mod tests;

pub use chat_service::*;
pub use user_service::*;
