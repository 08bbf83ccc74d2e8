//! Telegram Bot API client and wire types.

pub mod api;
pub mod types;

pub use api::BotApi;
