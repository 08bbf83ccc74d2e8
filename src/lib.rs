//! Mirror Relay — channel mirroring over the Telegram Bot API.

pub mod admin;
pub mod config;
pub mod error;
pub mod ledger;
pub mod pipeline;
pub mod publish;
pub mod routing;
pub mod state;
pub mod store;
pub mod telegram;
pub mod transport;
