//! Messaging platform channel (Telegram).
//!
//! The channel connector long-polls the platform for updates and delivers
//! outbound messages. Inbound messages are produced onto an mpsc channel;
//! the gateway's processor task consumes them (mailbox capture + auto-reply).

mod inbound;
mod platform;
mod telegram;

pub use inbound::InboundMessage;
pub use platform::{DeliveryError, PlatformChannel};
pub use telegram::TelegramChannel;
