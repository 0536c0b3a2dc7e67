//! Chat transports and the shaping helpers they share.

pub mod lark;
pub mod telegram;
pub mod text;
pub mod traits;

pub use lark::LarkChannel;
pub use telegram::TelegramChannel;
pub use traits::{ChannelAdapter, Choice, InboundMessage};
