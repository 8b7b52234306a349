//! Transport adapters: Telegram inbound/replies and SMTP outbound.

pub mod email;
pub mod telegram;
pub mod telegram_types;

use std::pin::Pin;

use futures::Stream;

pub use email::{EmailConfig, SmtpSink};
pub use telegram::{Inbound, TelegramChannel};

/// Stream of classified inbound updates.
pub type InboundStream = Pin<Box<dyn Stream<Item = Inbound> + Send>>;
