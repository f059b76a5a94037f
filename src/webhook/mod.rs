pub mod client;
pub mod error;
pub mod types;

pub use client::{DEFAULT_WEBHOOK_URL, WebhookClient};
pub use error::WebhookError;
pub use types::{Flow, ResponseText, WebhookReply, WebhookRequest};
