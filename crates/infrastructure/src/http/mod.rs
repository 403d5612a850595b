pub mod webhook_sender;

pub use webhook_sender::{HttpWebhookSender, MAX_ERROR_BODY_BYTES};
