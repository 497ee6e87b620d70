//! Phone and activation-code verification

pub mod sender;
pub mod service;

pub use sender::{NotificationSender, TwilioSender};
pub use service::VerificationService;
