//! Sign-up domain: identifier encoding, the signup service, social events and
//! the retryable update protocol.

pub mod identifier;
pub mod service;
pub mod social_event;
pub mod update;

use serde::{Deserialize, Serialize};

pub use identifier::encode_user_identifier;
pub use service::SignupService;
pub use update::{poll_apply_delta, poll_update_signup, SignupDelta, UPDATE_FAILED_MESSAGE};

/// Status reason reported for banned signups
pub const BANNED_REASON: &str = "Banned";

/// The derived, user-facing view of a UserSignup.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signup {
    /// Resource name (the encoded identifier)
    pub name: String,
    /// Preferred username
    pub username: String,
    /// DNS-label-safe username used for impersonation
    pub compliant_username: String,
    /// Given name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    /// Family name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    /// Company
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    /// Name of the user's home workspace
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub home_space: String,
    /// Derived status
    pub status: SignupStatus,
}

/// Derived status of a signup
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupStatus {
    /// Whether provisioning has finished
    pub ready: bool,
    /// Reason of the Complete condition (or [`BANNED_REASON`])
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    /// Whether phone/activation verification is still required
    pub verification_required: bool,
}

impl Signup {
    /// Whether the signup was rejected because the user is banned
    pub fn banned(&self) -> bool {
        self.status.reason == BANNED_REASON
    }
}
