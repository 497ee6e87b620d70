//! Custom resources stored on the host cluster
//!
//! All resources live in the host-operator namespace and are queried with
//! label-selector equality; the label and annotation keys below are the
//! indexed surface shared by this service and the host operators.

mod banned_user;
mod proxy_plugin;
mod social_event;
mod space;
mod user_signup;

pub use banned_user::{BannedUser, BannedUserSpec};
pub use proxy_plugin::{ProxyPlugin, ProxyPluginSpec, Route, RouteIngress, RouteSpec, RouteStatus, RouteTarget, RouteTls};
pub use social_event::{SocialEvent, SocialEventSpec, SocialEventStatus};
pub use space::{Space, SpaceBinding, SpaceBindingSpec, SpaceNamespace, SpaceSpec, SpaceStatus};
pub use user_signup::{IdentityClaims, UserSignup, UserSignupSpec, UserSignupState, UserSignupStatus};

use serde::{Deserialize, Serialize};

/// API group of all KubeSaw custom resources
pub const GROUP: &str = "kubesaw.dev";

// ============================================================================
// Label keys (indexed, queried with selector equality)
// ============================================================================

/// UserSignup lifecycle state: pending, approved, deactivated, banned
pub const STATE_LABEL: &str = "kubesaw.dev/state";

/// MD5 hash of the canonicalized phone number; shared between UserSignup and
/// BannedUser so a single selector covers both
pub const PHONE_HASH_LABEL: &str = "kubesaw.dev/phone-number-hash";

/// MD5 hash of the lowercased email address
pub const EMAIL_HASH_LABEL: &str = "kubesaw.dev/email-hash";

/// Name of the social event whose activation code approved this signup
pub const SOCIAL_EVENT_LABEL: &str = "kubesaw.dev/social-event";

/// MasterUserRecord owning a SpaceBinding
pub const SPACE_BINDING_MUR_LABEL: &str = "kubesaw.dev/masteruserrecord";

/// `state` label value for approved signups
pub const STATE_APPROVED: &str = "approved";

// ============================================================================
// Annotation keys (unordered metadata on UserSignup)
// ============================================================================

/// Verification initiations within the current 24h window
pub const VERIFICATION_COUNTER_ANNOTATION: &str = "kubesaw.dev/verification-counter";

/// Start of the current 24h verification window (RFC3339, millisecond precision)
pub const VERIFICATION_INIT_TIMESTAMP_ANNOTATION: &str = "kubesaw.dev/verification-init-timestamp";

/// The generated six-digit verification code
pub const VERIFICATION_CODE_ANNOTATION: &str = "kubesaw.dev/verification-code";

/// Expiry of the verification code (RFC3339, millisecond precision)
pub const VERIFICATION_EXPIRY_ANNOTATION: &str = "kubesaw.dev/verification-expiry";

/// Failed code-entry attempts against the current code
pub const VERIFICATION_ATTEMPTS_ANNOTATION: &str = "kubesaw.dev/verification-attempts";

/// Number of times this account has been activated
pub const ACTIVATION_COUNTER_ANNOTATION: &str = "kubesaw.dev/activation-counter";

/// Captcha score in [0,1] assigned at sign-up time
pub const CAPTCHA_SCORE_ANNOTATION: &str = "kubesaw.dev/captcha-score";

/// A single entry of a resource's status condition list
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type, e.g. "Complete"
    #[serde(rename = "type")]
    pub type_: String,
    /// "True", "False" or "Unknown"
    pub status: String,
    /// Machine-readable reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
