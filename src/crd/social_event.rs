//! SocialEvent CRD
//!
//! A time-bounded, capacity-bounded campaign whose name doubles as an
//! activation code.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// SocialEvent defines the window and capacity of an activation campaign.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kubesaw.dev",
    version = "v1alpha1",
    kind = "SocialEvent",
    namespaced,
    status = "SocialEventStatus",
    printcolumn = r#"{"name":"MaxAttendees","type":"integer","jsonPath":".spec.maxAttendees"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SocialEventSpec {
    /// Start of the validity window (RFC3339)
    pub start_time: String,

    /// End of the validity window (RFC3339)
    pub end_time: String,

    /// Maximum number of activations
    pub max_attendees: u32,
}

/// SocialEvent status maintained by the host operator
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SocialEventStatus {
    /// Number of signups activated with this event's code
    #[serde(default)]
    pub activation_count: u32,
}

impl SocialEvent {
    /// Parsed start of the validity window
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.spec.start_time)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }

    /// Parsed end of the validity window
    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.spec.end_time)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }

    /// Current activation count
    pub fn activation_count(&self) -> u32 {
        self.status.as_ref().map(|s| s.activation_count).unwrap_or(0)
    }

    /// Whether the event still has capacity left
    pub fn has_capacity(&self) -> bool {
        self.activation_count() < self.spec.max_attendees
    }
}
