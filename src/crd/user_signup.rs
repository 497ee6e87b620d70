//! UserSignup CRD
//!
//! The durable record of a user's sign-up state. At most one UserSignup per
//! encoded identifier exists in the host namespace; the verification workflow
//! mutates it exclusively through the retryable update loop.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::Condition;

/// Condition type set once provisioning has finished
pub const CONDITION_COMPLETE: &str = "Complete";

/// UserSignup holds the identity claims captured at sign-up time plus the
/// state bits driven by the verification and approval workflows.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kubesaw.dev",
    version = "v1alpha1",
    kind = "UserSignup",
    namespaced,
    status = "UserSignupStatus",
    printcolumn = r#"{"name":"Username","type":"string","jsonPath":".spec.identityClaims.preferredUsername"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct UserSignupSpec {
    /// Identity claims extracted from the verified bearer token
    pub identity_claims: IdentityClaims,

    /// Workflow state bits
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub states: Vec<UserSignupState>,
}

/// Identity claims captured from the sign-up token
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IdentityClaims {
    /// Subject (user ID at the identity provider)
    pub sub: String,

    /// Preferred username
    pub preferred_username: String,

    /// Email address
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,

    /// Given name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,

    /// Family name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,

    /// Company
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
}

/// Workflow state bits stored on the spec
///
/// Approval is not a state bit; it is carried by the `state` label.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum UserSignupState {
    /// The account has been deactivated
    Deactivated,
    /// Phone or activation-code verification is still required
    VerificationRequired,
}

/// UserSignup status set by the host operator
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserSignupStatus {
    /// Condition list; "Complete" with status "True" means provisioned
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// DNS-label-safe form of the preferred username, used as the
    /// impersonation identity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compliant_username: Option<String>,

    /// Name of the user's home workspace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_space: Option<String>,
}

impl UserSignup {
    /// Whether the given state bit is set
    pub fn has_state(&self, state: UserSignupState) -> bool {
        self.spec.states.contains(&state)
    }

    /// Set or clear a state bit
    pub fn set_state(&mut self, state: UserSignupState, value: bool) {
        let present = self.has_state(state);
        if value && !present {
            self.spec.states.push(state);
        } else if !value && present {
            self.spec.states.retain(|s| *s != state);
        }
    }

    /// Whether verification is still required
    pub fn verification_required(&self) -> bool {
        self.has_state(UserSignupState::VerificationRequired)
    }

    /// Whether the account is deactivated
    pub fn deactivated(&self) -> bool {
        self.has_state(UserSignupState::Deactivated)
    }

    /// Annotation value lookup
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }

    /// Set an annotation, creating the map if needed
    pub fn set_annotation(&mut self, key: &str, value: impl Into<String>) {
        self.metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), value.into());
    }

    /// Remove an annotation if present
    pub fn remove_annotation(&mut self, key: &str) {
        if let Some(annotations) = self.metadata.annotations.as_mut() {
            annotations.remove(key);
        }
    }

    /// Label value lookup
    pub fn label(&self, key: &str) -> Option<&str> {
        self.metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(key))
            .map(String::as_str)
    }

    /// Set a label, creating the map if needed
    pub fn set_label(&mut self, key: &str, value: impl Into<String>) {
        self.metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), value.into());
    }

    /// The "Complete" condition, if present
    pub fn complete_condition(&self) -> Option<&Condition> {
        self.status
            .as_ref()?
            .conditions
            .iter()
            .find(|c| c.type_ == CONDITION_COMPLETE)
    }

    /// Whether provisioning has finished
    pub fn ready(&self) -> bool {
        self.complete_condition()
            .map(|c| c.status == "True")
            .unwrap_or(false)
    }
}
