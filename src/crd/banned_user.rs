//! BannedUser CRD
//!
//! Queried exclusively by label equality on the email and phone hashes; the
//! raw email is only kept on the spec for operators.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// BannedUser marks an email address (and optionally a phone number, via the
/// phone-hash label) as banned from the platform.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kubesaw.dev",
    version = "v1alpha1",
    kind = "BannedUser",
    namespaced,
    printcolumn = r#"{"name":"Email","type":"string","jsonPath":".spec.email"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BannedUserSpec {
    /// The banned email address
    pub email: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{EMAIL_HASH_LABEL, PHONE_HASH_LABEL};
    use crate::hash;
    use std::collections::BTreeMap;

    #[test]
    fn test_banned_user_labels() {
        let mut banned = BannedUser::new(
            "alice",
            BannedUserSpec {
                email: "alice@redhat.com".to_string(),
            },
        );
        let mut labels = BTreeMap::new();
        labels.insert(EMAIL_HASH_LABEL.to_string(), hash::email_hash("alice@redhat.com"));
        labels.insert(PHONE_HASH_LABEL.to_string(), hash::phone_hash("+12268213044"));
        banned.metadata.labels = Some(labels);

        let labels = banned.metadata.labels.as_ref().unwrap();
        assert_eq!(labels[EMAIL_HASH_LABEL], hash::email_hash("Alice@redhat.com"));
        assert_eq!(labels[PHONE_HASH_LABEL], "fd276563a8232d16620da8ec85d0575f");
    }
}
