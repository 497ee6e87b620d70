//! Retryable optimistic-concurrency updates of UserSignup resources
//!
//! The UserSignup is never locked client-side; concurrent mutation is
//! resolved by the API server's resource-version conflicts. Callers declare
//! their intended mutation as a [`SignupDelta`] (or an arbitrary mutator for
//! the flows that need one); the runner re-reads the current resource and
//! re-applies the mutation on the fresh copy until the API server accepts it.

use std::collections::{BTreeMap, BTreeSet};

use crate::crd::{UserSignup, UserSignupState};
use crate::error::HttpError;
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::store::{SignupStore, StoreError};

/// The user-facing message returned when the update loop gives up.
pub const UPDATE_FAILED_MESSAGE: &str = "there was an error while updating your account - please \
     wait a moment before trying again. If this error persists, please contact the Developer \
     Sandbox team at devsandbox@redhat.com for assistance: error while verifying phone code";

/// A declarative mutation applied to a freshly-read UserSignup.
#[derive(Clone, Debug, Default)]
pub struct SignupDelta {
    set_annotations: BTreeMap<String, String>,
    delete_annotations: BTreeSet<String>,
    set_labels: BTreeMap<String, String>,
    verification_required: Option<bool>,
    deactivated: Option<bool>,
}

impl SignupDelta {
    /// Empty delta
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an annotation
    pub fn set_annotation(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set_annotations.insert(key.to_string(), value.into());
        self
    }

    /// Delete an annotation
    pub fn delete_annotation(mut self, key: &str) -> Self {
        self.delete_annotations.insert(key.to_string());
        self
    }

    /// Set a label
    pub fn set_label(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set_labels.insert(key.to_string(), value.into());
        self
    }

    /// Set or clear the verification-required state bit
    pub fn verification_required(mut self, value: bool) -> Self {
        self.verification_required = Some(value);
        self
    }

    /// Set or clear the deactivated state bit
    pub fn deactivated(mut self, value: bool) -> Self {
        self.deactivated = Some(value);
        self
    }

    /// Apply the delta to a UserSignup
    pub fn apply(&self, signup: &mut UserSignup) {
        for (key, value) in &self.set_annotations {
            signup.set_annotation(key, value.clone());
        }
        for key in &self.delete_annotations {
            signup.remove_annotation(key);
        }
        for (key, value) in &self.set_labels {
            signup.set_label(key, value.clone());
        }
        if let Some(required) = self.verification_required {
            signup.set_state(UserSignupState::VerificationRequired, required);
        }
        if let Some(deactivated) = self.deactivated {
            signup.set_state(UserSignupState::Deactivated, deactivated);
        }
    }
}

/// Re-read, mutate and update the named UserSignup until the API server
/// accepts it or the attempts are exhausted.
///
/// Conflicts and transient server errors are retried with exponential
/// backoff; on exhausted retries the caller gets a 500 carrying
/// [`UPDATE_FAILED_MESSAGE`].
pub async fn poll_update_signup<F>(
    store: &dyn SignupStore,
    name: &str,
    mutate: F,
) -> Result<(), HttpError>
where
    F: Fn(&mut UserSignup),
{
    let mutate = &mutate;
    let result = retry_with_backoff(
        &RetryConfig::default(),
        "update usersignup",
        StoreError::is_retryable,
        move || async move {
            let mut signup = store
                .get_user_signup(name)
                .await?
                .ok_or_else(|| StoreError::Api(format!("usersignup {} not found", name)))?;
            mutate(&mut signup);
            store.update_user_signup(&signup).await?;
            Ok(())
        },
    )
    .await;

    result.map_err(|e: StoreError| {
        tracing::error!(name = %name, error = %e, "error updating usersignup");
        HttpError::internal(UPDATE_FAILED_MESSAGE, "")
    })
}

/// [`poll_update_signup`] with a declarative delta.
pub async fn poll_apply_delta(
    store: &dyn SignupStore,
    name: &str,
    delta: &SignupDelta,
) -> Result<(), HttpError> {
    poll_update_signup(store, name, |signup| delta.apply(signup)).await
}
