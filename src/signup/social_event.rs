//! SocialEvent validation and application
//!
//! A SocialEvent's name doubles as an activation code: the event must exist,
//! be inside its validity window, and still have capacity.

use chrono::Utc;
use tracing::info;

use crate::crd::{SocialEvent, UserSignup, UserSignupState, SOCIAL_EVENT_LABEL, VERIFICATION_ATTEMPTS_ANNOTATION};
use crate::error::HttpError;
use crate::store::SignupStore;

/// Look up the SocialEvent named by the activation code and check that it is
/// currently valid.
pub async fn get_and_validate_social_event(
    store: &dyn SignupStore,
    code: &str,
) -> Result<SocialEvent, HttpError> {
    let event = store
        .get_social_event(code)
        .await
        .map_err(|e| HttpError::internal(e.to_string(), "error retrieving social event"))?
        .ok_or_else(|| HttpError::forbidden("invalid code", "the provided code is invalid"))?;

    let now = Utc::now();

    let start = event
        .start_time()
        .ok_or_else(|| HttpError::internal("social event has an invalid start time", ""))?;
    if now < start {
        return Err(HttpError::forbidden(
            "invalid code",
            "the provided code is not active yet",
        ));
    }

    let end = event
        .end_time()
        .ok_or_else(|| HttpError::internal("social event has an invalid end time", ""))?;
    if now > end {
        return Err(HttpError::forbidden(
            "invalid code",
            "the provided code has expired",
        ));
    }

    if !event.has_capacity() {
        return Err(HttpError::forbidden(
            "invalid code",
            "the event is full",
        ));
    }

    Ok(event)
}

/// Apply a validated social event to a UserSignup: the signup is activated,
/// a possible deactivation is lifted, and the attempt counter is cleared.
pub fn apply_social_event(event: &SocialEvent, signup: &mut UserSignup) {
    let name = event
        .metadata
        .name
        .clone()
        .unwrap_or_default();
    info!(event = %name, "applying social event to usersignup");

    signup.set_label(SOCIAL_EVENT_LABEL, name);
    signup.set_state(UserSignupState::VerificationRequired, false);
    signup.set_state(UserSignupState::Deactivated, false);
    signup.remove_annotation(VERIFICATION_ATTEMPTS_ANNOTATION);
}
