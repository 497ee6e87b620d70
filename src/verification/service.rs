//! Phone and activation-code verification
//!
//! The state machine layered on top of the retryable UserSignup update
//! protocol: daily-limited code initiation, attempt-counted code checks with
//! expiry, a captcha-gated manual-approval rule, and social-event activation
//! with capacity checking.

use std::sync::Arc;

use axum::http::StatusCode;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rand::RngCore;
use tracing::{error, info};

use crate::auth::TokenClaims;
use crate::config::Config;
use crate::crd::{
    UserSignup, ACTIVATION_COUNTER_ANNOTATION, CAPTCHA_SCORE_ANNOTATION, PHONE_HASH_LABEL,
    SOCIAL_EVENT_LABEL, VERIFICATION_ATTEMPTS_ANNOTATION, VERIFICATION_CODE_ANNOTATION,
    VERIFICATION_COUNTER_ANNOTATION, VERIFICATION_EXPIRY_ANNOTATION,
    VERIFICATION_INIT_TIMESTAMP_ANNOTATION,
};
use crate::error::HttpError;
use crate::hash;
use crate::signup::social_event::get_and_validate_social_event;
use crate::signup::{encode_user_identifier, poll_apply_delta, SignupDelta, SignupService};
use crate::store::SignupStore;
use crate::verification::sender::NotificationSender;

/// Length of a generated verification code
const CODE_LENGTH: usize = 6;

/// Format a timestamp the way the verification annotations store it
/// (RFC3339 with millisecond precision).
pub fn format_timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a verification-annotation timestamp
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Generate a six-digit code from cryptographically random bytes, each byte
/// mapped modulo 10 onto the digit charset.
fn generate_verification_code() -> String {
    let mut buf = [0u8; CODE_LENGTH];
    rand::thread_rng().fill_bytes(&mut buf);
    buf.iter().map(|b| char::from(b'0' + b % 10)).collect()
}

/// The verification state machine.
pub struct VerificationService {
    store: Arc<dyn SignupStore>,
    signup_service: Arc<SignupService>,
    sender: Arc<dyn NotificationSender>,
    config: Config,
}

impl VerificationService {
    /// Create a verification service
    pub fn new(
        store: Arc<dyn SignupStore>,
        signup_service: Arc<SignupService>,
        sender: Arc<dyn NotificationSender>,
        config: Config,
    ) -> Self {
        Self {
            store,
            signup_service,
            sender,
            config,
        }
    }

    /// Send a verification code to the user's phone.
    ///
    /// The UserSignup is updated with the code, its expiry, the daily counter
    /// and the phone-hash label; the SMS is sent before anything is
    /// persisted, and a failed send leaves the resource untouched.
    pub async fn init_verification(
        &self,
        username: &str,
        e164_phone_number: &str,
        country_code: &str,
    ) -> Result<(), HttpError> {
        let name = encode_user_identifier(username);
        let signup = self.load_signup(username, &name, "usersignup not found").await?;

        if !signup.verification_required() {
            info!(username = %username, "phone verification attempted for user without verification requirement");
            return Err(HttpError::bad_request(
                "forbidden request",
                "verification code will not be sent",
            ));
        }

        if let Err(e) = self
            .signup_service
            .phone_number_already_in_use(username, e164_phone_number)
            .await
        {
            if e.status == StatusCode::FORBIDDEN {
                error!(error = %e, "phone number already in use");
                return Err(HttpError::forbidden(
                    "phone number already in use",
                    format!("cannot register using phone number: {}", e164_phone_number),
                ));
            }
            error!(error = %e, "error while looking up users by phone number");
            return Err(HttpError::internal(
                e.to_string(),
                "could not lookup users by phone number",
            ));
        }

        let mut delta =
            SignupDelta::new().set_label(PHONE_HASH_LABEL, hash::phone_hash(e164_phone_number));

        let daily_limit = self.config.verification.daily_limit;
        let mut counter: usize = 0;
        let counter_raw = signup.annotation(VERIFICATION_COUNTER_ANNOTATION).unwrap_or("");
        if !counter_raw.is_empty() {
            match counter_raw.parse() {
                Ok(n) => counter = n,
                Err(e) => {
                    // force a valid value so the limit check below trips
                    error!(
                        error = %e,
                        value = %counter_raw,
                        name = %name,
                        "verification counter annotation is not an integer"
                    );
                    delta = delta
                        .set_annotation(VERIFICATION_COUNTER_ANNOTATION, daily_limit.to_string());
                    counter = daily_limit;
                }
            }
        }

        let now = Utc::now();

        // reset the 24h window when the timestamp is missing, unparseable or old
        let window_start = signup
            .annotation(VERIFICATION_INIT_TIMESTAMP_ANNOTATION)
            .and_then(parse_timestamp);
        let window_expired = match window_start {
            Some(ts) => now > ts + Duration::hours(24),
            None => true,
        };
        if window_expired {
            delta = delta
                .set_annotation(VERIFICATION_INIT_TIMESTAMP_ANNOTATION, format_timestamp(now))
                .set_annotation(VERIFICATION_COUNTER_ANNOTATION, "0");
            counter = 0;
        }

        let mut init_error = None;
        if counter >= daily_limit {
            error!(counter = counter, daily_limit = daily_limit, "daily limit exceeded");
            init_error = Some(HttpError::forbidden(
                "daily limit exceeded",
                "cannot generate new verification code",
            ));
        }

        if init_error.is_none() {
            let code = generate_verification_code();
            let expiry = now + Duration::minutes(self.config.verification.code_expires_in_min);
            delta = delta
                .set_annotation(VERIFICATION_ATTEMPTS_ANNOTATION, "0")
                .set_annotation(VERIFICATION_COUNTER_ANNOTATION, (counter + 1).to_string())
                .set_annotation(VERIFICATION_CODE_ANNOTATION, code.as_str())
                .set_annotation(VERIFICATION_EXPIRY_ANNOTATION, format_timestamp(expiry));

            let content = self.config.verification.message_template.replace("{code}", &code);
            if let Err(e) = self.sender.send_sms(e164_phone_number, &content).await {
                // don't bother updating the UserSignup
                error!(error = %e, country_code = %country_code, "error while sending notification");
                return Err(HttpError::internal(
                    format!("{}: error while sending verification code", e.message),
                    "",
                ));
            }
        }

        poll_apply_delta(self.store.as_ref(), &name, &delta).await?;

        match init_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Validate the user's phone verification code.
    ///
    /// A successful verification clears the verification-required state bit
    /// and removes every verification annotation; a mismatch increments the
    /// attempt counter by exactly one.
    pub async fn verify_phone_code(&self, username: &str, code: &str) -> Result<(), HttpError> {
        let name = encode_user_identifier(username);
        let signup = self.load_signup(username, &name, "user not found").await?;

        self.check_captcha_gate(&signup)?;

        // the stored hash is checked, never the raw phone
        let stored_hash = signup.label(PHONE_HASH_LABEL).unwrap_or("");
        if let Err(e) = self
            .signup_service
            .phone_number_already_in_use(username, stored_hash)
            .await
        {
            error!(error = %e, "phone number to verify already in use");
            return Err(e);
        }

        let mut delta = SignupDelta::new();
        let attempts_allowed = self.config.verification.attempts_allowed;
        let attempts_raw = signup.annotation(VERIFICATION_ATTEMPTS_ANNOTATION).unwrap_or("");
        let mut attempts: usize = match attempts_raw.parse() {
            Ok(n) => n,
            Err(e) => {
                // force a valid value and let the attempts check below trip
                error!(
                    error = %e,
                    value = %attempts_raw,
                    name = %name,
                    "verification attempts annotation is not an integer"
                );
                delta = delta
                    .set_annotation(VERIFICATION_ATTEMPTS_ANNOTATION, attempts_allowed.to_string());
                attempts_allowed
            }
        };

        let mut verification_error: Option<HttpError> = None;

        if attempts >= attempts_allowed {
            verification_error = Some(HttpError::too_many_requests(
                "too many verification attempts",
                "",
            ));
        }

        if verification_error.is_none() {
            match signup
                .annotation(VERIFICATION_EXPIRY_ANNOTATION)
                .and_then(parse_timestamp)
            {
                None => {
                    verification_error =
                        Some(HttpError::internal("error parsing expiry timestamp", ""));
                }
                Some(expiry) if Utc::now() > expiry => {
                    verification_error =
                        Some(HttpError::forbidden("expired", "verification code expired"));
                }
                Some(_) => {}
            }
        }

        if verification_error.is_none()
            && Some(code) != signup.annotation(VERIFICATION_CODE_ANNOTATION)
        {
            attempts += 1;
            delta = delta.set_annotation(VERIFICATION_ATTEMPTS_ANNOTATION, attempts.to_string());
            verification_error = Some(HttpError::forbidden(
                "invalid code",
                "the provided code is invalid",
            ));
        }

        if verification_error.is_none() {
            delta = delta
                .verification_required(false)
                .delete_annotation(VERIFICATION_CODE_ANNOTATION)
                .delete_annotation(VERIFICATION_ATTEMPTS_ANNOTATION)
                .delete_annotation(VERIFICATION_COUNTER_ANNOTATION)
                .delete_annotation(VERIFICATION_INIT_TIMESTAMP_ANNOTATION)
                .delete_annotation(VERIFICATION_EXPIRY_ANNOTATION);
        } else if let Some(e) = &verification_error {
            error!(error = %e, "error validating verification code");
        }

        poll_apply_delta(self.store.as_ref(), &name, &delta)
            .await
            .map_err(|e| e.ensure_details("unexpected error while verifying phone code"))?;

        match verification_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Verify an activation code: the SocialEvent named by the code must
    /// exist, be inside its validity window and have capacity left.
    ///
    /// An unknown user is signed up on the spot with the social-event hint.
    /// When both the validation and the subsequent update fail, the
    /// validation error is reported.
    pub async fn verify_activation_code(
        &self,
        claims: &TokenClaims,
        code: &str,
    ) -> Result<(), HttpError> {
        let username = &claims.username;
        info!(code = %code, "verifying activation code");

        let name = encode_user_identifier(username);
        let signup = match self.store.get_user_signup(&name).await {
            Ok(Some(signup)) => signup,
            Ok(None) => {
                return self
                    .signup_service
                    .signup(claims, Some(code))
                    .await
                    .map(|_| ());
            }
            Err(e) => {
                return Err(HttpError::internal(
                    format!("{}: error retrieving usersignup with username '{}'", e, username),
                    "",
                ));
            }
        };

        let attempts = self.check_attempts(&signup)?;

        let (delta, validation_error) =
            match get_and_validate_social_event(self.store.as_ref(), code).await {
                Ok(_event) => {
                    info!(code = %code, "approving user signup request with activation code");
                    let delta = SignupDelta::new()
                        .set_label(SOCIAL_EVENT_LABEL, code)
                        .verification_required(false)
                        .deactivated(false)
                        .delete_annotation(VERIFICATION_ATTEMPTS_ANNOTATION);
                    (delta, None)
                }
                Err(e) => {
                    let delta = SignupDelta::new()
                        .set_annotation(VERIFICATION_ATTEMPTS_ANNOTATION, (attempts + 1).to_string());
                    (delta, Some(e))
                }
            };

        let update_result = poll_apply_delta(self.store.as_ref(), &name, &delta).await;
        if let Err(e) = &update_result {
            error!(error = %e, "unable to update user signup after validating activation code");
        }

        match (validation_error, update_result) {
            (Some(e), _) => Err(e),
            (None, Err(e)) => Err(e),
            (None, Ok(())) => Ok(()),
        }
    }

    async fn load_signup(
        &self,
        username: &str,
        name: &str,
        not_found_details: &str,
    ) -> Result<UserSignup, HttpError> {
        match self.store.get_user_signup(name).await {
            Ok(Some(signup)) => Ok(signup),
            Ok(None) => {
                error!(name = %name, "usersignup not found");
                Err(HttpError::not_found(
                    format!(
                        "usersignups.kubesaw.dev \"{}\" not found: {}",
                        name, not_found_details
                    ),
                    "",
                ))
            }
            Err(e) => {
                error!(error = %e, "error retrieving usersignup");
                Err(HttpError::internal(
                    format!("{}: error retrieving usersignup with username '{}'", e, username),
                    "",
                ))
            }
        }
    }

    /// The captcha gate: users whose score is below the required threshold
    /// need manual approval, unless they are reactivating and low-score
    /// reactivation is allowed.
    fn check_captcha_gate(&self, signup: &UserSignup) -> Result<(), HttpError> {
        if self.config.verification.captcha_allow_low_score_reactivation {
            if let Some(raw) = signup.annotation(ACTIVATION_COUNTER_ANNOTATION) {
                match raw.parse::<u32>() {
                    Ok(n) if n > 1 => return Ok(()),
                    Ok(_) => return self.check_required_manual_approval(signup),
                    Err(e) => {
                        error!(error = %e, "activation counter is not an integer value, checking required captcha score");
                        return self.check_required_manual_approval(signup);
                    }
                }
            }
        }
        self.check_required_manual_approval(signup)
    }

    fn check_required_manual_approval(&self, signup: &UserSignup) -> Result<(), HttpError> {
        if let Some(raw) = signup.annotation(CAPTCHA_SCORE_ANNOTATION) {
            match raw.parse::<f32>() {
                Ok(score) if score < self.config.verification.captcha_required_score => {
                    info!(
                        score = score,
                        "captcha score is too low, automatic verification disabled, manual approval required"
                    );
                    return Err(HttpError::forbidden(
                        "verification failed",
                        "verification is not available at this time",
                    ));
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "error while parsing captcha score");
                }
            }
        }
        Ok(())
    }

    /// Shared attempt-counter check for the activation flow.
    fn check_attempts(&self, signup: &UserSignup) -> Result<usize, HttpError> {
        let raw = signup.annotation(VERIFICATION_ATTEMPTS_ANNOTATION).unwrap_or("");
        if raw.is_empty() {
            return Ok(0);
        }
        let attempts: usize = raw.parse().map_err(|e| {
            HttpError::internal(
                format!(
                    "{}: error converting verification attempts value [{}] to integer",
                    e, raw
                ),
                "",
            )
        })?;
        if attempts >= self.config.verification.attempts_allowed {
            return Err(HttpError::too_many_requests(
                "too many verification attempts",
                raw,
            ));
        }
        Ok(attempts)
    }
}
