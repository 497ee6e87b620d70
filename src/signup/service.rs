//! Signup service
//!
//! Creates and reads UserSignup resources and enforces the banned-user and
//! forbidden-username rules. Mutation of existing signups goes through the
//! verification service and the retryable update loop, never through here.

use std::sync::Arc;

use tracing::{info, warn};

use crate::auth::TokenClaims;
use crate::config::Config;
use crate::crd::{
    IdentityClaims, UserSignup, UserSignupSpec, UserSignupState, EMAIL_HASH_LABEL,
    PHONE_HASH_LABEL, STATE_APPROVED, STATE_LABEL,
};
use crate::error::HttpError;
use crate::hash;
use crate::signup::{encode_user_identifier, social_event, Signup, SignupStatus, BANNED_REASON};
use crate::store::SignupStore;

/// Preferred usernames matching this prefix belong to platform admins and can
/// never sign up through the public API.
const ADMIN_USERNAME_PREFIX: &str = "kubesaw-crtadmin";

/// Reads and mutates UserSignup resources and computes the derived view.
pub struct SignupService {
    store: Arc<dyn SignupStore>,
    config: Config,
}

impl SignupService {
    /// Create a service over the given store
    pub fn new(store: Arc<dyn SignupStore>, config: Config) -> Self {
        Self { store, config }
    }

    /// The backing store
    pub fn store(&self) -> &Arc<dyn SignupStore> {
        &self.store
    }

    /// Create a UserSignup for the authenticated identity.
    ///
    /// With a social-event hint the event is validated and applied, skipping
    /// phone verification.
    pub async fn signup(
        &self,
        claims: &TokenClaims,
        social_event_code: Option<&str>,
    ) -> Result<Signup, HttpError> {
        let username = &claims.username;
        if username.starts_with(ADMIN_USERNAME_PREFIX) {
            warn!(username = %username, "rejecting signup for admin username");
            return Err(HttpError::forbidden(
                format!("forbidden: failed to create usersignup for {}", username),
                "",
            ));
        }

        let name = encode_user_identifier(username);
        let mut signup = UserSignup::new(
            &name,
            UserSignupSpec {
                identity_claims: IdentityClaims {
                    sub: claims.sub.clone(),
                    preferred_username: username.clone(),
                    email: claims.email.clone(),
                    given_name: claims.given_name.clone(),
                    family_name: claims.family_name.clone(),
                    company: claims.company.clone(),
                },
                states: vec![],
            },
        );
        signup.metadata.namespace = Some(self.store.namespace().to_string());
        signup.set_label(EMAIL_HASH_LABEL, hash::email_hash(&claims.email));

        match social_event_code {
            Some(code) => {
                let event = social_event::get_and_validate_social_event(self.store.as_ref(), code)
                    .await?;
                social_event::apply_social_event(&event, &mut signup);
            }
            None => {
                if self.config.verification.enabled {
                    signup.set_state(UserSignupState::VerificationRequired, true);
                }
            }
        }

        info!(name = %name, username = %username, "creating usersignup");
        let created = self
            .store
            .create_user_signup(&signup)
            .await
            .map_err(|e| HttpError::internal(e.to_string(), ""))?;

        Ok(signup_view(&created))
    }

    /// Return the derived view of the user's signup, or `None` when no
    /// UserSignup exists.
    ///
    /// With `check_completed` the banned-user rule is also evaluated and a
    /// banned signup surfaces with reason [`BANNED_REASON`]; the proxy passes
    /// `false` and performs its own ban check.
    pub async fn get_signup(
        &self,
        username: &str,
        check_completed: bool,
    ) -> Result<Option<Signup>, HttpError> {
        let name = encode_user_identifier(username);
        let signup = self
            .store
            .get_user_signup(&name)
            .await
            .map_err(|e| HttpError::internal(e.to_string(), ""))?;

        let Some(signup) = signup else {
            return Ok(None);
        };

        if check_completed {
            let email = &signup.spec.identity_claims.email;
            if self.is_email_banned(email).await? {
                let mut view = signup_view(&signup);
                view.status = SignupStatus {
                    ready: false,
                    reason: BANNED_REASON.to_string(),
                    verification_required: false,
                };
                return Ok(Some(view));
            }
        }

        Ok(Some(signup_view(&signup)))
    }

    /// Fetch the raw UserSignup behind an encoded identifier.
    pub async fn get_user_signup_from_identifier(
        &self,
        encoded_name: &str,
    ) -> Result<Option<UserSignup>, HttpError> {
        self.store
            .get_user_signup(encoded_name)
            .await
            .map_err(|e| HttpError::internal(e.to_string(), ""))
    }

    /// Whether a BannedUser exists for this email address.
    pub async fn is_email_banned(&self, email: &str) -> Result<bool, HttpError> {
        let selector = format!("{}={}", EMAIL_HASH_LABEL, hash::email_hash(email));
        let banned = self
            .store
            .list_banned_users(&selector)
            .await
            .map_err(|e| HttpError::internal(e.to_string(), "failed listing banned users"))?;
        Ok(!banned.is_empty())
    }

    /// Check whether a phone number (raw or already hashed) is banned or in
    /// use by another active, approved signup.
    pub async fn phone_number_already_in_use(
        &self,
        username: &str,
        phone_number_or_hash: &str,
    ) -> Result<(), HttpError> {
        let label_value = if hash::is_md5_hash(phone_number_or_hash) {
            phone_number_or_hash.to_lowercase()
        } else {
            hash::phone_hash(phone_number_or_hash)
        };

        let banned_selector = format!("{}={}", PHONE_HASH_LABEL, label_value);
        let banned = self
            .store
            .list_banned_users(&banned_selector)
            .await
            .map_err(|e| HttpError::internal(e.to_string(), "failed listing banned users"))?;
        if !banned.is_empty() {
            return Err(HttpError::forbidden(
                "cannot re-register with phone number",
                "phone number already in use",
            ));
        }

        let signup_selector = format!(
            "{}={},{}={}",
            STATE_LABEL, STATE_APPROVED, PHONE_HASH_LABEL, label_value
        );
        let signups = self
            .store
            .list_user_signups(&signup_selector)
            .await
            .map_err(|e| HttpError::internal(e.to_string(), "failed listing userSignups"))?;

        for signup in &signups {
            if signup.spec.identity_claims.preferred_username != username && !signup.deactivated() {
                return Err(HttpError::forbidden(
                    "cannot re-register with phone number",
                    "phone number already in use",
                ));
            }
        }

        Ok(())
    }
}

/// Compute the derived view of a UserSignup
pub fn signup_view(signup: &UserSignup) -> Signup {
    let claims = &signup.spec.identity_claims;
    let status = signup.status.as_ref();
    Signup {
        name: signup.metadata.name.clone().unwrap_or_default(),
        username: claims.preferred_username.clone(),
        compliant_username: status
            .and_then(|s| s.compliant_username.clone())
            .unwrap_or_default(),
        given_name: claims.given_name.clone(),
        family_name: claims.family_name.clone(),
        company: claims.company.clone(),
        home_space: status.and_then(|s| s.home_space.clone()).unwrap_or_default(),
        status: SignupStatus {
            ready: signup.ready(),
            reason: signup
                .complete_condition()
                .and_then(|c| c.reason.clone())
                .unwrap_or_default(),
            verification_required: signup.verification_required(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{BannedUser, BannedUserSpec, Condition, SocialEventSpec, UserSignupStatus, SOCIAL_EVENT_LABEL};
    use crate::crd::SocialEvent;
    use crate::store::fake::FakeStore;
    use crate::store::StoreError;
    use chrono::{Duration, Utc};

    fn claims(sub: &str, username: &str, email: &str) -> TokenClaims {
        TokenClaims {
            sub: sub.to_string(),
            username: username.to_string(),
            email: email.to_string(),
            given_name: Some("Foo".to_string()),
            family_name: Some("Bar".to_string()),
            company: None,
        }
    }

    fn service(store: Arc<FakeStore>) -> SignupService {
        SignupService::new(store, Config::default())
    }

    #[tokio::test]
    async fn test_signup_creates_usersignup() {
        let store = Arc::new(FakeStore::new());
        let svc = service(store.clone());

        let view = svc
            .signup(&claims("u1", "bill@kubesaw", "u1@test.com"), None)
            .await
            .unwrap();

        assert_eq!(view.name, encode_user_identifier("bill@kubesaw"));
        assert!(view.status.verification_required);

        let created = store.signup(&encode_user_identifier("bill@kubesaw")).unwrap();
        assert_eq!(created.spec.identity_claims.sub, "u1");
        assert_eq!(created.spec.identity_claims.preferred_username, "bill@kubesaw");
        assert_eq!(created.spec.identity_claims.email, "u1@test.com");
        assert!(created.verification_required());
    }

    #[tokio::test]
    async fn test_signup_rejects_admin_username() {
        let svc = service(Arc::new(FakeStore::new()));
        let err = svc
            .signup(&claims("u1", "kubesaw-crtadmin", "admin@test.com"), None)
            .await
            .unwrap_err();

        assert_eq!(err.status, axum::http::StatusCode::FORBIDDEN);
        assert_eq!(
            err.message,
            "forbidden: failed to create usersignup for kubesaw-crtadmin"
        );
    }

    #[tokio::test]
    async fn test_signup_propagates_create_error() {
        let store = Arc::new(FakeStore::new());
        *store.fail_create.lock().unwrap() = Some(StoreError::Api("blah".to_string()));
        let svc = service(store);

        let err = svc
            .signup(&claims("u1", "bill@kubesaw", "u1@test.com"), None)
            .await
            .unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message, "blah");
    }

    #[tokio::test]
    async fn test_signup_with_social_event() {
        let store = Arc::new(FakeStore::new());
        let now = Utc::now();
        store.add_event(SocialEvent::new(
            "event",
            SocialEventSpec {
                start_time: (now - Duration::hours(1)).to_rfc3339(),
                end_time: (now + Duration::hours(1)).to_rfc3339(),
                max_attendees: 10,
            },
        ));
        let svc = service(store.clone());

        let view = svc
            .signup(&claims("u-jane", "Jane", "jane@test.com"), Some("event"))
            .await
            .unwrap();

        assert!(!view.status.verification_required);
        let created = store.signup(&encode_user_identifier("Jane")).unwrap();
        assert_eq!(created.label(SOCIAL_EVENT_LABEL), Some("event"));
        assert!(!created.verification_required());
    }

    #[tokio::test]
    async fn test_get_signup_not_found_returns_none() {
        let svc = service(Arc::new(FakeStore::new()));
        assert!(svc.get_signup("dummy", true).await.unwrap().is_none());
        assert!(svc.get_signup("dummy", false).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_signup_derives_status() {
        let store = Arc::new(FakeStore::new());
        let mut signup = UserSignup::new(
            &encode_user_identifier("ted@kubesaw"),
            UserSignupSpec {
                identity_claims: IdentityClaims {
                    sub: "u2".to_string(),
                    preferred_username: "ted@kubesaw".to_string(),
                    email: "ted@test.com".to_string(),
                    given_name: Some("Foo".to_string()),
                    family_name: Some("Bar".to_string()),
                    company: None,
                },
                states: vec![],
            },
        );
        signup.status = Some(UserSignupStatus {
            conditions: vec![Condition {
                type_: "Complete".to_string(),
                status: "False".to_string(),
                reason: Some("Provisioning".to_string()),
                message: None,
            }],
            compliant_username: Some("ted".to_string()),
            home_space: Some("ted".to_string()),
        });
        store.signups.lock().unwrap().insert(signup.metadata.name.clone().unwrap(), signup);

        let view = service(store).get_signup("ted@kubesaw", true).await.unwrap().unwrap();
        assert_eq!(view.username, "ted@kubesaw");
        assert_eq!(view.compliant_username, "ted");
        assert_eq!(view.home_space, "ted");
        assert_eq!(view.status.reason, "Provisioning");
        assert!(!view.status.ready);
        assert_eq!(view.given_name.as_deref(), Some("Foo"));
        assert_eq!(view.family_name.as_deref(), Some("Bar"));
    }

    #[tokio::test]
    async fn test_get_signup_banned_user() {
        let store = Arc::new(FakeStore::new());
        let mut signup = UserSignup::new(
            &encode_user_identifier("ted@kubesaw"),
            UserSignupSpec {
                identity_claims: IdentityClaims {
                    sub: "u2".to_string(),
                    preferred_username: "ted@kubesaw".to_string(),
                    email: "ted@test.com".to_string(),
                    ..Default::default()
                },
                states: vec![],
            },
        );
        signup.status = Some(UserSignupStatus {
            conditions: vec![Condition {
                type_: "Complete".to_string(),
                status: "True".to_string(),
                reason: Some("Provisioned".to_string()),
                message: None,
            }],
            compliant_username: Some("ted".to_string()),
            home_space: None,
        });
        store.signups.lock().unwrap().insert(signup.metadata.name.clone().unwrap(), signup);

        let mut banned = BannedUser::new("banned", BannedUserSpec { email: "ted@test.com".to_string() });
        banned.metadata.labels = Some(
            [(EMAIL_HASH_LABEL.to_string(), hash::email_hash("ted@test.com"))]
                .into_iter()
                .collect(),
        );
        store.add_banned(banned);

        let view = service(store).get_signup("ted@kubesaw", true).await.unwrap().unwrap();
        assert!(view.banned());
        assert!(!view.status.ready);
    }

    #[tokio::test]
    async fn test_phone_in_use_by_banned_user() {
        let store = Arc::new(FakeStore::new());
        let mut banned = BannedUser::new("banned", BannedUserSpec { email: "x@test.com".to_string() });
        banned.metadata.labels = Some(
            [(PHONE_HASH_LABEL.to_string(), hash::phone_hash("+12268213044"))]
                .into_iter()
                .collect(),
        );
        store.add_banned(banned);

        let err = service(store)
            .phone_number_already_in_use("johnny@kubesaw", "+12268213044")
            .await
            .unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::FORBIDDEN);
        assert_eq!(err.details, "phone number already in use");
    }

    #[tokio::test]
    async fn test_phone_in_use_accepts_raw_or_hash() {
        let store = Arc::new(FakeStore::new());
        let mut other = UserSignup::new(
            &encode_user_identifier("other@kubesaw"),
            UserSignupSpec {
                identity_claims: IdentityClaims {
                    sub: "o".to_string(),
                    preferred_username: "other@kubesaw".to_string(),
                    email: "o@test.com".to_string(),
                    ..Default::default()
                },
                states: vec![],
            },
        );
        other.set_label(STATE_LABEL, STATE_APPROVED);
        other.set_label(PHONE_HASH_LABEL, hash::phone_hash("+12268213044"));
        store
            .signups
            .lock()
            .unwrap()
            .insert(other.metadata.name.clone().unwrap(), other);

        let svc = service(store);

        // raw phone
        let err = svc
            .phone_number_already_in_use("johnny@kubesaw", "+12268213044")
            .await
            .unwrap_err();
        assert_eq!(err.details, "phone number already in use");

        // pre-hashed value finds the same signup
        let err = svc
            .phone_number_already_in_use("johnny@kubesaw", &hash::phone_hash("+12268213044"))
            .await
            .unwrap_err();
        assert_eq!(err.details, "phone number already in use");

        // the owner itself is allowed
        svc.phone_number_already_in_use("other@kubesaw", "+12268213044")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_phone_in_use_ignores_deactivated_signups() {
        let store = Arc::new(FakeStore::new());
        let mut other = UserSignup::new(
            &encode_user_identifier("other@kubesaw"),
            UserSignupSpec {
                identity_claims: IdentityClaims {
                    sub: "o".to_string(),
                    preferred_username: "other@kubesaw".to_string(),
                    email: "o@test.com".to_string(),
                    ..Default::default()
                },
                states: vec![UserSignupState::Deactivated],
            },
        );
        other.set_label(STATE_LABEL, STATE_APPROVED);
        other.set_label(PHONE_HASH_LABEL, hash::phone_hash("+12268213044"));
        store
            .signups
            .lock()
            .unwrap()
            .insert(other.metadata.name.clone().unwrap(), other);

        service(store)
            .phone_number_already_in_use("johnny@kubesaw", "+12268213044")
            .await
            .unwrap();
    }
}
