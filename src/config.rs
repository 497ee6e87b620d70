//! Service configuration
//!
//! All knobs are plain values injected into constructors; nothing reads
//! configuration from hidden globals. The binary populates a [`Config`] from
//! CLI flags and environment variables.

use std::time::Duration;

/// Deployment environment of the service.
///
/// Anything other than [`Environment::Prod`] relaxes upstream TLS
/// verification so the proxy can talk to self-signed member clusters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum Environment {
    /// Production
    Prod,
    /// Development
    Dev,
    /// End-to-end test environment
    E2e,
}

impl Environment {
    /// Whether this is the production environment
    pub fn is_prod(self) -> bool {
        self == Environment::Prod
    }
}

/// Top-level service configuration
#[derive(Clone, Debug)]
pub struct Config {
    /// Deployment environment
    pub environment: Environment,
    /// Namespace on the host cluster holding UserSignup/BannedUser/SocialEvent
    pub namespace: String,
    /// Bind port for the sign-up API server
    pub api_port: u16,
    /// Bind port for the proxy server
    pub proxy_port: u16,
    /// Identity-provider settings
    pub auth: AuthConfig,
    /// Phone/activation verification settings
    pub verification: VerificationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: Environment::Prod,
            namespace: "kubesaw-host-operator".to_string(),
            api_port: 8080,
            proxy_port: 8081,
            auth: AuthConfig::default(),
            verification: VerificationConfig::default(),
        }
    }
}

/// Identity-provider (SSO) settings
#[derive(Clone, Debug)]
pub struct AuthConfig {
    /// Base URL of the identity provider, e.g. `https://sso.example.com`
    pub sso_base_url: String,
    /// Realm under the identity provider
    pub sso_realm: String,
    /// JWKS endpoint used to verify bearer-token signatures
    pub jwks_url: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            sso_base_url: "https://sso.devsandbox.dev".to_string(),
            sso_realm: "sandbox-dev".to_string(),
            jwks_url: "https://sso.devsandbox.dev/auth/realms/sandbox-dev/protocol/openid-connect/certs"
                .to_string(),
        }
    }
}

/// Phone/activation verification settings
#[derive(Clone, Debug)]
pub struct VerificationConfig {
    /// Whether new sign-ups require phone verification
    pub enabled: bool,
    /// Max verification initiations per user per rolling 24 hours
    pub daily_limit: usize,
    /// Max code-entry attempts per generated verification code
    pub attempts_allowed: usize,
    /// Verification-code lifetime in minutes
    pub code_expires_in_min: i64,
    /// Captcha score below which manual approval is required
    pub captcha_required_score: f32,
    /// Skip the captcha gate for users reactivating their account
    pub captcha_allow_low_score_reactivation: bool,
    /// SMS body; `{code}` is replaced with the generated code
    pub message_template: String,
    /// Twilio delivery settings
    pub twilio: TwilioConfig,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            daily_limit: 5,
            attempts_allowed: 3,
            code_expires_in_min: 5,
            captcha_required_score: 0.9,
            captcha_allow_low_score_reactivation: true,
            message_template:
                "Developer Sandbox for Red Hat OpenShift: Your verification code is {code}"
                    .to_string(),
            twilio: TwilioConfig::default(),
        }
    }
}

/// Twilio SMS delivery settings
#[derive(Clone, Debug, Default)]
pub struct TwilioConfig {
    /// Account SID
    pub account_sid: String,
    /// Auth token
    pub auth_token: String,
    /// Sender phone number
    pub from_number: String,
    /// API base URL; overridable for tests
    pub base_url: String,
}

impl TwilioConfig {
    /// Base URL with the production default applied
    pub fn effective_base_url(&self) -> &str {
        if self.base_url.is_empty() {
            "https://api.twilio.com"
        } else {
            &self.base_url
        }
    }
}

/// Timeout applied to outbound SMS/JWKS calls
pub const OUTBOUND_HTTP_TIMEOUT: Duration = Duration::from_millis(30_500);
