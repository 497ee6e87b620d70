//! KubeSaw registration service - sign-up API and authenticating proxy

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::warn;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use kubesaw_registration::auth::{JwksKeys, TokenParser};
use kubesaw_registration::config::{AuthConfig, Config, Environment, TwilioConfig};
use kubesaw_registration::controller::{api_router, ApiState};
use kubesaw_registration::proxy::access::{
    CachedMembers, MemberCluster, MemberClusterSource, WorkspaceResolver,
};
use kubesaw_registration::proxy::{proxy_router, ProxyState};
use kubesaw_registration::server;
use kubesaw_registration::signup::SignupService;
use kubesaw_registration::store::{KubeSignupStore, SignupStore};
use kubesaw_registration::verification::{TwilioSender, VerificationService};

/// KubeSaw registration service
#[derive(Parser, Debug)]
#[command(name = "kubesaw-registration", version, about, long_about = None)]
struct Cli {
    /// Deployment environment
    #[arg(long, env = "ENVIRONMENT", value_enum, default_value = "prod")]
    environment: Environment,

    /// Host-operator namespace holding the custom resources
    #[arg(long, env = "WATCH_NAMESPACE", default_value = "kubesaw-host-operator")]
    namespace: String,

    /// Bind port of the sign-up API server
    #[arg(long, default_value = "8080")]
    api_port: u16,

    /// Bind port of the proxy server
    #[arg(long, default_value = "8081")]
    proxy_port: u16,

    /// Identity-provider base URL
    #[arg(long, env = "SSO_BASE_URL", default_value = "https://sso.devsandbox.dev")]
    sso_base_url: String,

    /// Identity-provider realm
    #[arg(long, env = "SSO_REALM", default_value = "sandbox-dev")]
    sso_realm: String,

    /// JWKS endpoint; derived from the SSO base URL when omitted
    #[arg(long, env = "JWKS_URL")]
    jwks_url: Option<String>,

    /// Twilio account SID
    #[arg(long, env = "TWILIO_ACCOUNT_SID", default_value = "")]
    twilio_account_sid: String,

    /// Twilio auth token
    #[arg(long, env = "TWILIO_AUTH_TOKEN", default_value = "")]
    twilio_auth_token: String,

    /// Twilio sender number
    #[arg(long, env = "TWILIO_FROM_NUMBER", default_value = "")]
    twilio_from_number: String,

    /// Phone-verification initiations allowed per user per 24h
    #[arg(long, default_value = "5")]
    verification_daily_limit: usize,

    /// Code-entry attempts allowed per generated code
    #[arg(long, default_value = "3")]
    verification_attempts_allowed: usize,

    /// Verification-code lifetime in minutes
    #[arg(long, default_value = "5")]
    verification_code_expires_in_min: i64,

    /// Registered member clusters as `name=api-url=sa-token[=operator-namespace]`;
    /// repeatable
    #[arg(long = "member")]
    members: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let jwks_url = cli.jwks_url.clone().unwrap_or_else(|| {
        format!(
            "{}/auth/realms/{}/protocol/openid-connect/certs",
            cli.sso_base_url.trim_end_matches('/'),
            cli.sso_realm
        )
    });

    let config = Config {
        environment: cli.environment,
        namespace: cli.namespace.clone(),
        api_port: cli.api_port,
        proxy_port: cli.proxy_port,
        auth: AuthConfig {
            sso_base_url: cli.sso_base_url.clone(),
            sso_realm: cli.sso_realm.clone(),
            jwks_url: jwks_url.clone(),
        },
        verification: kubesaw_registration::config::VerificationConfig {
            daily_limit: cli.verification_daily_limit,
            attempts_allowed: cli.verification_attempts_allowed,
            code_expires_in_min: cli.verification_code_expires_in_min,
            twilio: TwilioConfig {
                account_sid: cli.twilio_account_sid.clone(),
                auth_token: cli.twilio_auth_token.clone(),
                from_number: cli.twilio_from_number.clone(),
                base_url: String::new(),
            },
            ..Default::default()
        },
    };

    let client = kube::Client::try_default().await?;
    let store: Arc<dyn SignupStore> =
        Arc::new(KubeSignupStore::new(client, &config.namespace));

    // warm the key cache; parsing refreshes lazily afterwards
    let jwks = Arc::new(JwksKeys::new(jwks_url));
    if let Err(e) = jwks.refresh().await {
        warn!(error = %e, "initial JWKS fetch failed, keys will be fetched lazily");
    }
    let token_parser = Arc::new(TokenParser::new(jwks));

    let members = Arc::new(CachedMembers::new());
    members.replace(parse_members(&cli.members)?);
    let members: Arc<dyn MemberClusterSource> = members;

    let signup_service = Arc::new(SignupService::new(store.clone(), config.clone()));
    let sender = Arc::new(TwilioSender::new(config.verification.twilio.clone()));
    let verification_service = Arc::new(VerificationService::new(
        store.clone(),
        signup_service.clone(),
        sender,
        config.clone(),
    ));
    let resolver = Arc::new(WorkspaceResolver::new(store, members));

    let api = api_router(ApiState {
        token_parser: token_parser.clone(),
        signup_service: signup_service.clone(),
        verification_service,
    });
    let proxy = proxy_router(ProxyState::new(
        Arc::new(config.clone()),
        token_parser,
        signup_service,
        resolver,
    ));

    let api_addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    let proxy_addr = SocketAddr::from(([0, 0, 0, 0], config.proxy_port));

    tokio::try_join!(
        server::serve(api_addr, api, "signup-api"),
        server::serve(proxy_addr, proxy, "proxy"),
    )?;

    Ok(())
}

/// Parse `name=api-url=sa-token[=operator-namespace]` member definitions.
///
/// Statically configured members carry no kube client, so plugin routes are
/// unavailable until member credentials are wired in.
fn parse_members(definitions: &[String]) -> anyhow::Result<Vec<MemberCluster>> {
    definitions
        .iter()
        .map(|definition| {
            let parts: Vec<&str> = definition.splitn(4, '=').collect();
            match parts.as_slice() {
                [name, api_url, sa_token] => Ok(MemberCluster {
                    name: name.to_string(),
                    api_endpoint: api_url.to_string(),
                    sa_token: sa_token.to_string(),
                    operator_namespace: "member-operator".to_string(),
                    client: None,
                }),
                [name, api_url, sa_token, operator_namespace] => Ok(MemberCluster {
                    name: name.to_string(),
                    api_endpoint: api_url.to_string(),
                    sa_token: sa_token.to_string(),
                    operator_namespace: operator_namespace.to_string(),
                    client: None,
                }),
                _ => anyhow::bail!(
                    "invalid member definition '{}'; expected name=api-url=sa-token[=operator-namespace]",
                    definition
                ),
            }
        })
        .collect()
}
