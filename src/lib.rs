//! KubeSaw registration service
//!
//! A multi-tenant authenticating reverse proxy that sits in front of a fleet
//! of member API servers, plus the sign-up and phone/activation-code
//! verification workflow that manages `UserSignup` resources on the host
//! cluster.
//!
//! # Architecture
//!
//! ```text
//! user ──► Proxy ──► {token parser, ban check, workspace resolver} ──► member API server
//!                                                                      (impersonated)
//! user ──► Sign-up API ──► {signup service, verification service} ──► host cluster
//! ```
//!
//! # Modules
//!
//! - [`auth`] - bearer-token parsing backed by a cached JWKS
//! - [`config`] - service configuration injected into constructors
//! - [`controller`] - sign-up HTTP handlers and auth middleware
//! - [`crd`] - custom resources stored on the host cluster
//! - [`error`] - HTTP error type shared by both servers
//! - [`proxy`] - the workspace-aware reverse proxy
//! - [`signup`] - sign-up service, identifier encoding, retryable updates
//! - [`store`] - namespace-scoped host-cluster store
//! - [`verification`] - phone and activation-code verification
//! - [`server`] - listener startup and graceful shutdown

pub mod auth;
pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod hash;
pub mod proxy;
pub mod retry;
pub mod server;
pub mod signup;
pub mod store;
pub mod verification;

pub use config::Config;
pub use error::{HttpError, Result};
