//! Sign-up HTTP handlers
//!
//! Thin adapters between HTTP and the signup/verification services. Every
//! route is guarded by the auth middleware, which verifies the bearer token
//! and stashes the identity claims for the handlers.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Extension, Json, Router};
use serde::Deserialize;

use crate::auth::{extract_bearer_token, TokenClaims, TokenParser};
use crate::error::HttpError;
use crate::hash;
use crate::signup::SignupService;
use crate::verification::VerificationService;

/// Shared state of the sign-up API handlers
#[derive(Clone)]
pub struct ApiState {
    /// Bearer-token parser
    pub token_parser: Arc<TokenParser>,
    /// Signup service
    pub signup_service: Arc<SignupService>,
    /// Verification service
    pub verification_service: Arc<VerificationService>,
}

/// Build the sign-up API router
pub fn api_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/signup", post(post_signup).get(get_signup))
        .route("/api/v1/signup/verification", put(init_verification))
        .route(
            "/api/v1/signup/verification/activation-code",
            post(verify_activation_code),
        )
        .route("/api/v1/signup/verification/{code}", get(verify_phone_code))
        .layer(middleware::from_fn_with_state(state.clone(), authenticate))
        .with_state(state)
}

/// Verify the bearer token and stash the identity claims in the request
/// extensions.
async fn authenticate(
    State(state): State<ApiState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, HttpError> {
    let token = extract_bearer_token(request.headers())
        .map_err(|e| HttpError::unauthorized("invalid bearer token", e.text()))?;
    let claims = state
        .token_parser
        .parse(&token)
        .await
        .map_err(|e| HttpError::unauthorized("invalid bearer token", e.text()))?;
    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}

/// `POST /api/v1/signup`
async fn post_signup(
    State(state): State<ApiState>,
    Extension(claims): Extension<TokenClaims>,
) -> Result<impl IntoResponse, HttpError> {
    let signup = state
        .signup_service
        .signup(&claims, None)
        .await
        .map_err(|e| e.ensure_details("error creating UserSignup resource"))?;
    Ok((StatusCode::ACCEPTED, Json(signup)))
}

/// `GET /api/v1/signup`
async fn get_signup(
    State(state): State<ApiState>,
    Extension(claims): Extension<TokenClaims>,
) -> Result<Response, HttpError> {
    let signup = state
        .signup_service
        .get_signup(&claims.username, true)
        .await
        .map_err(|e| e.ensure_details("error getting UserSignup resource"))?;

    match signup {
        None => Err(HttpError::not_found("usersignup not found", "")),
        Some(signup) if signup.banned() => {
            Err(HttpError::forbidden("user access is forbidden", ""))
        }
        Some(signup) => Ok(Json(signup).into_response()),
    }
}

/// Body of `PUT /api/v1/signup/verification`
#[derive(Debug, Deserialize)]
struct PhoneRequest {
    phone_number: String,
    country_code: String,
}

/// `PUT /api/v1/signup/verification`
async fn init_verification(
    State(state): State<ApiState>,
    Extension(claims): Extension<TokenClaims>,
    body: Result<Json<PhoneRequest>, JsonRejection>,
) -> Result<StatusCode, HttpError> {
    let Json(phone) = body
        .map_err(|e| HttpError::bad_request(e.to_string(), "error reading request body"))?;

    let country_code = phone.country_code.trim();
    if let Err(e) = country_code.parse::<u32>() {
        return Err(HttpError::bad_request(e.to_string(), "invalid country_code"));
    }

    let number = phone.phone_number.trim();
    if !is_valid_phone_number(number) {
        return Err(HttpError::bad_request(
            "invalid phone number",
            "invalid phone number provided",
        ));
    }

    let e164 = format!("+{}{}", country_code, hash::canonicalize_phone(number));
    state
        .verification_service
        .init_verification(&claims.username, &e164, country_code)
        .await
        .map_err(|e| e.ensure_details("error while initiating phone verification"))?;

    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/v1/signup/verification/{code}`
async fn verify_phone_code(
    State(state): State<ApiState>,
    Extension(claims): Extension<TokenClaims>,
    Path(code): Path<String>,
) -> Result<StatusCode, HttpError> {
    let code = code.trim();
    if code.is_empty() {
        return Err(HttpError::bad_request("no code provided in request", ""));
    }

    state
        .verification_service
        .verify_phone_code(&claims.username, code)
        .await
        .map_err(|e| e.ensure_details("error while verifying phone code"))?;

    Ok(StatusCode::OK)
}

/// Body of `POST /api/v1/signup/verification/activation-code`
#[derive(Debug, Deserialize)]
struct ActivationCodeRequest {
    code: String,
}

/// `POST /api/v1/signup/verification/activation-code`
async fn verify_activation_code(
    State(state): State<ApiState>,
    Extension(claims): Extension<TokenClaims>,
    body: Result<Json<ActivationCodeRequest>, JsonRejection>,
) -> Result<StatusCode, HttpError> {
    let Json(request) = body
        .map_err(|e| HttpError::bad_request(e.to_string(), "error reading request body"))?;

    state
        .verification_service
        .verify_activation_code(&claims, &request.code)
        .await
        .map_err(|e| e.ensure_details("error while verifying activation code"))?;

    Ok(StatusCode::OK)
}

/// A phone number may carry digits plus common grouping punctuation
fn is_valid_phone_number(number: &str) -> bool {
    !number.is_empty()
        && number
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, ' ' | '-' | '(' | ')' | '.' | '+'))
}
