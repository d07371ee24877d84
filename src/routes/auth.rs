use crate::auth::{PortalClient, build_session_cookie, clear_session_cookie};
use crate::error::app_error::AppError;
use crate::models::user::{AuthSnapshot, SignInRequest, SignUpOutcome, SignUpRequest, SignUpResponse};
use rocket::http::{CookieJar, Status};
use rocket::post;
use rocket::serde::json::Json;
use rocket_okapi::openapi;
use validator::Validate;

/// Create an account with a role
///
/// When the account is confirmed straight away the client is signed in as well.
#[openapi(tag = "Authentication")]
#[post("/signup", data = "<payload>")]
pub async fn post_sign_up(client: PortalClient, cookies: &CookieJar<'_>, payload: Json<SignUpRequest>) -> Result<(Status, Json<SignUpResponse>), AppError> {
    payload.validate()?;

    let outcome = client.coordinator.sign_up(&payload.email, &payload.password, payload.role).await?;
    if let SignUpOutcome::SignedIn(session) = &outcome {
        cookies.add_private(build_session_cookie(session));
    }

    Ok((Status::Created, Json(SignUpResponse::from(&outcome))))
}

/// Sign in with email and password
#[openapi(tag = "Authentication")]
#[post("/signin", data = "<payload>")]
pub async fn post_sign_in(client: PortalClient, cookies: &CookieJar<'_>, payload: Json<SignInRequest>) -> Result<Json<AuthSnapshot>, AppError> {
    payload.validate()?;

    let session = client.coordinator.sign_in(&payload.email, &payload.password).await?;
    cookies.add_private(build_session_cookie(&session));

    Ok(Json(client.settled().await))
}

/// Sign out
///
/// Always succeeds for the caller: the client is signed out locally even when
/// revoking the session upstream fails.
#[openapi(tag = "Authentication")]
#[post("/signout")]
pub async fn post_sign_out(client: PortalClient, cookies: &CookieJar<'_>) -> Json<AuthSnapshot> {
    // The coordinator has already logged a failed revocation.
    let _ = client.coordinator.sign_out().await;
    clear_session_cookie(cookies);

    Json(client.coordinator.snapshot())
}

/// Extend the current session
#[openapi(tag = "Authentication")]
#[post("/refresh")]
pub async fn post_refresh(client: PortalClient, cookies: &CookieJar<'_>) -> Result<Json<AuthSnapshot>, AppError> {
    let session = client.coordinator.refresh().await?;
    cookies.add_private(build_session_cookie(&session));

    Ok(Json(client.settled().await))
}

pub fn routes() -> (Vec<rocket::Route>, okapi::openapi3::OpenApi) {
    rocket_okapi::openapi_get_routes_spec![post_sign_up, post_sign_in, post_sign_out, post_refresh]
}
