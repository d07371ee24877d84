use crate::error::app_error::AppError;
use crate::models::session::Session;
use crate::models::user::AuthSnapshot;
use crate::service::coordinator::SessionProfileCoordinator;
use crate::service::registry::CoordinatorRegistry;
use rocket::http::{Cookie, CookieJar, SameSite, Status};
use rocket::outcome::Outcome;
use rocket::request::{FromRequest, Outcome as RequestOutcome, Request};
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::okapi::openapi3::{Object, SecurityRequirement, SecurityScheme, SecuritySchemeData};
use rocket_okapi::request::{OpenApiFromRequest, RequestHeaderInput};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

pub const CLIENT_COOKIE: &str = "portal_client";
pub const SESSION_COOKIE: &str = "session";

/// Identifies the browser a request came from, independent of who is signed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientId(pub Uuid);

/// The calling client's session coordinator.
pub struct PortalClient {
    pub coordinator: SessionProfileCoordinator,
    settle_timeout: Duration,
}

impl PortalClient {
    /// The client's view once it has left any transitional phase.
    pub async fn settled(&self) -> AuthSnapshot {
        self.coordinator.settled_within(self.settle_timeout).await
    }
}

pub(crate) fn parse_session_cookie_value(value: &str) -> Option<(Uuid, Uuid)> {
    let (session_id_str, user_id_str) = value.split_once(':')?;
    let session_id = Uuid::parse_str(session_id_str).ok()?;
    let user_id = Uuid::parse_str(user_id_str).ok()?;
    Some((session_id, user_id))
}

pub fn build_client_cookie(client_id: Uuid) -> Cookie<'static> {
    Cookie::build((CLIENT_COOKIE, client_id.to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

pub fn build_session_cookie(session: &Session) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, session.cookie_value()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

pub fn clear_session_cookie(cookies: &CookieJar<'_>) {
    cookies.remove_private(Cookie::build(SESSION_COOKIE).path("/").build());
}

fn client_id(cookies: &CookieJar<'_>) -> Uuid {
    if let Some(id) = cookies.get_private(CLIENT_COOKIE).and_then(|cookie| Uuid::parse_str(cookie.value()).ok()) {
        return id;
    }

    let id = Uuid::new_v4();
    debug!(client_id = %id, "issuing client cookie");
    cookies.add_private(build_client_cookie(id));
    id
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for PortalClient {
    type Error = AppError;

    async fn from_request(req: &'r Request<'_>) -> RequestOutcome<Self, Self::Error> {
        let registry = match req.rocket().state::<Arc<CoordinatorRegistry>>() {
            Some(registry) => registry,
            None => {
                return Outcome::Error((
                    Status::InternalServerError,
                    AppError::Upstream("Session coordinators are not configured".to_string()),
                ));
            }
        };

        let cookies = req.cookies();
        let id = client_id(cookies);
        req.local_cache(|| Some(ClientId(id)));

        let restore = cookies.get_private(SESSION_COOKIE).and_then(|cookie| parse_session_cookie_value(cookie.value()));
        let coordinator = registry.get_or_start(id, restore).await;

        Outcome::Success(PortalClient {
            coordinator,
            settle_timeout: registry.settle_timeout(),
        })
    }
}

impl<'a> OpenApiFromRequest<'a> for PortalClient {
    fn from_request_input(_gen: &mut OpenApiGenerator, _name: String, _required: bool) -> rocket_okapi::Result<RequestHeaderInput> {
        let security_scheme = SecurityScheme {
            description: Some("Cookie-based client session. Sign in via POST /auth/signin to obtain the session cookie.".to_string()),
            data: SecuritySchemeData::ApiKey {
                name: SESSION_COOKIE.to_string(),
                location: "cookie".to_string(),
            },
            extensions: Object::default(),
        };

        let mut security_req = SecurityRequirement::new();
        security_req.insert("cookieAuth".to_string(), Vec::new());

        Ok(RequestHeaderInput::Security("cookieAuth".to_string(), security_scheme, security_req))
    }
}
