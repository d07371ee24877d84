use crate::auth::PortalClient;
use crate::error::app_error::AppError;
use crate::models::profile::Profile;
use crate::models::user::{AuthSnapshot, CurrentClassRequest, ProfileUpdate, ProfileUpdateResponse, ProfileUpdateStatus};
use rocket::serde::json::Json;
use rocket::{get, put};
use rocket_okapi::openapi;
use validator::Validate;

fn update_response(update: ProfileUpdate, snapshot: AuthSnapshot) -> ProfileUpdateResponse {
    let status = match update {
        ProfileUpdate::Skipped => ProfileUpdateStatus::Skipped,
        ProfileUpdate::Applied(_) => ProfileUpdateStatus::Applied,
    };
    ProfileUpdateResponse { status, snapshot }
}

/// Current session and profile view for this client
#[openapi(tag = "Profile")]
#[get("/")]
pub async fn get_me(client: PortalClient) -> Json<AuthSnapshot> {
    client.settled().await;
    client.coordinator.revalidate().await;
    Json(client.settled().await)
}

/// Complete or replace the signed-in user's profile
///
/// The profile's `role` must match the account's role. Without a signed-in user
/// nothing is stored and the status is `skipped`.
#[openapi(tag = "Profile")]
#[put("/profile", data = "<payload>")]
pub async fn put_profile(client: PortalClient, payload: Json<Profile>) -> Result<Json<ProfileUpdateResponse>, AppError> {
    client.settled().await;

    let update = client.coordinator.update_profile(payload.into_inner()).await?;
    Ok(Json(update_response(update, client.coordinator.snapshot())))
}

/// Switch the class a faculty member is currently teaching
#[openapi(tag = "Profile")]
#[put("/current-class", data = "<payload>")]
pub async fn put_current_class(client: PortalClient, payload: Json<CurrentClassRequest>) -> Result<Json<ProfileUpdateResponse>, AppError> {
    payload.validate()?;
    client.settled().await;

    let update = client.coordinator.set_current_class(&payload.current_class).await?;
    Ok(Json(update_response(update, client.coordinator.snapshot())))
}

pub fn routes() -> (Vec<rocket::Route>, okapi::openapi3::OpenApi) {
    rocket_okapi::openapi_get_routes_spec![get_me, put_profile, put_current_class]
}

#[cfg(test)]
mod tests {
    use crate::models::profile::Profile;
    use crate::models::role::Role;
    use crate::test_utils::{memory_client, sample_faculty_profile, sample_student_profile};
    use rocket::http::{ContentType, Status};
    use rocket::local::asynchronous::Client;
    use serde_json::Value;

    const PASSWORD: &str = "correct-horse-battery-staple-42";

    async fn sign_in(client: &Client, email: &str) {
        let body = serde_json::json!({ "email": email, "password": PASSWORD });
        let response = client
            .post("/api/v1/auth/signin")
            .header(ContentType::JSON)
            .body(body.to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
    }

    #[rocket::async_test]
    async fn anonymous_client_is_unauthenticated() {
        let (client, _, _) = memory_client().await;

        let response = client.get("/api/v1/me/").dispatch().await;

        assert_eq!(response.status(), Status::Ok);
        assert!(client.cookies().get_private("portal_client").is_some());
        let snapshot: Value = response.into_json().await.expect("snapshot body");
        assert_eq!(snapshot["phase"], "unauthenticated");
        assert_eq!(snapshot["loading"], false);
    }

    #[rocket::async_test]
    async fn revoked_session_reads_as_signed_out() {
        let (client, identity, _) = memory_client().await;
        identity.register("asha@example.com", PASSWORD, Role::Student);
        sign_in(&client, "asha@example.com").await;

        identity.set_current(None);
        let response = client.get("/api/v1/me/").dispatch().await;

        assert_eq!(response.status(), Status::Ok);
        let snapshot: Value = response.into_json().await.expect("snapshot body");
        assert_eq!(snapshot["phase"], "unauthenticated");
        assert_eq!(snapshot["user"], Value::Null);
    }

    #[rocket::async_test]
    async fn anonymous_profile_update_is_skipped() {
        let (client, _, profiles) = memory_client().await;
        let body = serde_json::to_string(&Profile::Student(sample_student_profile())).expect("profile json");

        let response = client.put("/api/v1/me/profile").header(ContentType::JSON).body(body).dispatch().await;

        assert_eq!(response.status(), Status::Ok);
        let payload: Value = response.into_json().await.expect("update body");
        assert_eq!(payload["status"], "skipped");
        assert_eq!(profiles.write_count(), 0);
    }

    #[rocket::async_test]
    async fn signed_in_student_stores_profile() {
        let (client, identity, profiles) = memory_client().await;
        let user_id = identity.register("asha@example.com", PASSWORD, Role::Student);
        sign_in(&client, "asha@example.com").await;

        let body = serde_json::to_string(&Profile::Student(sample_student_profile())).expect("profile json");
        let response = client.put("/api/v1/me/profile").header(ContentType::JSON).body(body).dispatch().await;

        assert_eq!(response.status(), Status::Ok);
        let payload: Value = response.into_json().await.expect("update body");
        assert_eq!(payload["status"], "applied");
        assert_eq!(payload["snapshot"]["user"]["name"], "Asha Menon");
        assert_eq!(payload["snapshot"]["user"]["profile"]["rollNumber"], "S-042");
        assert!(profiles.get(&user_id).is_some());
    }

    #[rocket::async_test]
    async fn profile_for_the_other_role_is_rejected() {
        let (client, identity, profiles) = memory_client().await;
        identity.register("lee@example.com", PASSWORD, Role::Faculty);
        sign_in(&client, "lee@example.com").await;

        let body = serde_json::to_string(&Profile::Student(sample_student_profile())).expect("profile json");
        let response = client.put("/api/v1/me/profile").header(ContentType::JSON).body(body).dispatch().await;

        assert_eq!(response.status(), Status::BadRequest);
        assert_eq!(profiles.write_count(), 0);
    }

    #[rocket::async_test]
    async fn faculty_switches_current_class() {
        let (client, identity, profiles) = memory_client().await;
        let user_id = identity.register("lee@example.com", PASSWORD, Role::Faculty);
        profiles.insert(user_id, Profile::Faculty(sample_faculty_profile()));
        sign_in(&client, "lee@example.com").await;

        let response = client
            .put("/api/v1/me/current-class")
            .header(ContentType::JSON)
            .body(r#"{"currentClass":"Class 11B"}"#)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let payload: Value = response.into_json().await.expect("update body");
        assert_eq!(payload["snapshot"]["user"]["profile"]["currentClass"], "Class 11B");

        let response = client
            .put("/api/v1/me/current-class")
            .header(ContentType::JSON)
            .body(r#"{"currentClass":"Class 12A"}"#)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);
    }
}
