use actix_web::{
    cookie::{time::Duration, Cookie, SameSite},
    post, web, HttpResponse,
};
use mongodb::bson::DateTime;
use serde_json::json;

use crate::{
    database::next_sequence,
    error::{Error, Result},
    models::profile::{
        Permission, Profile, ProfileCredential, ProfileRequest, ProfileResponse, ProfileRole,
        Session, SESSION_COOKIE,
    },
};

/// Counter claimed by the request that creates the first admin.
const BOOTSTRAP_COUNTER: &str = "profile-bootstrap";

fn session_cookie(token: String) -> Cookie<'static> {
    Cookie::build(SESSION_COOKIE, token)
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(Duration::hours(24))
        .finish()
}

#[post("/auth/login")]
pub async fn login(payload: web::Json<ProfileCredential>) -> Result<HttpResponse> {
    let mut credential: ProfileCredential = payload.into_inner();
    credential.email = credential.email.trim().to_lowercase();

    let (token, profile) = credential.authenticate().await?;
    tracing::info!(email = %profile.email, "profile signed in");

    Ok(HttpResponse::Ok()
        .cookie(session_cookie(token.clone()))
        .json(json!({
            "token": token,
            "profile": ProfileResponse::from(profile),
        })))
}
#[post("/auth/logout")]
pub async fn logout() -> HttpResponse {
    let mut cookie = session_cookie(String::new());
    cookie.make_removal();

    HttpResponse::Ok()
        .cookie(cookie)
        .json(json!({ "message": "Signed out" }))
}
/// Role for a new profile. The request holding the bootstrap claim becomes
/// admin; every other one needs a session allowed to create profiles.
fn creation_role(
    bootstrap: bool,
    session: Option<Session>,
    requested: Option<ProfileRole>,
) -> Result<ProfileRole> {
    if bootstrap {
        return Ok(ProfileRole::Admin);
    }
    session
        .ok_or(Error::Unauthorized)?
        .require(Permission::CreateProfile)?;
    Ok(requested.unwrap_or(ProfileRole::Reporter))
}

/// The first profile bootstraps the system as an admin without a session.
/// Every later one needs an admin session.
#[post("/profiles")]
pub async fn create_profile(
    session: Option<Session>,
    payload: web::Json<ProfileRequest>,
) -> Result<HttpResponse> {
    let mut payload: ProfileRequest = payload.into_inner();
    payload.email = payload.email.trim().to_lowercase();
    payload.validate()?;

    // only one of several concurrent first requests wins the counter
    let bootstrap = Profile::count().await? == 0 && next_sequence(BOOTSTRAP_COUNTER).await? == 1;
    let role = creation_role(bootstrap, session, payload.role)?;
    if bootstrap {
        tracing::info!(email = %payload.email, "bootstrapping first admin profile");
    }

    let mut profile = Profile {
        _id: None,
        full_name: payload.full_name.trim().to_string(),
        email: payload.email,
        password: payload.password,
        role,
        created_at: DateTime::now(),
    };
    profile.save().await?;

    Ok(HttpResponse::Created().json(json!({ "profile": ProfileResponse::from(profile) })))
}
