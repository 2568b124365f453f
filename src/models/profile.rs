use crate::{
    database::get_db,
    error::{self, is_duplicate_key, Error},
};
use actix_service::{self, Transform};
use actix_web::{
    dev::{Payload, Service, ServiceRequest, ServiceResponse},
    http::header::AUTHORIZATION,
    FromRequest, HttpMessage, HttpRequest,
};
use chrono::Utc;
use futures::{
    future::{ready, LocalBoxFuture, Ready},
    FutureExt, TryStreamExt,
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use mongodb::{
    bson::{doc, oid::ObjectId, DateTime},
    options::FindOptions,
    Collection, Database,
};
use pwhash::bcrypt;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, rc::Rc, str::FromStr, sync::OnceLock};

pub const SESSION_COOKIE: &str = "session";
const TOKEN_ISSUER: &str = "occurrence-tracker";
const TOKEN_AUDIENCE: &str = "occurrence-tracker-api";
const TOKEN_LIFETIME_SECONDS: i64 = 86400;

static KEYS: OnceLock<SessionKeys> = OnceLock::new();

struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProfileRole {
    Admin,
    SafetyOfficer,
    Investigator,
    Reporter,
}
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Permission {
    CreateProfile,
    InitializeStorage,
    CreateInvestigation,
    ManageAircraft,
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionClaims {
    aud: String,
    exp: i64,
    iss: String,
    sub: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Profile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,
    pub full_name: String,
    pub email: String,
    pub password: String,
    pub role: ProfileRole,
    pub created_at: DateTime,
}
#[derive(Debug, Deserialize)]
pub struct ProfileCredential {
    pub email: String,
    pub password: String,
}
#[derive(Debug, Deserialize)]
pub struct ProfileRequest {
    pub full_name: String,
    pub email: String,
    pub password: String,
    pub role: Option<ProfileRole>,
}
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ProfileResponse {
    pub id: String,
    pub full_name: String,
    pub email: String,
    pub role: ProfileRole,
}
/// Who did something, as embedded in other resources.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct PersonSummary {
    pub id: String,
    pub full_name: String,
    pub email: String,
}

/// The authenticated caller, placed in request extensions by the middleware.
#[derive(Debug, Clone)]
pub struct Session {
    pub profile_id: ObjectId,
    pub role: ProfileRole,
}

pub struct SessionMiddleware<S> {
    service: Rc<S>,
}
pub struct SessionMiddlewareFactory;

impl ProfileRole {
    pub fn allows(self, permission: Permission) -> bool {
        match self {
            ProfileRole::Admin => true,
            ProfileRole::SafetyOfficer => matches!(
                permission,
                Permission::CreateInvestigation | Permission::ManageAircraft
            ),
            ProfileRole::Investigator | ProfileRole::Reporter => false,
        }
    }
    pub fn is_investigator(self) -> bool {
        matches!(self, ProfileRole::Investigator | ProfileRole::SafetyOfficer)
    }
}

impl Session {
    pub fn require(&self, permission: Permission) -> error::Result<()> {
        if self.role.allows(permission) {
            Ok(())
        } else {
            Err(Error::Forbidden)
        }
    }
}

impl FromRequest for Session {
    type Error = Error;
    type Future = Ready<error::Result<Self>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(
            req.extensions()
                .get::<Session>()
                .cloned()
                .ok_or(Error::Unauthorized),
        )
    }
}

impl From<Profile> for ProfileResponse {
    fn from(profile: Profile) -> Self {
        ProfileResponse {
            id: profile._id.map(|id| id.to_hex()).unwrap_or_default(),
            full_name: profile.full_name,
            email: profile.email,
            role: profile.role,
        }
    }
}

impl ProfileRequest {
    pub fn validate(&self) -> error::Result<()> {
        let email_regex: Regex = Regex::new(
            r"^([a-z0-9_+]([a-z0-9_+.]*[a-z0-9_+])?)@([a-z0-9]+([\-\.]{1}[a-z0-9]+)*\.[a-z]{2,6})$",
        )
        .map_err(|error| Error::Upstream(error.to_string()))?;

        if self.full_name.trim().is_empty() {
            return Err(Error::Validation("PROFILE_MUST_HAVE_NAME".to_string()));
        }
        if self.password.len() < 8 {
            return Err(Error::Validation(
                "PROFILE_MUST_HAVE_VALID_PASSWORD".to_string(),
            ));
        }
        if !email_regex.is_match(&self.email) {
            return Err(Error::Validation("PROFILE_MUST_HAVE_VALID_EMAIL".to_string()));
        }
        Ok(())
    }
}

impl Profile {
    pub async fn save(&mut self) -> error::Result<ObjectId> {
        let db: Database = get_db()?;
        let collection: Collection<Profile> = db.collection::<Profile>("profiles");

        let id = ObjectId::new();
        self._id = Some(id);
        self.password = bcrypt::hash(&self.password)
            .map_err(|_| Error::Upstream("HASHING_FAILED".to_string()))?;

        match collection.insert_one(&*self, None).await {
            Ok(_) => Ok(id),
            Err(error) if is_duplicate_key(&error) => {
                Err(Error::Conflict("PROFILE_ALREADY_EXISTS".to_string()))
            }
            Err(error) => Err(error.into()),
        }
    }
    pub async fn count() -> error::Result<u64> {
        let db: Database = get_db()?;
        let collection: Collection<Profile> = db.collection::<Profile>("profiles");

        Ok(collection.estimated_document_count(None).await?)
    }
    pub async fn find_by_id(_id: &ObjectId) -> error::Result<Option<Profile>> {
        let db: Database = get_db()?;
        let collection: Collection<Profile> = db.collection::<Profile>("profiles");

        Ok(collection.find_one(doc! { "_id": _id }, None).await?)
    }
    pub async fn find_by_email(email: &str) -> error::Result<Option<Profile>> {
        let db: Database = get_db()?;
        let collection: Collection<Profile> = db.collection::<Profile>("profiles");

        Ok(collection.find_one(doc! { "email": email }, None).await?)
    }
    /// Profiles that can lead or be assigned an investigation, by name.
    pub async fn find_investigators() -> error::Result<Vec<ProfileResponse>> {
        let db: Database = get_db()?;
        let collection: Collection<Profile> = db.collection::<Profile>("profiles");

        let options = FindOptions::builder().sort(doc! { "full_name": 1 }).build();
        let cursor = collection
            .find(
                doc! { "role": { "$in": ["investigator", "safety_officer"] } },
                options,
            )
            .await?;
        let profiles: Vec<Profile> = cursor.try_collect().await?;

        Ok(profiles.into_iter().map(ProfileResponse::from).collect())
    }
    pub async fn find_summaries(ids: &[ObjectId]) -> error::Result<HashMap<ObjectId, PersonSummary>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let db: Database = get_db()?;
        let collection: Collection<Profile> = db.collection::<Profile>("profiles");

        let cursor = collection.find(doc! { "_id": { "$in": ids.to_vec() } }, None).await?;
        let profiles: Vec<Profile> = cursor.try_collect().await?;

        Ok(profiles
            .into_iter()
            .filter_map(|profile| {
                let id = profile._id?;
                Some((id, profile.summary()))
            })
            .collect())
    }
    pub async fn find_summary(id: Option<ObjectId>) -> error::Result<Option<PersonSummary>> {
        match id {
            Some(id) => Ok(Profile::find_by_id(&id).await?.map(|p| p.summary())),
            None => Ok(None),
        }
    }
    pub fn summary(&self) -> PersonSummary {
        PersonSummary {
            id: self._id.map(|id| id.to_hex()).unwrap_or_default(),
            full_name: self.full_name.clone(),
            email: self.email.clone(),
        }
    }
}

impl ProfileCredential {
    pub async fn authenticate(&self) -> error::Result<(String, Profile)> {
        let profile = match Profile::find_by_email(&self.email).await? {
            Some(profile) => profile,
            None => return Err(Error::Unauthorized),
        };
        if !bcrypt::verify(&self.password, &profile.password) {
            return Err(Error::Unauthorized);
        }
        let id = profile._id.ok_or(Error::Unauthorized)?;
        Ok((issue_token(&id)?, profile))
    }
}

pub fn load_keys(secret: &str) {
    KEYS.get_or_init(|| SessionKeys {
        encoding: EncodingKey::from_secret(secret.as_bytes()),
        decoding: DecodingKey::from_secret(secret.as_bytes()),
    });
}

pub fn issue_token(profile_id: &ObjectId) -> error::Result<String> {
    let keys = KEYS
        .get()
        .ok_or_else(|| Error::Upstream("SESSION_KEYS_NOT_LOADED".to_string()))?;
    let claims = SessionClaims {
        sub: profile_id.to_hex(),
        exp: Utc::now().timestamp() + TOKEN_LIFETIME_SECONDS,
        iss: TOKEN_ISSUER.to_string(),
        aud: TOKEN_AUDIENCE.to_string(),
    };

    encode(&Header::new(Algorithm::HS256), &claims, &keys.encoding)
        .map_err(|_| Error::Upstream("GENERATING_FAILED".to_string()))
}

pub fn verify_token(token: &str) -> Option<ObjectId> {
    let keys = KEYS.get()?;
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_audience(&[TOKEN_AUDIENCE]);
    validation.set_issuer(&[TOKEN_ISSUER]);

    let data = decode::<SessionClaims>(token, &keys.decoding, &validation).ok()?;
    ObjectId::from_str(&data.claims.sub).ok()
}

fn request_token(req: &ServiceRequest) -> Option<String> {
    let bearer = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string());

    bearer.or_else(|| {
        req.request()
            .cookie(SESSION_COOKIE)
            .map(|cookie| cookie.value().to_string())
    })
}

impl<S, B> Service<ServiceRequest> for SessionMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
{
    type Response = ServiceResponse<B>;
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, std::result::Result<Self::Response, Self::Error>>;

    actix_service::forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let srv: Rc<S> = self.service.clone();

        async move {
            if let Some(profile_id) = request_token(&req).as_deref().and_then(verify_token) {
                match Profile::find_by_id(&profile_id).await {
                    Ok(Some(profile)) => {
                        req.extensions_mut().insert(Session {
                            profile_id,
                            role: profile.role,
                        });
                    }
                    Ok(None) => tracing::debug!(%profile_id, "session for unknown profile"),
                    Err(error) => tracing::warn!(%error, "session lookup failed"),
                }
            }
            let res: ServiceResponse<B> = srv.call(req).await?;
            Ok(res)
        }
        .boxed_local()
    }
}
impl<S, B> Transform<S, ServiceRequest> for SessionMiddlewareFactory
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = actix_web::Error;
    type Transform = SessionMiddleware<S>;
    type InitError = ();
    type Future = Ready<std::result::Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(SessionMiddleware {
            service: Rc::new(service),
        }))
    }
}
