use actix_web::{get, post, web, HttpResponse};
use serde_json::json;

use crate::{
    error::{Error, Result},
    models::{
        aircraft::{Aircraft, AircraftRequest, AircraftResponse},
        profile::{Permission, Session},
    },
};

#[get("/aircraft")]
pub async fn get_aircraft(_session: Session) -> Result<HttpResponse> {
    let aircraft = Aircraft::find_many().await?;
    Ok(HttpResponse::Ok().json(json!({ "aircraft": aircraft })))
}
#[post("/aircraft")]
pub async fn create_aircraft(
    session: Session,
    payload: web::Json<AircraftRequest>,
) -> Result<HttpResponse> {
    session.require(Permission::ManageAircraft)?;

    let payload: AircraftRequest = payload.into_inner();
    if payload.registration.trim().is_empty() {
        return Err(Error::Validation("AIRCRAFT_MUST_HAVE_REGISTRATION".to_string()));
    }

    let mut aircraft = Aircraft {
        _id: None,
        registration: payload.registration,
        kind: payload.kind,
        model: payload.model,
    };
    aircraft.save().await?;

    Ok(HttpResponse::Created().json(json!({ "aircraft": AircraftResponse::from(&aircraft) })))
}
