use actix_web::{get, HttpResponse};
use serde_json::json;

use crate::{
    error::Result,
    models::profile::{Profile, Session},
};

#[get("/investigators")]
pub async fn get_investigators(_session: Session) -> Result<HttpResponse> {
    let investigators = Profile::find_investigators().await?;
    Ok(HttpResponse::Ok().json(json!({ "investigators": investigators })))
}
