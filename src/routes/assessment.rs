use actix_web::{get, patch, web, HttpResponse};
use serde_json::json;

use crate::{
    error::{Error, Result},
    models::{
        assessment::{AssessmentUpdate, OccurrenceAssessment},
        occurrence::Occurrence,
        parse_id, parse_optional_id,
        profile::{Profile, Session},
    },
};

#[get("/occurrences/{occurrence_id}/assessment")]
pub async fn get_assessment(
    session: Session,
    occurrence_id: web::Path<String>,
) -> Result<HttpResponse> {
    let occurrence_id = parse_id(&occurrence_id)?;
    if !Occurrence::exists(&occurrence_id).await? {
        return Err(Error::not_found("OCCURRENCE"));
    }

    let assessment = OccurrenceAssessment::ensure(&occurrence_id, &session.profile_id).await?;
    Ok(HttpResponse::Ok().json(json!({ "assessment": assessment.into_response().await? })))
}
#[patch("/occurrences/{occurrence_id}/assessment")]
pub async fn update_assessment(
    session: Session,
    occurrence_id: web::Path<String>,
    payload: web::Json<AssessmentUpdate>,
) -> Result<HttpResponse> {
    let occurrence_id = parse_id(&occurrence_id)?;
    let payload: AssessmentUpdate = payload.into_inner();
    if !Occurrence::exists(&occurrence_id).await? {
        return Err(Error::not_found("OCCURRENCE"));
    }

    if let Some(Some(investigator)) = &payload.assigned_investigator_id {
        if let Some(investigator) = parse_optional_id(Some(investigator.as_str()))? {
            if Profile::find_by_id(&investigator).await?.is_none() {
                return Err(Error::not_found("PROFILE"));
            }
        }
    }

    OccurrenceAssessment::ensure(&occurrence_id, &session.profile_id).await?;
    let assessment =
        OccurrenceAssessment::update(&occurrence_id, &payload, &session.profile_id).await?;
    tracing::info!(%occurrence_id, status = ?assessment.status, "assessment updated");

    Ok(HttpResponse::Ok().json(json!({ "assessment": assessment.into_response().await? })))
}
