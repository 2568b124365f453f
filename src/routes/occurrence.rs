use actix_web::{get, patch, post, web, HttpResponse};
use serde_json::json;

use crate::{
    error::{Error, Result},
    models::{
        aircraft::Aircraft,
        filter::{ListFilter, OffsetQuery, Pagination},
        investigation::Investigation,
        occurrence::{Occurrence, OccurrenceRequest, OccurrenceResponse, OccurrenceUpdateRequest},
        parse_id, parse_optional_id,
        profile::{Profile, Session},
        stage::ProgressTracker,
    },
};

#[get("/occurrences")]
pub async fn get_occurrences(
    _session: Session,
    filter: web::Query<ListFilter>,
    offset: web::Query<OffsetQuery>,
) -> Result<HttpResponse> {
    let filter: ListFilter = filter.into_inner();
    let offset = filter.resolve_offset(offset.offset);

    let (occurrences, total) = Occurrence::find_many(&filter, offset).await?;
    let relations = Occurrence::load_relations(&occurrences, true).await?;
    let stats = Occurrence::statistics().await?;

    let occurrences: Vec<OccurrenceResponse> = occurrences
        .into_iter()
        .map(|occurrence| OccurrenceResponse::new(occurrence, &relations))
        .collect();

    Ok(HttpResponse::Ok().json(json!({
        "occurrences": occurrences,
        "pagination": Pagination::new(&filter, offset, total),
        "stats": stats,
    })))
}
#[post("/occurrences")]
pub async fn create_occurrence(
    session: Session,
    payload: web::Json<OccurrenceRequest>,
) -> Result<HttpResponse> {
    let mut occurrence = payload.into_inner().into_occurrence(session.profile_id)?;
    if let Some(aircraft_id) = &occurrence.aircraft_id {
        if Aircraft::find_by_id(aircraft_id).await?.is_none() {
            return Err(Error::not_found("AIRCRAFT"));
        }
    }

    occurrence.save().await?;
    let relations = Occurrence::load_relations(std::slice::from_ref(&occurrence), false).await?;

    Ok(HttpResponse::Created().json(json!({
        "occurrence": OccurrenceResponse::new(occurrence, &relations),
    })))
}
#[get("/occurrences/{occurrence_id}")]
pub async fn get_occurrence(
    _session: Session,
    occurrence_id: web::Path<String>,
) -> Result<HttpResponse> {
    let occurrence_id = parse_id(&occurrence_id)?;
    let occurrence = Occurrence::find_by_id(&occurrence_id)
        .await?
        .ok_or_else(|| Error::not_found("OCCURRENCE"))?;

    let relations = Occurrence::load_relations(std::slice::from_ref(&occurrence), false).await?;
    let details = Occurrence::find_details(&occurrence_id).await?;
    let investigation = match Investigation::find_by_occurrence(&occurrence_id).await? {
        Some(investigation) => Investigation::into_responses(vec![investigation])
            .await?
            .into_iter()
            .next(),
        None => None,
    };
    let progress = investigation
        .as_ref()
        .map(|investigation| ProgressTracker::new(investigation.stage));

    Ok(HttpResponse::Ok().json(json!({
        "occurrence": OccurrenceResponse::new(occurrence, &relations),
        "details": details,
        "investigation": investigation,
        "progress": progress,
    })))
}
#[patch("/occurrences/{occurrence_id}")]
pub async fn update_occurrence(
    _session: Session,
    occurrence_id: web::Path<String>,
    payload: web::Json<OccurrenceUpdateRequest>,
) -> Result<HttpResponse> {
    let occurrence_id = parse_id(&occurrence_id)?;
    let payload: OccurrenceUpdateRequest = payload.into_inner();

    if let Some(assignee) = parse_optional_id(payload.assigned_to.as_deref())? {
        if Profile::find_by_id(&assignee).await?.is_none() {
            return Err(Error::not_found("PROFILE"));
        }
    }

    let occurrence = Occurrence::update(&occurrence_id, &payload)
        .await?
        .ok_or_else(|| Error::not_found("OCCURRENCE"))?;
    tracing::debug!(%occurrence_id, status = %occurrence.status, "occurrence updated");

    let relations = Occurrence::load_relations(std::slice::from_ref(&occurrence), false).await?;
    Ok(HttpResponse::Ok().json(json!({
        "occurrence": OccurrenceResponse::new(occurrence, &relations),
    })))
}
